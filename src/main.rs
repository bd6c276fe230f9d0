// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use anyhow::{Context, Result};
use data_middleware_core::{
    auth::TokenService,
    cache::{CacheManager, CacheManagerConfig, DisabledL2, InMemoryL2, L1Cache},
    cfg::{config::Config, logger::init_logger},
    connection::ConnectionTimings,
    dispatch::{HandlerRegistry, MessageDispatcher},
    gateway::{GatewayConfig, core_routes},
    manager::ConnectionManager,
    observability::Monitor as ProcessMonitor,
    tasks::{Monitor as SchedulerMonitor, Scheduler, Task, TaskExecutor},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Placeholder executor: the core ships the scheduler, not domain task
/// logic. A deployment wires its own `TaskExecutor` in before `start()`.
struct NoopExecutor;

#[async_trait::async_trait]
impl TaskExecutor for NoopExecutor {
    async fn execute(&self, _task: &Task) -> Result<(), data_middleware_core::error::CoreError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _logger_guard = init_logger("config/logger.yaml").context("failed to initialize logger")?;

    let cfg = Config::load_from_file("config/app.yaml").context("failed to load config")?;

    let timings = ConnectionTimings {
        read_timeout: cfg.tcp.read_timeout,
        write_timeout: cfg.tcp.write_timeout,
        buffer_size: cfg.connection.buffer_size,
        heartbeat_enabled: cfg.heartbeat.enabled,
        heartbeat_interval: cfg.heartbeat.interval,
        heartbeat_timeout: cfg.heartbeat.timeout,
        max_missed_heartbeats: cfg.heartbeat.max_missed,
        idle_timeout: cfg.connection.idle_timeout,
    };

    let process_monitor = Arc::new(ProcessMonitor::new());

    let manager = ConnectionManager::with_monitor(
        cfg.tcp.max_connections,
        cfg.connection.cleanup_interval,
        process_monitor.clone(),
    );
    manager.spawn_janitor();

    let registry = Arc::new(HandlerRegistry::new());
    let dispatcher = Arc::new(MessageDispatcher::with_monitor(registry, process_monitor.clone()));

    let l1 = Arc::new(L1Cache::new(
        cfg.cache.l1.shards,
        cfg.cache.l1.max_entries_in_window,
        cfg.cache.l1.hard_max_cache_size,
    ));
    let cache = Arc::new(if cfg.cache.l2.enabled {
        CacheManager::with_monitor(
            l1,
            Arc::new(InMemoryL2::new()),
            CacheManagerConfig {
                l1_enabled: cfg.cache.l1.enabled,
                l2_enabled: true,
                protection: Default::default(),
            },
            process_monitor.clone(),
        )
    } else {
        CacheManager::with_monitor(
            l1,
            Arc::new(DisabledL2),
            CacheManagerConfig {
                l1_enabled: cfg.cache.l1.enabled,
                l2_enabled: false,
                protection: Default::default(),
            },
            process_monitor.clone(),
        )
    });

    let tokens = Arc::new(TokenService::new(cfg.jwt.secret.clone().into_bytes(), cfg.jwt.expire, cfg.jwt.refresh_expire));

    let scheduler = Scheduler::new(cfg.scheduler.queue_size, cfg.scheduler.workers, Arc::new(NoopExecutor));
    scheduler.start().await;

    let routes = core_routes(cache, tokens, scheduler.clone(), process_monitor);
    info!("HTTP contract assembled, not bound to a listener (no framework carried by this core)");
    let _routes = routes;

    let shutdown = CancellationToken::new();
    let scheduler_monitor = SchedulerMonitor::new(scheduler.clone(), cfg.scheduler.monitor_interval);
    let monitor_handle = scheduler_monitor.spawn(shutdown.clone());

    let addr = format!("{}:{}", cfg.tcp.host, cfg.tcp.port);
    let gateway = Arc::new(
        gateway_bind(&addr, manager.clone(), dispatcher, GatewayConfig { accept_deadline: std::time::Duration::from_secs(10), connection_timings: timings })
            .await?,
    );
    info!(addr = %gateway.local_addr()?, "TCP gateway listening");

    let gateway_task = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.run().await })
    };

    signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");

    shutdown.cancel();
    gateway.shutdown().await;
    gateway_task.abort();
    manager.shutdown().await;
    scheduler.stop().await;
    monitor_handle.abort();

    Ok(())
}

async fn gateway_bind(
    addr: &str,
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<MessageDispatcher>,
    config: GatewayConfig,
) -> Result<data_middleware_core::gateway::TcpGateway> {
    data_middleware_core::gateway::TcpGateway::bind(addr, manager, dispatcher, config)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
