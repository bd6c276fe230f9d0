// SPDX-License-Identifier: AGPL-3.0-or-later

//! Accept loop (C4, §4.4): hands each socket to the `ConnectionManager`,
//! spawns one read loop and the watchdogs per connection, and shuts down
//! cooperatively via a shared `CancellationToken` so in-flight reads and
//! the accept loop itself unwind on the same signal.

use std::sync::Arc;

use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionTimings, RecvOutcome},
    dispatch::MessageDispatcher,
    error::CoreError,
    manager::ConnectionManager,
};

#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub accept_deadline: std::time::Duration,
    pub connection_timings: ConnectionTimings,
}

pub struct TcpGateway {
    listener: TcpListener,
    manager: Arc<ConnectionManager>,
    dispatcher: Arc<MessageDispatcher>,
    config: GatewayConfig,
    cancel: CancellationToken,
    read_loops: Mutex<Vec<JoinHandle<()>>>,
}

impl TcpGateway {
    pub async fn bind(
        addr: &str,
        manager: Arc<ConnectionManager>,
        dispatcher: Arc<MessageDispatcher>,
        config: GatewayConfig,
    ) -> Result<Self, CoreError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| CoreError::Transport(e.to_string()))?;
        Ok(Self {
            listener,
            manager,
            dispatcher,
            config,
            cancel: CancellationToken::new(),
            read_loops: Mutex::new(Vec::new()),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop until `shutdown()` is called. Each `accept` is
    /// bounded by `accept_deadline` so a quiet listener still notices
    /// cancellation promptly instead of blocking forever.
    pub async fn run(self: &Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("gateway accept loop cancelled");
                    break;
                }
                accepted = tokio::time::timeout(self.config.accept_deadline, self.listener.accept()) => {
                    match accepted {
                        Ok(Ok((socket, peer))) => {
                            debug!(%peer, "accepted connection");
                            self.spawn_connection(socket).await;
                        }
                        Ok(Err(e)) => warn!(error = %e, "accept failed"),
                        Err(_elapsed) => {}
                    }
                }
            }
        }
    }

    async fn spawn_connection(self: &Arc<Self>, socket: tokio::net::TcpStream) {
        let (reader, writer) = socket.into_split();
        let conn = Connection::from_split(reader, writer, self.config.connection_timings);

        let conn = match self.manager.add(conn) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "rejecting connection, manager capacity reached");
                return;
            },
        };

        conn.mark_connected().await;
        conn.spawn_watchdogs();

        let gateway = self.clone();
        let handle = tokio::spawn(async move { gateway.read_loop(conn).await });
        self.read_loops.lock().await.push(handle);
    }

    async fn read_loop(self: Arc<Self>, conn: Arc<Connection>) {
        loop {
            match conn.recv_next().await {
                RecvOutcome::Message(message) => {
                    self.dispatcher.dispatch(&conn, message).await;
                },
                RecvOutcome::Closed => {
                    debug!(connection_id = conn.id(), "read loop exiting");
                    break;
                },
            }
        }
    }

    /// Cancels the accept loop, stops accepting further connections, closes
    /// every live connection via the manager, and joins every read loop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.manager.shutdown().await;
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.read_loops.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}
