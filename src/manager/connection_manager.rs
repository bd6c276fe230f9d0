// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owns the set of live connections (C3, §4.3): enforces the connection
//! cap, keeps per-game and per-user indexes, broadcasts, and janitors
//! closed entries. A flat `DashMap<connection_id, Arc<Connection>>` with
//! two derived per-game and per-user indexes, rather than a nested
//! two-level keyspace.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, DashSet};
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{Connection, ConnectionState},
    error::CoreError,
    observability::Monitor,
    protocol::Message,
};

#[derive(Debug, Clone, Default)]
pub struct ConnectionManagerStats {
    pub total: usize,
    pub by_state: Vec<(&'static str, usize)>,
    pub games: usize,
    pub users: usize,
}

pub struct ConnectionManager {
    connections: DashMap<String, Arc<Connection>>,
    by_game: DashMap<String, DashSet<String>>,
    by_user: DashMap<String, DashSet<String>>,
    max_connections: usize,
    current_count: AtomicUsize,
    shutting_down: AtomicBool,
    cleanup_interval: Duration,
    cancel: CancellationToken,
    self_weak: OnceCell<Weak<ConnectionManager>>,
    monitor: Arc<Monitor>,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, cleanup_interval: Duration) -> Arc<Self> {
        Self::with_monitor(max_connections, cleanup_interval, Arc::new(Monitor::new()))
    }

    /// Same as `new`, but shares the process-wide `Monitor` so
    /// `active_connections` in `/metrics` reflects this manager's
    /// bookkeeping instead of a private counter nobody reads.
    pub fn with_monitor(max_connections: usize, cleanup_interval: Duration, monitor: Arc<Monitor>) -> Arc<Self> {
        let manager = Arc::new(Self {
            connections: DashMap::new(),
            by_game: DashMap::new(),
            by_user: DashMap::new(),
            max_connections,
            current_count: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
            cleanup_interval,
            cancel: CancellationToken::new(),
            self_weak: OnceCell::new(),
            monitor,
        });
        let _ = manager.self_weak.set(Arc::downgrade(&manager));
        manager
    }

    /// Registers `conn`, rejecting it once `max_connections` live entries
    /// are already held. Safe under concurrent callers: the slot is
    /// reserved with a compare-and-swap loop before the entry is inserted,
    /// so the cap is never exceeded even momentarily (P8).
    pub fn add(&self, conn: Arc<Connection>) -> Result<Arc<Connection>, CoreError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(CoreError::Capacity("connection manager is shutting down".into()));
        }

        loop {
            let current = self.current_count.load(Ordering::Acquire);
            if current >= self.max_connections {
                return Err(CoreError::Capacity(format!(
                    "connection cap reached ({current}/{})",
                    self.max_connections
                )));
            }
            if self
                .current_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        if let Some(weak) = self.self_weak.get() {
            conn.bind_manager(weak.clone());
        }
        self.connections.insert(conn.id().to_string(), conn.clone());
        self.monitor.connection_opened();
        Ok(conn)
    }

    /// Idempotent.
    pub fn remove(&self, connection_id: &str) {
        if let Some((_, conn)) = self.connections.remove(connection_id) {
            self.current_count.fetch_sub(1, Ordering::AcqRel);
            self.deindex(connection_id, &conn);
            self.monitor.connection_closed();
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(connection_id).map(|e| e.value().clone())
    }

    pub fn by_game(&self, game_id: &str) -> Vec<Arc<Connection>> {
        let Some(ids) = self.by_game.get(game_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get(&id)).collect()
    }

    pub fn by_user(&self, user_id: &str) -> Vec<Arc<Connection>> {
        let Some(ids) = self.by_user.get(user_id) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get(&id)).collect()
    }

    /// Called by `Connection::authenticate` once a handshake succeeds, to
    /// keep the derived indexes consistent with the live identity.
    pub fn index_authenticated(&self, connection_id: &str, game_id: &str, user_id: &str) {
        self.by_game
            .entry(game_id.to_string())
            .or_insert_with(DashSet::new)
            .insert(connection_id.to_string());
        self.by_user
            .entry(user_id.to_string())
            .or_insert_with(DashSet::new)
            .insert(connection_id.to_string());
    }

    fn deindex(&self, connection_id: &str, conn: &Arc<Connection>) {
        // `identity()` requires an async lock; reaching for `try_read`-style
        // access here would need an async fn, so the indexes are scrubbed by
        // connection id across every game/user bucket. Buckets are small in
        // practice (one entry per live connection) so this stays cheap.
        let _ = conn;
        for mut entry in self.by_game.iter_mut() {
            entry.value_mut().remove(connection_id);
        }
        for mut entry in self.by_user.iter_mut() {
            entry.value_mut().remove(connection_id);
        }
    }

    /// Best-effort: per-connection send errors are logged but do not abort
    /// the broadcast.
    pub async fn broadcast_game(&self, game_id: &str, message: &Message) -> usize {
        let mut delivered = 0;
        for conn in self.by_game(game_id) {
            match conn.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection_id = conn.id(), error = %e, "broadcast_game send failed"),
            }
        }
        delivered
    }

    pub async fn broadcast_user(&self, user_id: &str, message: &Message) -> usize {
        let mut delivered = 0;
        for conn in self.by_user(user_id) {
            match conn.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(connection_id = conn.id(), error = %e, "broadcast_user send failed"),
            }
        }
        delivered
    }

    pub async fn stats(&self) -> ConnectionManagerStats {
        let mut counts = [0usize; 5];
        for entry in self.connections.iter() {
            let idx = match entry.value().state().await {
                ConnectionState::Connecting => 0,
                ConnectionState::Connected => 1,
                ConnectionState::Authenticated => 2,
                ConnectionState::Closing => 3,
                ConnectionState::Closed => 4,
            };
            counts[idx] += 1;
        }
        ConnectionManagerStats {
            total: self.connections.len(),
            by_state: vec![
                ("connecting", counts[0]),
                ("connected", counts[1]),
                ("authenticated", counts[2]),
                ("closing", counts[3]),
                ("closed", counts[4]),
            ],
            games: self.by_game.len(),
            users: self.by_user.len(),
        }
    }

    /// Spawns the janitor: every `cleanup_interval`, drops entries whose
    /// state is `Closed`.
    pub fn spawn_janitor(self: &Arc<Self>) {
        if self.cleanup_interval.is_zero() {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.cancel.cancelled() => break,
                    _ = tokio::time::sleep(manager.cleanup_interval) => {},
                }
                let closed: Vec<String> = {
                    let mut ids = Vec::new();
                    for entry in manager.connections.iter() {
                        if entry.value().state().await == ConnectionState::Closed {
                            ids.push(entry.key().clone());
                        }
                    }
                    ids
                };
                for id in &closed {
                    manager.remove(id);
                }
                if !closed.is_empty() {
                    debug!(swept = closed.len(), "janitor swept closed connections");
                }
            }
        });
    }

    /// Refuses new `add`, closes every live connection, then clears the
    /// maps. Does not wait for accept-loop or read-loop tasks to join —
    /// callers that own those tasks (the gateway) are responsible for that.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.cancel.cancel();

        let all: Vec<Arc<Connection>> = self.connections.iter().map(|e| e.value().clone()).collect();
        for conn in &all {
            conn.close().await;
            self.monitor.connection_closed();
        }
        self.connections.clear();
        self.by_game.clear();
        self.by_user.clear();
        self.current_count.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::connection::ConnectionTimings;

    fn timings() -> ConnectionTimings {
        ConnectionTimings {
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            buffer_size: 4096,
            heartbeat_enabled: false,
            heartbeat_interval: Duration::from_secs(0),
            heartbeat_timeout: Duration::from_secs(0),
            max_missed_heartbeats: 3,
            idle_timeout: Duration::from_secs(0),
        }
    }

    async fn new_connection() -> Arc<Connection> {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let _client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        let (r, w) = server.into_split();
        Connection::from_split(r, w, timings())
    }

    #[tokio::test]
    async fn cap_is_never_exceeded_under_concurrent_add() {
        let manager = ConnectionManager::new(4, Duration::from_secs(0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let conn = new_connection().await;
                manager.add(conn).is_ok()
            }));
        }
        let mut accepted = 0;
        for h in handles {
            if h.await.expect("join") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
        assert_eq!(manager.stats().await.total, 4);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let manager = ConnectionManager::new(4, Duration::from_secs(0));
        let conn = new_connection().await;
        let id = conn.id().to_string();
        manager.add(conn).expect("add");
        manager.remove(&id);
        manager.remove(&id);
        assert_eq!(manager.stats().await.total, 0);
    }

    #[tokio::test]
    async fn add_and_remove_feed_the_shared_monitor() {
        let monitor = Arc::new(Monitor::new());
        let manager = ConnectionManager::with_monitor(4, Duration::from_secs(0), monitor.clone());
        let conn = new_connection().await;
        let id = conn.id().to_string();
        manager.add(conn).expect("add");
        assert_eq!(monitor.snapshot().active_connections, 1);

        manager.remove(&id);
        assert_eq!(monitor.snapshot().active_connections, 0);
    }
}
