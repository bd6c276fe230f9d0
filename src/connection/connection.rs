// SPDX-License-Identifier: AGPL-3.0-or-later

//! One TCP peer (§3, §4.2): send/receive loop, heartbeat/idle watchdogs,
//! reassembly buffer, state machine, counters.
//!
//! A plain bidirectional framed stream: no per-request tag matching is
//! needed here because the dispatcher replies directly on the connection
//! rather than waiting on a tagged response.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use bytes::BytesMut;
use once_cell::sync::OnceCell;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    connection::{common::io_with_timeout, state::ConnectionState},
    error::CoreError,
    manager::ConnectionManager,
    protocol::{Message, codec, codec::DecodeOutcome},
    utils::{generate_connection_id, now_epoch_secs},
};

/// Timeouts and buffer sizing a `Connection` is built with, taken verbatim
/// from the `tcp`/`heartbeat`/`connection` config sections.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionTimings {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub max_missed_heartbeats: u32,
    pub idle_timeout: Duration,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionCounters {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub messages_in: u64,
    pub messages_out: u64,
}

/// What `recv_next` observed.
pub enum RecvOutcome {
    Message(Message),
    Closed,
}

/// Threshold from §7's protocol error taxonomy: a connection is closed once
/// it has produced this many decode errors (other than `NeedMore`) within
/// its lifetime.
const MAX_PROTOCOL_OFFENSES: u32 = 3;

pub struct Connection {
    id: String,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    state: Mutex<ConnectionState>,
    reassembly: Mutex<BytesMut>,
    identity: Mutex<(String, String)>,
    connected_at: i64,
    last_activity: AtomicI64,
    last_heartbeat: AtomicI64,
    missed_heartbeats: AtomicU32,
    protocol_offenses: AtomicU32,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    messages_in: AtomicU64,
    messages_out: AtomicU64,
    timings: ConnectionTimings,
    cancel: CancellationToken,
    close_started: AtomicBool,
    // Weak back-reference so closing a connection can deregister itself
    // from its manager without an owning cycle — the same shape as the
    // teacher's `SessionRef { pool: Weak<Pool>, .. }`.
    manager: OnceCell<Weak<ConnectionManager>>,
}

impl Connection {
    pub fn from_split(reader: OwnedReadHalf, writer: OwnedWriteHalf, timings: ConnectionTimings) -> Arc<Self> {
        let now = now_epoch_secs();
        Arc::new(Self {
            id: generate_connection_id(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            state: Mutex::new(ConnectionState::Connecting),
            reassembly: Mutex::new(BytesMut::with_capacity(timings.buffer_size)),
            identity: Mutex::new((String::new(), String::new())),
            connected_at: now,
            last_activity: AtomicI64::new(now),
            last_heartbeat: AtomicI64::new(now),
            missed_heartbeats: AtomicU32::new(0),
            protocol_offenses: AtomicU32::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            messages_in: AtomicU64::new(0),
            messages_out: AtomicU64::new(0),
            timings,
            cancel: CancellationToken::new(),
            close_started: AtomicBool::new(false),
            manager: OnceCell::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }

    pub fn last_heartbeat(&self) -> i64 {
        self.last_heartbeat.load(Ordering::Relaxed)
    }

    pub fn counters(&self) -> ConnectionCounters {
        ConnectionCounters {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            messages_out: self.messages_out.load(Ordering::Relaxed),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    pub async fn identity(&self) -> (String, String) {
        self.identity.lock().await.clone()
    }

    /// Binds the manager this connection belongs to; must be called once,
    /// right after the manager accepts it, so `close()` and `authenticate()`
    /// can keep the manager's indexes consistent.
    pub fn bind_manager(&self, manager: Weak<ConnectionManager>) {
        let _ = self.manager.set(manager);
    }

    /// Moves a freshly accepted connection out of `Connecting`.
    pub async fn mark_connected(&self) {
        let mut state = self.state.lock().await;
        if state.can_advance_to(ConnectionState::Connected) {
            *state = ConnectionState::Connected;
        }
    }

    /// Valid only from `Connected`; transitions to `Authenticated`.
    /// Idempotent when re-called with the same `(game_id, user_id)`.
    pub async fn authenticate(&self, game_id: impl Into<String>, user_id: impl Into<String>) -> Result<(), CoreError> {
        let game_id = game_id.into();
        let user_id = user_id.into();
        if game_id.is_empty() || user_id.is_empty() {
            return Err(CoreError::Authentication("missing game_id or user_id".into()));
        }

        {
            let state = self.state.lock().await;
            match *state {
                ConnectionState::Connected => {},
                ConnectionState::Authenticated => {
                    drop(state);
                    let identity = self.identity.lock().await;
                    if identity.0 == game_id && identity.1 == user_id {
                        return Ok(());
                    }
                    return Err(CoreError::Authentication(
                        "connection already authenticated under a different identity".into(),
                    ));
                },
                _ => {
                    return Err(CoreError::Authentication(
                        "authenticate() requires the Connected state".into(),
                    ));
                },
            }
        }

        *self.identity.lock().await = (game_id.clone(), user_id.clone());
        *self.state.lock().await = ConnectionState::Authenticated;

        if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
            manager.index_authenticated(&self.id, &game_id, &user_id);
        }
        Ok(())
    }

    pub fn update_heartbeat(&self) {
        self.last_heartbeat.store(now_epoch_secs(), Ordering::Relaxed);
        self.missed_heartbeats.store(0, Ordering::Relaxed);
    }

    /// Serializes `message` with the codec and writes it under the write
    /// deadline. Any I/O error flags the connection for close.
    pub async fn send(&self, message: &Message) -> Result<(), CoreError> {
        if self.cancel.is_cancelled() {
            return Err(CoreError::Transport("connection is closed".into()));
        }
        let encoded = codec::encode(message);
        let write_result = {
            let mut w = self.writer.lock().await;
            io_with_timeout("write", w.write_all(&encoded), self.timings.write_timeout, &self.cancel).await
        };

        match write_result {
            Ok(()) => {
                self.bytes_out.fetch_add(encoded.len() as u64, Ordering::Relaxed);
                self.messages_out.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                debug!(connection_id = %self.id, error = %e, "write failed, closing connection");
                self.close().await;
                Err(CoreError::Transport(e.to_string()))
            },
        }
    }

    /// Loops: decode a full frame from the reassembly buffer if one is
    /// already there; otherwise read more bytes and retry. Returns `Closed`
    /// on peer FIN or any fatal error, after closing the connection.
    pub async fn recv_next(&self) -> RecvOutcome {
        loop {
            {
                let mut buf = self.reassembly.lock().await;
                match codec::decode(&buf) {
                    DecodeOutcome::Decoded { message, consumed } => {
                        let _ = buf.split_to(consumed);
                        drop(buf);
                        self.last_activity.store(now_epoch_secs(), Ordering::Relaxed);
                        self.messages_in.fetch_add(1, Ordering::Relaxed);
                        self.bytes_in.fetch_add(consumed as u64, Ordering::Relaxed);
                        return RecvOutcome::Message(message);
                    },
                    DecodeOutcome::ChecksumMismatch { consumed } => {
                        let _ = buf.split_to(consumed);
                        drop(buf);
                        warn!(connection_id = %self.id, "checksum mismatch, discarding frame");
                        let offenses = self.protocol_offenses.fetch_add(1, Ordering::Relaxed) + 1;
                        if offenses >= MAX_PROTOCOL_OFFENSES {
                            warn!(connection_id = %self.id, offenses, "repeated protocol errors, closing");
                            self.close().await;
                            return RecvOutcome::Closed;
                        }
                    },
                    DecodeOutcome::Malformed { reason } => {
                        drop(buf);
                        debug!(connection_id = %self.id, %reason, "malformed frame, closing");
                        self.close().await;
                        return RecvOutcome::Closed;
                    },
                    DecodeOutcome::UnsupportedVersion { version, .. } => {
                        drop(buf);
                        debug!(connection_id = %self.id, version, "unsupported protocol version, closing");
                        self.close().await;
                        return RecvOutcome::Closed;
                    },
                    DecodeOutcome::NeedMore => {},
                }
            }

            let mut chunk = vec![0u8; self.timings.buffer_size];
            let read_result = {
                let mut r = self.reader.lock().await;
                io_with_timeout("read", r.read(&mut chunk), self.timings.read_timeout, &self.cancel).await
            };

            match read_result {
                Ok(0) => {
                    debug!(connection_id = %self.id, "peer closed the connection");
                    self.close().await;
                    return RecvOutcome::Closed;
                },
                Ok(n) => {
                    self.reassembly.lock().await.extend_from_slice(&chunk[..n]);
                },
                Err(e) => {
                    debug!(connection_id = %self.id, error = %e, "read error, closing connection");
                    self.close().await;
                    return RecvOutcome::Closed;
                },
            }
        }
    }

    /// Idempotent: the underlying socket is shut down and the state
    /// transitions to `Closed` exactly once, regardless of how many
    /// concurrent or sequential callers invoke this.
    pub async fn close(&self) {
        if self.close_started.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }

        *self.state.lock().await = ConnectionState::Closing;
        self.cancel.cancel();
        {
            let mut w = self.writer.lock().await;
            let _ = w.shutdown().await;
        }
        *self.state.lock().await = ConnectionState::Closed;

        if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
            manager.remove(&self.id);
        }
    }

    /// Launches the heartbeat and idle watchdogs. Both exit at their next
    /// tick once `close()` cancels the connection's token.
    pub fn spawn_watchdogs(self: &Arc<Self>) {
        self.clone().spawn_heartbeat_watchdog();
        self.clone().spawn_idle_watchdog();
    }

    fn spawn_heartbeat_watchdog(self: Arc<Self>) {
        if !self.timings.heartbeat_enabled || self.timings.heartbeat_interval.is_zero() {
            return;
        }
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.timings.heartbeat_interval) => {},
                }
                if self.cancel.is_cancelled() {
                    break;
                }
                let elapsed = now_epoch_secs().saturating_sub(self.last_heartbeat.load(Ordering::Relaxed));
                if elapsed >= 0 && elapsed as u64 > self.timings.heartbeat_timeout.as_secs() {
                    let missed = self.missed_heartbeats.fetch_add(1, Ordering::Relaxed) + 1;
                    if missed >= self.timings.max_missed_heartbeats {
                        warn!(connection_id = %self.id, missed, "missed heartbeat threshold reached, closing");
                        self.close().await;
                        break;
                    }
                }
            }
        });
    }

    fn spawn_idle_watchdog(self: Arc<Self>) {
        if self.timings.idle_timeout.is_zero() {
            return;
        }
        let tick = self.timings.idle_timeout / 4;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = tokio::time::sleep(tick) => {},
                }
                if self.cancel.is_cancelled() {
                    break;
                }
                let elapsed = now_epoch_secs().saturating_sub(self.last_activity.load(Ordering::Relaxed));
                if elapsed >= 0 && elapsed as u64 > self.timings.idle_timeout.as_secs() {
                    debug!(connection_id = %self.id, "idle timeout reached, closing");
                    self.close().await;
                    break;
                }
            }
        });
    }
}
