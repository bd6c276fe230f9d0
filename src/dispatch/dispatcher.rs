// SPDX-License-Identifier: AGPL-3.0-or-later

//! Routes a decoded `Message` to its handler and replies on the same
//! connection (C5, §4.5).

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::{
    connection::{Connection, ConnectionState},
    dispatch::handler::HandlerRegistry,
    observability::Monitor,
    protocol::{
        Message,
        error_envelope::TcpErrorCode,
        flags::Flags,
        message_type::MessageType,
    },
    utils::now_epoch_secs,
};

pub struct MessageDispatcher {
    registry: Arc<HandlerRegistry>,
    monitor: Arc<Monitor>,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self::with_monitor(registry, Arc::new(Monitor::new()))
    }

    /// Same as `new`, but shares the process-wide `Monitor` so
    /// `requests_total`/`bytes_in_total`/`bytes_out_total` in `/metrics`
    /// reflect real traffic through this dispatcher.
    pub fn with_monitor(registry: Arc<HandlerRegistry>, monitor: Arc<Monitor>) -> Self {
        Self { registry, monitor }
    }

    pub async fn dispatch(&self, conn: &Arc<Connection>, message: Message) {
        let now = now_epoch_secs();
        let bytes_in = message.body.len() as u64;

        let message_type = match MessageType::from_u16(message.header.message_type) {
            Ok(mt) => mt,
            Err(_) => {
                let reply = Message::error_response(
                    &message.header,
                    now,
                    TcpErrorCode::UnknownMessageType,
                    format!("unknown message type code: 0x{:04x}", message.header.message_type),
                );
                let bytes_out = reply.body.len() as u64;
                let _ = conn.send(&reply).await;
                self.monitor.record_request(bytes_in, bytes_out);
                return;
            },
        };

        let bytes_out = match message_type {
            MessageType::Heartbeat => self.handle_heartbeat(conn, &message, now).await,
            MessageType::Handshake => self.handle_handshake(conn, &message, now).await,
            other => self.handle_game_message(conn, &message, other, now).await,
        };
        self.monitor.record_request(bytes_in, bytes_out);
    }

    async fn handle_heartbeat(&self, conn: &Arc<Connection>, message: &Message, now: i64) -> u64 {
        conn.update_heartbeat();
        let reply = Message::response_to(&message.header, now, MessageType::Heartbeat, Flags::empty(), Bytes::new());
        let bytes_out = reply.body.len() as u64;
        let _ = conn.send(&reply).await;
        bytes_out
    }

    async fn handle_handshake(&self, conn: &Arc<Connection>, message: &Message, now: i64) -> u64 {
        let game_id = message.header.game_id.clone();
        let user_id = message.header.user_id.clone();

        if game_id.is_empty() || user_id.is_empty() {
            let reply = Message::error_response(
                &message.header,
                now,
                TcpErrorCode::MissingIdentity,
                "handshake requires non-empty game_id and user_id",
            );
            let bytes_out = reply.body.len() as u64;
            let _ = conn.send(&reply).await;
            return bytes_out;
        }

        match conn.authenticate(game_id, user_id).await {
            Ok(()) => {
                let reply =
                    Message::response_to(&message.header, now, MessageType::Handshake, Flags::empty(), Bytes::new());
                let bytes_out = reply.body.len() as u64;
                let _ = conn.send(&reply).await;
                bytes_out
            },
            Err(e) => {
                let reply = Message::error_response(&message.header, now, e.tcp_error_code(), e.to_string());
                let bytes_out = reply.body.len() as u64;
                let _ = conn.send(&reply).await;
                bytes_out
            },
        }
    }

    async fn handle_game_message(
        &self,
        conn: &Arc<Connection>,
        message: &Message,
        message_type: MessageType,
        now: i64,
    ) -> u64 {
        if conn.state().await != ConnectionState::Authenticated {
            let reply = Message::error_response(
                &message.header,
                now,
                TcpErrorCode::NotAuthenticated,
                "connection is not authenticated",
            );
            let bytes_out = reply.body.len() as u64;
            let _ = conn.send(&reply).await;
            return bytes_out;
        }

        let game_id = message.header.game_id.clone();
        let Some(handler) = self.registry.get(&game_id) else {
            let reply = Message::error_response(
                &message.header,
                now,
                TcpErrorCode::GameNotRegistered,
                format!("no handler registered for game_id {game_id}"),
            );
            let bytes_out = reply.body.len() as u64;
            let _ = conn.send(&reply).await;
            return bytes_out;
        };

        if !handler.supported_types().contains(&message_type) {
            let reply = Message::error_response(
                &message.header,
                now,
                TcpErrorCode::UnsupportedType,
                format!("handler for {game_id} does not support this message type"),
            );
            let bytes_out = reply.body.len() as u64;
            let _ = conn.send(&reply).await;
            return bytes_out;
        }

        match handler.handle(&game_id, message).await {
            Ok(body) => {
                let reply = Message::response_to(&message.header, now, message_type, Flags::empty(), body);
                let bytes_out = reply.body.len() as u64;
                let _ = conn.send(&reply).await;
                bytes_out
            },
            Err(e) => {
                debug!(%game_id, error = %e, "handler returned an error");
                let reply = Message::error_response(&message.header, now, e.tcp_error_code(), e.to_string());
                let bytes_out = reply.body.len() as u64;
                let _ = conn.send(&reply).await;
                bytes_out
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use async_trait::async_trait;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::{
        connection::ConnectionTimings,
        dispatch::handler::Handler,
        error::CoreError,
        protocol::header::Header,
    };
    use std::time::Duration;

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

    async fn connected_pair() -> (Arc<Connection>, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, _) = listener.accept().await.expect("accept");
        let (r, w) = server.into_split();
        let conn = Connection::from_split(r, w, timings());
        conn.mark_connected().await;
        (conn, client)
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn supported_types(&self) -> HashSet<MessageType> {
            HashSet::from([MessageType::PlayerData])
        }

        async fn handle(&self, _game_id: &str, request: &Message) -> Result<Bytes, CoreError> {
            Ok(request.body.clone())
        }
    }

    fn request(message_type: MessageType, game_id: &str, user_id: &str, body: &[u8]) -> Message {
        let header = Header::new(message_type, 0, 1, 0, body.len() as u32, game_id, user_id);
        Message::new(header, Bytes::copy_from_slice(body))
    }

    #[tokio::test]
    async fn unauthenticated_game_message_is_rejected() {
        let (conn, _client) = connected_pair().await;
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("chess", Arc::new(EchoHandler));
        let dispatcher = MessageDispatcher::new(registry);

        dispatcher
            .dispatch(&conn, request(MessageType::PlayerData, "chess", "alice", b"{}"))
            .await;
        // No handler call should have happened; state is unchanged.
        assert_eq!(conn.state().await, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn handshake_then_game_message_reaches_handler() {
        let (conn, _client) = connected_pair().await;
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("chess", Arc::new(EchoHandler));
        let dispatcher = MessageDispatcher::new(registry);

        dispatcher
            .dispatch(&conn, request(MessageType::Handshake, "chess", "alice", b""))
            .await;
        assert_eq!(conn.state().await, ConnectionState::Authenticated);

        dispatcher
            .dispatch(&conn, request(MessageType::PlayerData, "chess", "alice", b"{\"x\":1}"))
            .await;
        assert_eq!(conn.state().await, ConnectionState::Authenticated);
    }

    #[tokio::test]
    async fn dispatch_feeds_the_shared_monitor() {
        let (conn, _client) = connected_pair().await;
        let registry = Arc::new(HandlerRegistry::new());
        registry.register("chess", Arc::new(EchoHandler));
        let monitor = Arc::new(Monitor::new());
        let dispatcher = MessageDispatcher::with_monitor(registry, monitor.clone());

        dispatcher
            .dispatch(&conn, request(MessageType::Handshake, "chess", "alice", b""))
            .await;
        dispatcher
            .dispatch(&conn, request(MessageType::PlayerData, "chess", "alice", b"{\"x\":1}"))
            .await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert!(snapshot.bytes_in_total > 0);
        assert!(snapshot.bytes_out_total > 0);
    }

    #[tokio::test]
    async fn missing_handler_yields_game_not_registered() {
        let (conn, _client) = connected_pair().await;
        let registry = Arc::new(HandlerRegistry::new());
        let dispatcher = MessageDispatcher::new(registry);

        dispatcher
            .dispatch(&conn, request(MessageType::Handshake, "chess", "alice", b""))
            .await;
        dispatcher
            .dispatch(&conn, request(MessageType::PlayerData, "go", "alice", b"{}"))
            .await;
        // Authenticated under "chess"; "go" has no registered handler, but
        // dispatch must not panic and the connection stays open.
        assert_eq!(conn.state().await, ConnectionState::Authenticated);
    }
}
