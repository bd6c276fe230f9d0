// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end scenarios 1-3 against a real `Connection` pair over a loopback
//! `TcpStream`, driven through `MessageDispatcher` exactly as the gateway's
//! accept loop would. No handler logic beyond a test-double `ItemHandler`.

use std::{collections::HashSet, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use data_middleware_core::{
    connection::{Connection, ConnectionState, ConnectionTimings, RecvOutcome},
    dispatch::{Handler, HandlerRegistry, MessageDispatcher},
    error::CoreError,
    protocol::{DecodeOutcome, ErrorEnvelope, Flags, Header, Message, MessageType, decode, encode},
    utils::now_epoch_secs,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

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
    let addr = listener.local_addr().expect("local addr");
    let client = TcpStream::connect(addr).await.expect("connect");
    let (server, _) = listener.accept().await.expect("accept");
    let (r, w) = server.into_split();
    let conn = Connection::from_split(r, w, timings());
    conn.mark_connected().await;
    (conn, client)
}

async fn write_frame(client: &mut TcpStream, message: &Message) {
    client.write_all(&encode(message)).await.expect("write frame");
}

/// Reads exactly one frame from `client`, growing the read buffer as needed.
async fn read_frame(client: &mut TcpStream) -> Message {
    let mut buf = Vec::new();
    loop {
        match decode(&buf) {
            DecodeOutcome::Decoded { message, .. } => return message,
            DecodeOutcome::NeedMore => {},
            other => panic!("unexpected decode outcome while reading reply: {other:?}"),
        }
        let mut chunk = [0u8; 1024];
        let n = client.read(&mut chunk).await.expect("read reply");
        assert!(n > 0, "peer closed before a full frame arrived");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn request(message_type: MessageType, flags: Flags, seq: u32, game_id: &str, user_id: &str, body: &[u8]) -> Message {
    let header = Header::new(message_type, flags.bits(), seq, now_epoch_secs(), body.len() as u32, game_id, user_id);
    Message::new(header, Bytes::copy_from_slice(body))
}

struct ItemHandler;

#[async_trait]
impl Handler for ItemHandler {
    fn supported_types(&self) -> HashSet<MessageType> {
        HashSet::from([MessageType::ItemOperation])
    }

    async fn handle(&self, _game_id: &str, request: &Message) -> Result<Bytes, CoreError> {
        Ok(request.body.clone())
    }
}

#[tokio::test]
async fn scenario_1_heartbeat_round_trip() {
    let (conn, mut client) = connected_pair().await;
    let registry = Arc::new(HandlerRegistry::new());
    let dispatcher = MessageDispatcher::new(registry);

    let req = request(MessageType::Heartbeat, Flags::NEED_RESPONSE, 42, "g1", "u1", b"");
    write_frame(&mut client, &req).await;

    let decoded = conn.recv_next().await;
    let RecvOutcome::Message(message) = decoded else {
        panic!("expected a decoded message");
    };
    dispatcher.dispatch(&conn, message).await;

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_type, u16::from(MessageType::Heartbeat));
    assert_eq!(reply.header.sequence_id, 42);
    assert!(reply.body.is_empty());

    let now = now_epoch_secs();
    assert!((now - conn.last_heartbeat()).abs() <= 2);
}

#[tokio::test]
async fn scenario_2_handshake_then_authenticated_request() {
    let (conn, mut client) = connected_pair().await;
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("g1", Arc::new(ItemHandler));
    let dispatcher = MessageDispatcher::new(registry);

    let handshake = request(MessageType::Handshake, Flags::empty(), 1, "g1", "u1", b"");
    write_frame(&mut client, &handshake).await;
    let RecvOutcome::Message(message) = conn.recv_next().await else {
        panic!("expected a decoded handshake");
    };
    dispatcher.dispatch(&conn, message).await;

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_type, u16::from(MessageType::Handshake));
    assert_eq!(conn.state().await, ConnectionState::Authenticated);

    let body = br#"{"operation":"create","name":"sword","type":"equipment","category":"weapon","quantity":1}"#;
    let item_req = request(MessageType::ItemOperation, Flags::empty(), 2, "g1", "u1", body);
    write_frame(&mut client, &item_req).await;
    let RecvOutcome::Message(message) = conn.recv_next().await else {
        panic!("expected a decoded item operation");
    };
    dispatcher.dispatch(&conn, message).await;

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_type, u16::from(MessageType::ItemOperation));
    assert_eq!(&reply.body[..], &body[..]);
}

#[tokio::test]
async fn scenario_3_unauthenticated_request_is_rejected_but_connection_stays_open() {
    let (conn, mut client) = connected_pair().await;
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("g1", Arc::new(ItemHandler));
    let dispatcher = MessageDispatcher::new(registry);

    let item_req = request(MessageType::ItemOperation, Flags::empty(), 1, "g1", "u1", b"{}");
    write_frame(&mut client, &item_req).await;
    let RecvOutcome::Message(message) = conn.recv_next().await else {
        panic!("expected a decoded item operation");
    };
    dispatcher.dispatch(&conn, message).await;

    let reply = read_frame(&mut client).await;
    assert_eq!(reply.header.message_type, u16::from(MessageType::Error));
    let envelope: ErrorEnvelope = serde_json::from_slice(&reply.body).expect("error envelope");
    assert_eq!(envelope.code, 4002);
    assert_eq!(conn.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn scenario_4_two_heartbeats_spliced_across_writes_decode_in_order() {
    let (conn, mut client) = connected_pair().await;

    let m1 = request(MessageType::Heartbeat, Flags::NEED_RESPONSE, 1, "g1", "u1", b"");
    let m2 = request(MessageType::Heartbeat, Flags::NEED_RESPONSE, 2, "g1", "u1", b"");
    let mut stream = encode(&m1).to_vec();
    stream.extend_from_slice(&encode(&m2));

    let (first, rest) = stream.split_at(5);
    let (second, third) = rest.split_at(40);
    for chunk in [first, second, third] {
        client.write_all(chunk).await.expect("write chunk");
        client.flush().await.expect("flush chunk");
    }

    let RecvOutcome::Message(first) = conn.recv_next().await else {
        panic!("expected first heartbeat");
    };
    let RecvOutcome::Message(second) = conn.recv_next().await else {
        panic!("expected second heartbeat");
    };
    assert_eq!(first.header.sequence_id, 1);
    assert_eq!(second.header.sequence_id, 2);
}
