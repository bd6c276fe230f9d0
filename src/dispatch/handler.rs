// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-game request handler contract and registry (§4.5).
//!
//! A domain team registers one `Handler` per game id; the dispatcher looks
//! it up by `game_id` and checks `supported_types()` before calling
//! `handle`. This core ships no handlers of its own — every game's CRUD
//! logic lives outside this crate.

use std::collections::HashSet;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::{error::CoreError, protocol::Message, protocol::message_type::MessageType};

#[async_trait]
pub trait Handler: Send + Sync {
    /// Message types this handler accepts; the dispatcher rejects anything
    /// else with error 4005 before ever calling `handle`.
    fn supported_types(&self) -> HashSet<MessageType>;

    /// Produces the JSON response body for `request`. Errors propagate to
    /// the dispatcher, which maps them through `CoreError::tcp_error_code`.
    async fn handle(&self, game_id: &str, request: &Message) -> Result<Bytes, CoreError>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, std::sync::Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, game_id: impl Into<String>, handler: std::sync::Arc<dyn Handler>) {
        self.handlers.insert(game_id.into(), handler);
    }

    pub fn get(&self, game_id: &str) -> Option<std::sync::Arc<dyn Handler>> {
        self.handlers.get(game_id).map(|e| e.value().clone())
    }

    pub fn unregister(&self, game_id: &str) {
        self.handlers.remove(game_id);
    }
}
