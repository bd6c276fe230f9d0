// SPDX-License-Identifier: AGPL-3.0-or-later

//! A decoded `(Header, Body)` pair (§3). Bodies stay as opaque bytes here —
//! per the design-notes guidance, this core does not reinvent a generic
//! reflection layer over request bodies; handlers own the JSON shape for
//! their message types.

use bytes::Bytes;

use crate::protocol::{
    error_envelope::{ErrorEnvelope, TcpErrorCode},
    flags::Flags,
    header::Header,
    message_type::MessageType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub body: Bytes,
}

impl Message {
    pub fn new(header: Header, body: Bytes) -> Self {
        Self { header, body }
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.header.flags)
    }

    /// Builds the response frame the dispatcher sends back for a given
    /// request: `version`, `sequence_id`, `game_id`, `user_id` copied from
    /// the request; `timestamp` set to `now`; body supplied by the caller.
    pub fn response_to(
        request: &Header,
        now: i64,
        message_type: MessageType,
        flags: Flags,
        body: impl Into<Bytes>,
    ) -> Self {
        let body = body.into();
        let header = Header {
            version: request.version,
            message_type: message_type.into(),
            flags: flags.bits(),
            sequence_id: request.sequence_id,
            timestamp: now,
            body_length: body.len() as u32,
            checksum: 0,
            game_id: request.game_id.clone(),
            user_id: request.user_id.clone(),
        };
        Self::new(header, body)
    }

    /// Builds an `Error` response frame for the given request header.
    pub fn error_response(request: &Header, now: i64, code: TcpErrorCode, message: impl Into<String>) -> Self {
        let envelope = ErrorEnvelope::new(code, message);
        Self::response_to(
            request,
            now,
            MessageType::Error,
            Flags::empty(),
            envelope.to_json_bytes(),
        )
    }
}
