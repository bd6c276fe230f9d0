// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON body carried by `MessageType::Error` frames, and the standard TCP
//! error codes from §6.1.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpErrorCode {
    /// Missing game/user id.
    MissingIdentity,
    /// Not authenticated.
    NotAuthenticated,
    /// Unknown message type.
    UnknownMessageType,
    /// Game not registered.
    GameNotRegistered,
    /// Handler does not support this message type.
    UnsupportedType,
    /// No dedicated code; carries the underlying message verbatim.
    Generic,
}

impl TcpErrorCode {
    pub fn code(self) -> u32 {
        match self {
            TcpErrorCode::MissingIdentity => 4001,
            TcpErrorCode::NotAuthenticated => 4002,
            TcpErrorCode::UnknownMessageType => 4003,
            TcpErrorCode::GameNotRegistered => 4004,
            TcpErrorCode::UnsupportedType => 4005,
            TcpErrorCode::Generic => 2001,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: u32,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(code: TcpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
        }
    }

    pub fn to_json_bytes(&self) -> Vec<u8> {
        // `ErrorEnvelope` serializes to a plain JSON object; this cannot fail.
        serde_json::to_vec(self).unwrap_or_else(|_| b"{\"code\":5000,\"message\":\"\"}".to_vec())
    }
}
