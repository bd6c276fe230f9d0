// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-cutting error taxonomy shared by every component.
//!
//! Individual components (codec, cache, tasks, auth) define their own leaf
//! `thiserror` enums; [`CoreError`] is the taxonomy those leaves collapse
//! into at a request boundary (the TCP dispatcher or an HTTP handler), per
//! the error-kind table in the design documentation.

use thiserror::Error;

use crate::protocol::error_envelope::TcpErrorCode;

/// One of the nine error kinds a request boundary can surface.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Socket-level failure; always recovered by closing the connection.
    #[error("transport error: {0}")]
    Transport(String),

    /// Framing, version or checksum violation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing/invalid/expired token, or handshake without game/user id.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed request body.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No handler for a game, or no cache entry for a key.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Connection cap or queue-full backpressure.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// L2 cache or an external domain service is unreachable.
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// Recovered panic or other unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),
}

/// HTTP status code a [`CoreError`] maps to, per the §7 range table.
impl CoreError {
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Transport(_) => 500,
            CoreError::Protocol(_) => 400,
            CoreError::Authentication(_) => 401,
            CoreError::Validation(_) => 400,
            CoreError::NotFound(_) => 404,
            CoreError::Conflict(_) => 400,
            CoreError::Capacity(_) => 429,
            CoreError::Dependency(_) => 500,
            CoreError::Internal(_) => 500,
        }
    }

    /// TCP error envelope code, per §6.1's standard code list. `None` means
    /// "this kind has no dedicated TCP code and should be surfaced as a
    /// generic 2001 error with the message preserved."
    pub fn tcp_error_code(&self) -> TcpErrorCode {
        match self {
            CoreError::Authentication(_) => TcpErrorCode::NotAuthenticated,
            CoreError::Validation(_) => TcpErrorCode::UnknownMessageType,
            CoreError::NotFound(_) => TcpErrorCode::GameNotRegistered,
            _ => TcpErrorCode::Generic,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
