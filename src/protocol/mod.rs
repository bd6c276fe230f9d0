// SPDX-License-Identifier: AGPL-3.0-or-later

//! Binary framed wire protocol (C1): header layout, CRC-32 validation,
//! message types and the error envelope carried in `Error` messages.
//!
//! One fixed frame shape carries an opaque body; per-message-type parsing
//! is left to handlers rather than a closed sum type of wire structs.

pub mod codec;
pub mod error_envelope;
pub mod flags;
pub mod header;
pub mod message;
pub mod message_type;

pub use codec::{DecodeOutcome, decode, encode};
pub use error_envelope::{ErrorEnvelope, TcpErrorCode};
pub use flags::Flags;
pub use header::{Header, HEADER_FIXED_LEN, MAX_BODY_LEN, PROTOCOL_VERSION};
pub use message::Message;
pub use message_type::MessageType;
