// SPDX-License-Identifier: AGPL-3.0-or-later

//! Fixed-layout frame header (§4.1).
//!
//! ```text
//! [ver:1][type:2][flags:1][seq:4][ts:8][body_len:4][checksum:4]
//! [game_id_len:2][user_id_len:2][game_id:game_id_len][user_id:user_id_len]
//! ```
//!
//! All integers are big-endian. `game_id`/`user_id` trail the 28-byte fixed
//! prefix; the body trails those: a fixed prefix followed by two
//! length-prefixed variable segments, then the body.

use crate::protocol::message_type::MessageType;

/// Size in bytes of the fixed-layout portion of the header, i.e. everything
/// up to and including `user_id_len`.
pub const HEADER_FIXED_LEN: usize = 1 + 2 + 1 + 4 + 8 + 4 + 4 + 2 + 2;

/// The only wire version this implementation speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Enforced upper bound on `body_len` (§4.1 recommends 16 MiB).
pub const MAX_BODY_LEN: u32 = 16 * 1024 * 1024;

/// Enforced upper bound on each length-prefixed identifier.
pub const MAX_ID_LEN: u16 = u16::MAX;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub message_type: u16,
    pub flags: u8,
    pub sequence_id: u32,
    pub timestamp: i64,
    pub body_length: u32,
    pub checksum: u32,
    pub game_id: String,
    pub user_id: String,
}

impl Header {
    /// Builds a header for a freshly constructed outbound message. The
    /// checksum is left at `0`; [`crate::protocol::codec::encode`] fills it
    /// in once the full frame bytes are known.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        message_type: MessageType,
        flags: u8,
        sequence_id: u32,
        timestamp: i64,
        body_length: u32,
        game_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_type: message_type.into(),
            flags,
            sequence_id,
            timestamp,
            body_length,
            checksum: 0,
            game_id: game_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Total on-wire length of the frame this header describes.
    pub fn total_frame_len(&self) -> usize {
        HEADER_FIXED_LEN
            + self.game_id.len()
            + self.user_id.len()
            + self.body_length as usize
    }
}
