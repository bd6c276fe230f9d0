// SPDX-License-Identifier: AGPL-3.0-or-later

//! Encode/decode of framed messages (§4.1), with an explicit `consumed`
//! count so the caller owns stream reassembly (§3, P1–P3).
//!
//! Checksum is CRC-32/ISO-HDLC (the common "CRC-32", e.g. zlib/gzip),
//! computed over the whole frame with the 4 checksum bytes zeroed.

use bytes::{Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};

use crate::protocol::{
    header::{Header, HEADER_FIXED_LEN, MAX_BODY_LEN, MAX_ID_LEN, PROTOCOL_VERSION},
    message::Message,
};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Offset of the 4-byte checksum field within the fixed header prefix.
const CHECKSUM_OFFSET: usize = 1 + 2 + 1 + 4 + 8 + 4;

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The buffer does not yet contain a full frame; call again once more
    /// bytes have arrived. No bytes should be consumed.
    NeedMore,
    /// A full, checksum-valid, v1 frame was decoded.
    Decoded { message: Message, consumed: usize },
    /// Declared lengths are internally consistent but the checksum does not
    /// match. The caller must discard exactly `consumed` bytes and resync.
    ChecksumMismatch { consumed: usize },
    /// Declared lengths are untrustworthy (e.g. `body_len` exceeds the
    /// enforced cap) — the frame cannot be safely skipped by `consumed`
    /// bytes; the caller should treat this as a fatal protocol error.
    Malformed { reason: String },
    /// The frame is well-formed and checksum-valid but declares a version
    /// this implementation does not speak.
    UnsupportedVersion { version: u8, consumed: usize },
}

/// Encodes `message` into a ready-to-send frame, computing and filling in
/// the checksum field.
pub fn encode(message: &Message) -> Bytes {
    let h = &message.header;
    let game_id = h.game_id.as_bytes();
    let user_id = h.user_id.as_bytes();
    let total = HEADER_FIXED_LEN + game_id.len() + user_id.len() + message.body.len();

    let mut buf = BytesMut::with_capacity(total);
    buf.extend_from_slice(&[h.version]);
    buf.extend_from_slice(&h.message_type.to_be_bytes());
    buf.extend_from_slice(&[h.flags]);
    buf.extend_from_slice(&h.sequence_id.to_be_bytes());
    buf.extend_from_slice(&h.timestamp.to_be_bytes());
    buf.extend_from_slice(&(message.body.len() as u32).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // checksum placeholder
    buf.extend_from_slice(&(game_id.len() as u16).to_be_bytes());
    buf.extend_from_slice(&(user_id.len() as u16).to_be_bytes());
    buf.extend_from_slice(game_id);
    buf.extend_from_slice(user_id);
    buf.extend_from_slice(&message.body);

    let checksum = CRC32.checksum(&buf);
    buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());

    buf.freeze()
}

/// Attempts to decode one frame from the front of `buf`. Never panics on
/// truncated or hostile input.
pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.len() < HEADER_FIXED_LEN {
        return DecodeOutcome::NeedMore;
    }

    let version = buf[0];
    let message_type = u16::from_be_bytes([buf[1], buf[2]]);
    let flags = buf[3];
    let sequence_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let timestamp = i64::from_be_bytes(buf[8..16].try_into().unwrap_or_default());
    let body_length = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
    let declared_checksum = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);
    let game_id_len = u16::from_be_bytes([buf[24], buf[25]]);
    let user_id_len = u16::from_be_bytes([buf[26], buf[27]]);

    if body_length > MAX_BODY_LEN {
        return DecodeOutcome::Malformed {
            reason: format!("body_len {body_length} exceeds max {MAX_BODY_LEN}"),
        };
    }
    if game_id_len > MAX_ID_LEN || user_id_len > MAX_ID_LEN {
        return DecodeOutcome::Malformed {
            reason: "identifier length exceeds u16 bound".to_string(),
        };
    }

    let total = HEADER_FIXED_LEN + game_id_len as usize + user_id_len as usize + body_length as usize;

    if buf.len() < total {
        return DecodeOutcome::NeedMore;
    }

    let mut crc_input = buf[..total].to_vec();
    crc_input[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&0u32.to_be_bytes());
    let computed_checksum = CRC32.checksum(&crc_input);

    if version != PROTOCOL_VERSION {
        return DecodeOutcome::UnsupportedVersion {
            version,
            consumed: total,
        };
    }

    if computed_checksum != declared_checksum {
        return DecodeOutcome::ChecksumMismatch { consumed: total };
    }

    let mut offset = HEADER_FIXED_LEN;
    let game_id = String::from_utf8_lossy(&buf[offset..offset + game_id_len as usize]).into_owned();
    offset += game_id_len as usize;
    let user_id = String::from_utf8_lossy(&buf[offset..offset + user_id_len as usize]).into_owned();
    offset += user_id_len as usize;
    let body = Bytes::copy_from_slice(&buf[offset..offset + body_length as usize]);

    let header = Header {
        version,
        message_type,
        flags,
        sequence_id,
        timestamp,
        body_length,
        checksum: declared_checksum,
        game_id,
        user_id,
    };

    DecodeOutcome::Decoded {
        message: Message::new(header, body),
        consumed: total,
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::protocol::message_type::MessageType;

    fn sample_message(body: &[u8]) -> Message {
        let header = Header::new(MessageType::Heartbeat, 0x04, 42, 1_700_000_000, body.len() as u32, "g1", "u1");
        Message::new(header, Bytes::copy_from_slice(body))
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let msg = sample_message(b"hello");
        let encoded = encode(&msg);
        match decode(&encoded) {
            DecodeOutcome::Decoded { message, consumed } => {
                assert_eq!(consumed, encoded.len());
                assert_eq!(message.header.sequence_id, 42);
                assert_eq!(message.header.game_id, "g1");
                assert_eq!(message.header.user_id, "u1");
                assert_eq!(&message.body[..], b"hello");
            },
            other => panic!("expected Decoded, got {other:?}"),
        }
    }

    #[test]
    fn empty_body_round_trips() {
        let msg = sample_message(b"");
        let encoded = encode(&msg);
        match decode(&encoded) {
            DecodeOutcome::Decoded { consumed, .. } => assert_eq!(consumed, HEADER_FIXED_LEN + 2 + 2),
            other => panic!("expected Decoded, got {other:?}"),
        }
    }

    #[test]
    fn partial_header_needs_more() {
        let msg = sample_message(b"hello");
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded[..10]), DecodeOutcome::NeedMore);
    }

    #[test]
    fn partial_body_needs_more() {
        let msg = sample_message(b"hello world");
        let encoded = encode(&msg);
        assert_eq!(decode(&encoded[..encoded.len() - 3]), DecodeOutcome::NeedMore);
    }

    #[test]
    fn corrupted_byte_is_checksum_mismatch() {
        let msg = sample_message(b"hello");
        let mut encoded = encode(&msg).to_vec();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xFF;
        match decode(&encoded) {
            DecodeOutcome::ChecksumMismatch { consumed } => assert_eq!(consumed, encoded.len()),
            other => panic!("expected ChecksumMismatch, got {other:?}"),
        }
    }

    #[test]
    fn oversized_body_len_is_malformed_without_buffering() {
        let mut buf = vec![0u8; HEADER_FIXED_LEN];
        buf[0] = PROTOCOL_VERSION;
        buf[16..20].copy_from_slice(&(MAX_BODY_LEN + 1).to_be_bytes());
        match decode(&buf) {
            DecodeOutcome::Malformed { .. } => {},
            other => panic!("expected Malformed, got {other:?}"),
        }
    }

    #[test]
    fn higher_version_is_unsupported() {
        let msg = sample_message(b"hi");
        let mut encoded = encode(&msg).to_vec();
        encoded[0] = PROTOCOL_VERSION + 1;
        // Recompute checksum over the mutated buffer so only the version differs.
        let total = encoded.len();
        let mut crc_input = encoded.clone();
        crc_input[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&0u32.to_be_bytes());
        let checksum = CRC32.checksum(&crc_input);
        encoded[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());

        match decode(&encoded) {
            DecodeOutcome::UnsupportedVersion { version, consumed } => {
                assert_eq!(version, PROTOCOL_VERSION + 1);
                assert_eq!(consumed, total);
            },
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[test]
    fn stream_splicing_recovers_messages_in_order() {
        let m1 = sample_message(b"first");
        let m2 = sample_message(b"second");
        let mut stream = encode(&m1).to_vec();
        stream.extend_from_slice(&encode(&m2));

        let mut decoded_bodies = Vec::new();
        let mut remaining = stream.as_slice();
        while !remaining.is_empty() {
            match decode(remaining) {
                DecodeOutcome::Decoded { message, consumed } => {
                    decoded_bodies.push(message.body.to_vec());
                    remaining = &remaining[consumed..];
                },
                DecodeOutcome::NeedMore => break,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(decoded_bodies, vec![b"first".to_vec(), b"second".to_vec()]);
        assert!(remaining.is_empty());
    }
}
