// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message-type code table (§6.1).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageTypeError {
    #[error("unknown message type code: 0x{0:04x}")]
    Unknown(u16),
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Heartbeat = 0x0001,
    Handshake = 0x0002,
    PlayerLogin = 0x1001,
    PlayerLogout = 0x1002,
    PlayerData = 0x1003,
    ItemOperation = 0x1004,
    OrderOperation = 0x1005,
    Error = 0x2001,
    Ping = 0x2002,
    Pong = 0x2003,
}

impl MessageType {
    pub fn from_u16(v: u16) -> Result<Self, MessageTypeError> {
        Ok(match v {
            0x0001 => Self::Heartbeat,
            0x0002 => Self::Handshake,
            0x1001 => Self::PlayerLogin,
            0x1002 => Self::PlayerLogout,
            0x1003 => Self::PlayerData,
            0x1004 => Self::ItemOperation,
            0x1005 => Self::OrderOperation,
            0x2001 => Self::Error,
            0x2002 => Self::Ping,
            0x2003 => Self::Pong,
            other => return Err(MessageTypeError::Unknown(other)),
        })
    }
}

impl TryFrom<u16> for MessageType {
    type Error = MessageTypeError;

    fn try_from(v: u16) -> Result<Self, <Self as TryFrom<u16>>::Error> {
        Self::from_u16(v)
    }
}

impl From<MessageType> for u16 {
    fn from(t: MessageType) -> u16 {
        t as u16
    }
}
