// SPDX-License-Identifier: AGPL-3.0-or-later

//! Header flag bits (§6.1). `Compressed`/`Encrypted` are reserved: v1 of
//! this protocol requires plaintext, uncompressed transport.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        /// Reserved at v1 — plaintext transport is mandatory.
        const COMPRESSED    = 0x01;
        /// Reserved at v1 — plaintext transport is mandatory.
        const ENCRYPTED     = 0x02;
        const NEED_RESPONSE = 0x04;
        const ASYNC         = 0x08;
    }
}
