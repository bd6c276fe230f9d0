// SPDX-License-Identifier: AGPL-3.0-or-later

//! Token issuance and verification (C10, §4.10).

pub mod token;

pub use token::{Claims, IssuedTokens, TokenKind, TokenService};
