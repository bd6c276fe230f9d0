// SPDX-License-Identifier: AGPL-3.0-or-later

//! One TCP peer's lifecycle (C2): state machine, send/receive loop,
//! heartbeat/idle watchdogs, stream reassembly.

mod common;
pub mod connection;
pub mod state;

pub use connection::{Connection, ConnectionCounters, ConnectionTimings, RecvOutcome};
pub use state::ConnectionState;
