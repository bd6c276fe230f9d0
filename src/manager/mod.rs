// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection lifecycle manager (C3): bounded pool, per-game/per-user
//! indexes, broadcast, janitor sweeps, cooperative shutdown.

pub mod connection_manager;

pub use connection_manager::{ConnectionManager, ConnectionManagerStats};
