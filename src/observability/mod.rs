// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide request/cache counters (C12, §2).

pub mod monitor;

pub use monitor::{Monitor, MonitorSnapshot};
