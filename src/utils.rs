// SPDX-License-Identifier: AGPL-3.0-or-later

use std::time::{SystemTime, UNIX_EPOCH};

use rand::RngExt;

/// Generates a `conn_<unix_seconds>_<random-suffix>` connection id (§3).
pub fn generate_connection_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("conn_{secs}_{}", random_suffix())
}

/// Generates a random task id in the same `task_<unix_seconds>_<suffix>`
/// family, kept distinct from connection ids for readability in logs.
pub fn generate_task_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("task_{secs}_{}", random_suffix())
}

/// 128-bit random value, hex-encoded, used as a token id.
pub fn generate_token_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

fn random_suffix() -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Seconds since the Unix epoch, used throughout for timestamps.
pub fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
