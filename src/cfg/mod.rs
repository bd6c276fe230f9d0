// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration and logging.

/// Configuration file parsing and management.
pub mod config;
/// Logger initialization.
pub mod logger;
