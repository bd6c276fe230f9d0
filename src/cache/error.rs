// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("requested key not found in any tier")]
    Miss,
    #[error("bulk invalidation mode is not supported by this build")]
    Unsupported,
    #[error("json codec error: {0}")]
    Codec(#[from] serde_json::Error),
}
