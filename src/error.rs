//! Error taxonomy for foreground registry operations.
//!
//! Point-lookup misses are not errors (they surface as `Ok(None)`), and
//! per-record import failures are reported inside the import response, so
//! only three kinds of failure ever reach a caller.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Unsupported import type, blank URL, malformed JSON, missing fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Non-2xx response, network failure or unparsable body from a remote
    /// registry. Any records collected before the failure are discarded.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The backing store or another collaborator failed.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RegistryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
