//! Shared plumbing for the narrow per-provider API traits.
//!
//! Each provider client is implemented against a small trait covering just the SDK calls it
//! makes, with errors reduced to the attributes error normalization needs. This keeps test
//! doubles trivial to write.

use thiserror::Error;

use crate::error::BoxError;

pub(crate) type ApiResult<T> = std::result::Result<T, ApiError>;

/// An error returned by a provider API, reduced to the attributes error normalization needs.
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct ApiError {
    /// The provider error code, e.g. "NoSuchKey" or "BlobNotFound".
    pub code: Option<String>,
    pub message: String,
    /// Whether the request never reached the provider, e.g. a DNS resolution failure.
    pub unreachable: bool,
    #[source]
    pub source: Option<BoxError>,
}

impl ApiError {
    pub fn new(code: Option<&str>, message: &str) -> Self {
        ApiError {
            code: code.map(str::to_string),
            message: message.to_string(),
            unreachable: false,
            source: None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}
