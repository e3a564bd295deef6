//! Error types shared by all cloud provider clients.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error, used where user supplied callbacks or provider SDKs surface arbitrary errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for the library.
///
/// Provider specific error codes are normalised onto this closed taxonomy by each client's
/// 'handle_error' function; anything unmapped passes through as 'Error::Provider' rather than
/// being swallowed.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Something (a bucket/container, key/blob, or upload) was not found.
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// The kind of thing which was not found, e.g. "key" or "bucket".
        kind: &'static str,
        /// The name of the thing which was not found.
        name: String,
    },

    /// The request was not authenticated, check that valid credentials have been provided.
    #[error("failed to authenticate, check that valid credentials have been provided")]
    Unauthenticated,

    /// Authenticated, but the user does not have permission to access the resource.
    #[error("authenticated user does not have permission to access this resource")]
    Unauthorized,

    /// A supplied precondition (e.g. "only if absent") was not met.
    #[error("precondition failed for object '{key}'")]
    PreconditionFailed { key: String },

    /// The object is in an archive tier of storage (e.g. S3 Glacier, Azure Archive) and cannot
    /// be accessed until restored.
    #[error("object '{key}' is in long-term archive storage and cannot be accessed")]
    ArchiveStorage { key: String },

    /// The operation is not supported by this cloud provider, e.g. a non-whole-object byte range
    /// copy on GCP.
    #[error("operation is not supported by this cloud provider")]
    UnsupportedOperation,

    /// The storage endpoint could not be resolved; a DNS or network level failure.
    #[error("failed to resolve the storage endpoint, check the endpoint and network configuration")]
    EndpointUnreachable,

    /// A directory delete found an object still under retention; nothing was deleted, retry once
    /// the lock has expired.
    #[error("cannot delete '{key}' in bucket '{bucket}', it is under an unexpired retention lock")]
    RetentionNotExpired { bucket: String, key: String },

    /// The include and exclude iteration filters were both supplied.
    #[error("include/exclude filters are mutually exclusive")]
    IncludeAndExclude,

    /// Invalid client configuration, e.g. a storage URL with an unknown scheme.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An upload id was supplied to a client whose cloud provider does not use upload ids.
    #[error("received an unexpected upload id, this cloud provider does not use upload ids")]
    ExpectedNoUploadId,

    /// A byte range with an end offset before its start offset.
    #[error("invalid byte range {start}-{end}")]
    InvalidByteRange { start: u64, end: u64 },

    /// An operation which requires a byte range was not given one.
    #[error("a byte range is required but has not been provided")]
    ByteRangeRequired,

    /// An operation which requires a closed byte range was given an open-ended one.
    #[error("a closed byte range is required for this operation")]
    ClosedByteRangeRequired,

    /// An object lock with a type the provider (or this library) does not support.
    #[error("unsupported object lock type")]
    UnsupportedLockType,

    /// An error returned by a user supplied iteration callback; propagated unwrapped so callers
    /// can tell their own errors apart from the client's.
    #[error(transparent)]
    Callback(BoxError),

    /// The first error which caused a worker pool to stop; returned by every subsequent attempt
    /// to use the pool.
    #[error("{0}")]
    TaskFailed(std::sync::Arc<Error>),

    /// IO error, e.g. while draining an object body.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An unmapped provider error, passed through unchanged.
    #[error("{provider} error: {source}")]
    Provider {
        provider: crate::values::Provider,
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Returns whether this error is a 'NotFound'.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Synthesizes a placeholder for a name the caller omitted, keeping messages non-empty.
    pub(crate) fn not_found(kind: &'static str, name: &str) -> Error {
        let name = if name.is_empty() { format!("<empty {kind} name>") } else { name.to_string() };

        Error::NotFound { kind, name }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_synthesizes_placeholder_name() {
        let err = Error::not_found("bucket", "");
        assert_eq!(err.to_string(), "bucket '<empty bucket name>' not found");

        let err = Error::not_found("key", "path/to/object");
        assert_eq!(err.to_string(), "key 'path/to/object' not found");
    }

    #[test]
    fn callback_errors_are_transparent() {
        let err = Error::Callback("stop iteration".into());
        assert_eq!(err.to_string(), "stop iteration");
    }
}
