//! Common error types used throughout vodforge.
//!
//! The variants mirror how a failure must be handled: transient persistence
//! conflicts are retried, work failures are recorded onto the asset, and
//! stale or redundant calls never reach this type at all (they are no-ops).

/// Common error type for vodforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A concurrent writer changed the record; the unit of work may be retried.
    #[error("Concurrent modification: {0}")]
    Conflict(String),

    /// Optimistic-concurrency retries were exhausted.
    #[error("Persistence conflict after {attempts} attempts: {message}")]
    PersistenceConflict { attempts: u32, message: String },

    /// The encoder could not produce a rendition.
    #[error("Transcoding failed: {0}")]
    TranscodeFailed(String),

    /// One step of an editing pipeline failed.
    #[error("Edit task {index} ({kind}) failed: {message}")]
    EditTaskFailed {
        index: usize,
        kind: String,
        message: String,
    },

    /// An edit task kind this pipeline does not know how to apply.
    #[error("Unsupported edit task: {0}")]
    UnsupportedTask(String),

    /// The editing pipeline was started without a prior quota check.
    #[error("Quota headroom was not verified before editing")]
    QuotaNotVerified,

    /// The owning user has no room for the additional bytes.
    #[error("Quota exceeded: {additional_bytes} additional bytes requested")]
    QuotaExceeded { additional_bytes: u64 },

    /// Moving bytes to or from a storage backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration cannot be satisfied (e.g. no feasible sprite grid).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Database error.
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new Conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a new TranscodeFailed error.
    pub fn transcode<S: Into<String>>(msg: S) -> Self {
        Self::TranscodeFailed(msg.into())
    }

    /// Create a new Storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new InvalidConfig error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether a retry of the same unit of work could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("asset 42");
        assert_eq!(err.to_string(), "Not found: asset 42");

        let err = Error::PersistenceConflict {
            attempts: 5,
            message: "version moved".into(),
        };
        assert_eq!(
            err.to_string(),
            "Persistence conflict after 5 attempts: version moved"
        );

        let err = Error::EditTaskFailed {
            index: 1,
            kind: "add-intro".into(),
            message: "encoder exited 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "Edit task 1 (add-intro) failed: encoder exited 1"
        );
    }

    #[test]
    fn test_only_conflict_is_transient() {
        assert!(Error::conflict("stale").is_transient());
        assert!(!Error::database("disk I/O").is_transient());
        assert!(!Error::transcode("boom").is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }
}
