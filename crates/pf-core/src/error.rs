//! Unified error type for pixelforge.
//!
//! Every failure is an [`Error`] carrying a [`Category`], the name of the
//! operation that failed (usually a step name), a concrete [`ErrorKind`], and
//! a retryable flag. The retry policy consults only that flag; it never infers
//! retryability from the step that produced the error.

use std::fmt;

use crate::media::Format;
use crate::scope::Scope;

/// Coarse classification used for routing and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Decode,
    Encode,
    Pipeline,
    Storage,
    Config,
    /// Always retryable.
    Transient,
    Input,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decode => "decode",
            Self::Encode => "encode",
            Self::Pipeline => "pipeline",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Transient => "transient",
            Self::Input => "input",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The concrete failure behind an [`Error`].
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// No decoder or encoder handles the format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(Format),

    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Empty byte payload, empty step list, or a missing decoded image.
    #[error("empty input")]
    EmptyInput,

    /// The execution scope was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// The execution scope's deadline passed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The job queue is at capacity.
    #[error("worker pool queue full")]
    WorkerPoolFull,

    /// The worker pool has been stopped and accepts no more work.
    #[error("worker pool shut down")]
    ShutDown,

    /// Ingestion exceeded the configured byte ceiling.
    #[error("input exceeds the {limit} byte limit")]
    SizeLimit {
        /// The configured ceiling in bytes.
        limit: u64,
    },

    /// A step received a decoded handle from a backend it cannot operate on.
    #[error("wrong backend: expected {expected}, found {found}")]
    WrongBackend {
        expected: &'static str,
        found: &'static str,
    },

    #[error("storage unavailable")]
    StorageUnavailable,

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Image(#[from] image::ImageError),

    #[error("{0}")]
    Message(String),
}

impl ErrorKind {
    /// Shorthand for [`ErrorKind::Message`].
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Structured error used throughout pixelforge.
#[derive(Debug, thiserror::Error)]
#[error("[{category}] {op}: {kind}")]
pub struct Error {
    category: Category,
    op: String,
    #[source]
    kind: ErrorKind,
    retryable: bool,
}

impl Error {
    /// Create a non-retryable error. Transient-category errors are always
    /// retryable regardless of the constructor used.
    pub fn new(category: Category, op: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            category,
            op: op.into(),
            kind,
            retryable: category == Category::Transient,
        }
    }

    /// Convenience constructor for a retryable [`Category::Transient`] error.
    pub fn transient(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Transient, op, kind)
    }

    /// Convenience constructor for [`Category::Decode`].
    pub fn decode(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Decode, op, kind)
    }

    /// Convenience constructor for [`Category::Encode`].
    pub fn encode(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Encode, op, kind)
    }

    /// Convenience constructor for [`Category::Pipeline`].
    pub fn pipeline(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Pipeline, op, kind)
    }

    /// Convenience constructor for [`Category::Input`].
    pub fn input(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Input, op, kind)
    }

    /// Convenience constructor for [`Category::Storage`].
    pub fn storage(op: impl Into<String>, kind: ErrorKind) -> Self {
        Self::new(Category::Storage, op, kind)
    }

    /// Pipeline error for an interrupted operation, carrying the scope's
    /// reason (cancelled or deadline exceeded).
    pub fn cancelled(op: impl Into<String>, scope: &Scope) -> Self {
        let kind = scope.reason().unwrap_or(ErrorKind::Cancelled);
        Self::new(Category::Pipeline, op, kind)
    }

    /// Convenience constructor for a [`Category::Config`] validation failure.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(Category::Config, "config", ErrorKind::Message(message.into()))
    }

    /// Mark this error as eligible for retry.
    #[must_use]
    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Name of the operation (usually the step) the error is attributed to.
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_category(&self, category: Category) -> bool {
        self.category == category
    }

    /// Whether this error came from scope cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_op() {
        let err = Error::pipeline("resize", ErrorKind::InvalidDimensions("0x0".into()));
        assert_eq!(err.to_string(), "[pipeline] resize: invalid dimensions: 0x0");
    }

    #[test]
    fn default_not_retryable() {
        let err = Error::decode("decode", ErrorKind::EmptyInput);
        assert!(!err.is_retryable());
        assert!(err.is_category(Category::Decode));
    }

    #[test]
    fn transient_always_retryable() {
        let err = Error::transient("fetch", ErrorKind::msg("connection reset"));
        assert!(err.is_retryable());

        let err = Error::new(Category::Transient, "fetch", ErrorKind::msg("again"));
        assert!(err.is_retryable());
    }

    #[test]
    fn explicit_retryable_marker() {
        let err = Error::storage("put", ErrorKind::StorageUnavailable).retryable();
        assert!(err.is_retryable());
        assert_eq!(err.category(), Category::Storage);
    }

    #[test]
    fn cancellation_detection() {
        assert!(Error::pipeline("encode", ErrorKind::Cancelled).is_cancellation());
        assert!(Error::pipeline("encode", ErrorKind::DeadlineExceeded).is_cancellation());
        assert!(!Error::pipeline("encode", ErrorKind::EmptyInput).is_cancellation());
    }

    #[test]
    fn size_limit_display() {
        let err = Error::input("ingest", ErrorKind::SizeLimit { limit: 1024 });
        assert_eq!(err.to_string(), "[input] ingest: input exceeds the 1024 byte limit");
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::storage("get", io_err.into());
        assert!(matches!(err.kind(), ErrorKind::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn cancelled_carries_scope_reason() {
        let scope = Scope::new();
        scope.cancel();
        let err = Error::cancelled("watermark", &scope);
        assert!(err.is_category(Category::Pipeline));
        assert!(matches!(err.kind(), ErrorKind::Cancelled));
        assert_eq!(err.to_string(), "[pipeline] watermark: cancelled");
    }

    #[test]
    fn config_error() {
        let err = Error::config("chunk_size must be positive");
        assert_eq!(err.category(), Category::Config);
        assert_eq!(err.op(), "config");
    }
}
