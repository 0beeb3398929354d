//! Unified error type for mediaforge.
//!
//! All crates funnel their failures into [`Error`], which carries enough
//! context for callers to derive a stable error code via [`Error::kind`], an
//! HTTP status via [`Error::http_status`] and a caller-safe diagnostic via
//! [`Error::public_message`].

use std::fmt;

/// Why the policy guard refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    UnsupportedFormat,
    DimensionLimitExceeded,
    OperationForbidden,
    QuotaExceeded,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFormat => write!(f, "unsupported format"),
            Self::DimensionLimitExceeded => write!(f, "dimension limit exceeded"),
            Self::OperationForbidden => write!(f, "operation forbidden"),
            Self::QuotaExceeded => write!(f, "quota exceeded"),
        }
    }
}

/// A policy rejection with a short, caller-safe reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

/// Failure modes of an external engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorKind {
    /// The executable is not installed. Fatal at startup, never retried.
    NotFound,
    /// The invocation outlived the job deadline.
    Timeout,
    /// Non-zero exit or abnormal termination.
    Crashed,
    /// Terminated for exceeding its memory or disk cap.
    ResourceExceeded,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "engine not found"),
            Self::Timeout => write!(f, "engine timeout"),
            Self::Crashed => write!(f, "engine crashed"),
            Self::ResourceExceeded => write!(f, "resource exceeded"),
        }
    }
}

/// Stable, caller-facing error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedFormat,
    DimensionLimitExceeded,
    OperationForbidden,
    QuotaExceeded,
    EngineNotFound,
    EngineTimeout,
    EngineCrashed,
    ResourceExceeded,
    Overloaded,
    Cancelled,
    Config,
    Io,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case code suitable for API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedFormat => "unsupported_format",
            Self::DimensionLimitExceeded => "dimension_limit_exceeded",
            Self::OperationForbidden => "operation_forbidden",
            Self::QuotaExceeded => "quota_exceeded",
            Self::EngineNotFound => "engine_not_found",
            Self::EngineTimeout => "engine_timeout",
            Self::EngineCrashed => "engine_crashed",
            Self::ResourceExceeded => "resource_exceeded",
            Self::Overloaded => "overloaded",
            Self::Cancelled => "cancelled",
            Self::Config => "config_error",
            Self::Io => "io_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type covering all failure modes in mediaforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The policy guard rejected the request (never retried).
    #[error("Validation error: {0}")]
    Validation(Rejection),

    /// An external engine (ImageMagick, ffmpeg, fc-match) failed.
    #[error("Engine error [{engine}]: {kind}: {message}")]
    Engine {
        kind: EngineErrorKind,
        /// Name of the engine executable.
        engine: String,
        /// Summarized reason; never raw engine stderr.
        message: String,
    },

    /// The scheduler backlog is full.
    #[error("Overloaded: backlog of {backlog} queued jobs is full")]
    Overloaded { backlog: usize },

    /// The job was cancelled or its deadline expired between stages.
    #[error("Cancelled: {reason}")]
    Cancelled { reason: String },

    /// A pipeline stage failed; `source` is the underlying failure.
    #[error("Pipeline error [{stage}]: {source}")]
    Pipeline {
        stage: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal state.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convenience constructor for [`Error::Validation`].
    pub fn rejected(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Error::Validation(Rejection::new(kind, reason))
    }

    /// Convenience constructor for [`Error::Engine`].
    pub fn engine(
        kind: EngineErrorKind,
        engine: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Engine {
            kind,
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Cancelled`].
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Error::Cancelled {
            reason: reason.into(),
        }
    }

    /// Attach stage context. Already-wrapped errors keep their innermost stage.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        match self {
            e @ Error::Pipeline { .. } => e,
            other => Error::Pipeline {
                stage: stage.into(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any stage context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Pipeline { source, .. } => source.root(),
            other => other,
        }
    }

    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            Error::Validation(r) => match r.kind {
                RejectionKind::UnsupportedFormat => ErrorKind::UnsupportedFormat,
                RejectionKind::DimensionLimitExceeded => ErrorKind::DimensionLimitExceeded,
                RejectionKind::OperationForbidden => ErrorKind::OperationForbidden,
                RejectionKind::QuotaExceeded => ErrorKind::QuotaExceeded,
            },
            Error::Engine { kind, .. } => match kind {
                EngineErrorKind::NotFound => ErrorKind::EngineNotFound,
                EngineErrorKind::Timeout => ErrorKind::EngineTimeout,
                EngineErrorKind::Crashed => ErrorKind::EngineCrashed,
                EngineErrorKind::ResourceExceeded => ErrorKind::ResourceExceeded,
            },
            Error::Overloaded { .. } => ErrorKind::Overloaded,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Config(_) => ErrorKind::Config,
            Error::Io { .. } => ErrorKind::Io,
            Error::Internal(_) | Error::Pipeline { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the scheduler may retry the job once with degraded options.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::EngineTimeout | ErrorKind::EngineCrashed | ErrorKind::ResourceExceeded
        )
    }

    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::UnsupportedFormat => 415,
            ErrorKind::DimensionLimitExceeded => 422,
            ErrorKind::OperationForbidden => 403,
            ErrorKind::QuotaExceeded => 413,
            ErrorKind::EngineNotFound => 503,
            ErrorKind::EngineTimeout => 504,
            ErrorKind::EngineCrashed => 502,
            ErrorKind::ResourceExceeded => 507,
            ErrorKind::Overloaded => 503,
            ErrorKind::Cancelled => 409,
            ErrorKind::Config | ErrorKind::Io | ErrorKind::Internal => 500,
        }
    }

    /// Short diagnostic safe to show to a remote caller.
    ///
    /// Engine and I/O details can carry local paths, so only the summarized
    /// reason is exposed for engine errors and nothing at all for I/O.
    pub fn public_message(&self) -> String {
        match self.root() {
            Error::Validation(r) => r.reason.clone(),
            Error::Engine { kind, message, .. } => format!("{kind}: {message}"),
            Error::Overloaded { .. } => "server is busy, retry later".into(),
            Error::Cancelled { reason } => reason.clone(),
            Error::Config(_) => "service misconfigured".into(),
            Error::Io { .. } => "internal I/O failure".into(),
            Error::Internal(_) | Error::Pipeline { .. } => "internal error".into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_display() {
        let err = Error::rejected(RejectionKind::UnsupportedFormat, "svg is not allowed");
        assert_eq!(
            err.to_string(),
            "Validation error: unsupported format: svg is not allowed"
        );
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(err.http_status(), 415);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn engine_display() {
        let err = Error::engine(EngineErrorKind::Crashed, "ffmpeg", "exit status 1");
        assert_eq!(
            err.to_string(),
            "Engine error [ffmpeg]: engine crashed: exit status 1"
        );
        assert_eq!(err.kind(), ErrorKind::EngineCrashed);
        assert_eq!(err.http_status(), 502);
        assert!(err.is_recoverable());
    }

    #[test]
    fn not_found_is_not_recoverable() {
        let err = Error::engine(EngineErrorKind::NotFound, "magick", "not installed");
        assert_eq!(err.kind(), ErrorKind::EngineNotFound);
        assert_eq!(err.http_status(), 503);
        assert!(!err.is_recoverable());
    }

    #[test]
    fn pipeline_wrapping_delegates_to_source() {
        let err = Error::engine(EngineErrorKind::Timeout, "magick", "deadline exceeded")
            .in_stage("rasterize-pages");
        assert_eq!(err.kind(), ErrorKind::EngineTimeout);
        assert_eq!(err.http_status(), 504);
        assert!(err.is_recoverable());
        assert!(err.to_string().starts_with("Pipeline error [rasterize-pages]"));
    }

    #[test]
    fn in_stage_keeps_innermost_stage() {
        let err = Error::Internal("x".into())
            .in_stage("inner")
            .in_stage("outer");
        match err {
            Error::Pipeline { stage, .. } => assert_eq!(stage, "inner"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "/tmp/job/x missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
        assert!(!err.public_message().contains("/tmp"));
    }

    #[test]
    fn overloaded_and_cancelled() {
        let err = Error::Overloaded { backlog: 4 };
        assert_eq!(err.kind().as_str(), "overloaded");
        assert_eq!(err.http_status(), 503);

        let err = Error::cancelled("cancelled by caller");
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(err.public_message(), "cancelled by caller");
    }
}
