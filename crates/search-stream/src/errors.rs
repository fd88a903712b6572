use std::fmt;

/// Closed set of error codes reported to the observer.
///
/// The external layer maps these to user-facing copy; the ingester itself
/// never formats end-user text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ErrorCode {
    /// Backend asked the client to slow down (HTTP 429).
    RateLimited,
    /// Backend rejected the request, e.g. a missing search id (HTTP 400).
    InvalidRequest,
    /// Backend could not start generating an answer (HTTP 503).
    Unavailable,
    /// Any other failure.
    Generic,
}

impl ErrorCode {
    /// Maps an HTTP-style status into the closed code set.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited,
            400 => Self::InvalidRequest,
            503 => Self::Unavailable,
            _ => Self::Generic,
        }
    }

    /// Integer form of the code.
    pub fn as_u16(self) -> u16 {
        match self {
            Self::RateLimited => 429,
            Self::InvalidRequest => 400,
            Self::Unavailable => 503,
            Self::Generic => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// Errors returned by a `SearchBackend` before they are classified for the
/// session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Backend answered with a non-success HTTP status.
    #[error("backend returned status {status}: {message}")]
    Status { status: u16, message: String },
    /// Connection or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl BackendError {
    /// Creates a status error.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Error taxonomy of the ingester.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// Stream structure is corrupted; fatal.
    #[error("framing error: {message}")]
    Framing { message: String },
    /// A single record could not be parsed; skipped.
    #[error("record {frame} could not be parsed: {message}")]
    RecordParse { frame: u64, message: String },
    /// Backend signalled rate limiting; fatal.
    #[error("rate limited")]
    RateLimited,
    /// Backend sent an error record; fatal.
    #[error("backend reported error {0}")]
    Backend(ErrorCode),
    /// Connection-level failure or non-success status; fatal.
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },
    /// The caller abandoned the session. Never reported to the observer.
    #[error("cancelled")]
    Cancelled,
    /// Invalid ingester or backend configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid request passed to `start`.
    #[error("validation error: {0}")]
    Validation(String),
    /// Session task ended without producing a report.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    pub(crate) fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    pub(crate) fn record_parse(frame: u64, message: impl Into<String>) -> Self {
        Self::RecordParse {
            frame,
            message: message.into(),
        }
    }

    /// Returns `false` for errors that only drop a single record.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RecordParse { .. } | Self::Cancelled)
    }

    /// Code reported to the observer, or `None` when the error is not
    /// surfaced at all.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::RecordParse { .. } | Self::Cancelled => None,
            Self::RateLimited => Some(ErrorCode::RateLimited),
            Self::Backend(code) => Some(*code),
            Self::Transport {
                status: Some(status),
                ..
            } => Some(ErrorCode::from_status(*status)),
            Self::Framing { .. }
            | Self::Transport { status: None, .. }
            | Self::Config(_)
            | Self::Validation(_)
            | Self::Internal(_) => Some(ErrorCode::Generic),
        }
    }
}

impl From<BackendError> for IngestError {
    fn from(value: BackendError) -> Self {
        match value {
            BackendError::Status { status: 429, .. } => IngestError::RateLimited,
            BackendError::Status { status, message } => IngestError::Transport {
                status: Some(status),
                message,
            },
            BackendError::Transport { message } => IngestError::Transport {
                status: None,
                message,
            },
        }
    }
}
