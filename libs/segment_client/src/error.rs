use crate::identifier::IdentifierType;
use std::time::Duration;

/// Rejection of a lookup before it is ever sent
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("Identifier must not be empty")]
    EmptyIdentifier,

    #[error(
        "Identifier {identifier:?} already queued as {expected}, cannot also check it as {actual}"
    )]
    MixedIdentifierType {
        identifier: String,
        expected: IdentifierType,
        actual: IdentifierType,
    },
}

/// Failure of a single outbound exchange
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Deadline of {0:?} exceeded")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to read response body: {0}")]
    Body(String),
}

impl TransportError {
    /// Create a connection failed error
    pub fn connect(msg: impl Into<String>) -> Self {
        TransportError::Connect(msg.into())
    }

    /// Create a request failed error
    pub fn request(msg: impl Into<String>) -> Self {
        TransportError::Request(msg.into())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            TransportError::Body(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Outcome of a membership check that did not produce a boolean
///
/// Group-wide variants (`Transport`, `Status`, `Parse`) are broadcast to every
/// caller whose lookup shared the outbound request, which is why the type is
/// `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("Lookup rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Lookup service answered with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed lookup response: {0}")]
    Parse(String),

    #[error("Segment {segment_id} missing from lookup response")]
    SegmentNotFound { segment_id: u32 },

    #[error("Check for segment {segment_id} failed: {message}")]
    CheckFailed { segment_id: u32, message: String },

    #[error("Lookup engine shut down before the check completed")]
    Shutdown,
}

impl CheckError {
    /// True for failures shared by every lookup in the same outbound request
    pub fn is_group_wide(&self) -> bool {
        matches!(
            self,
            CheckError::Transport(_) | CheckError::Status { .. } | CheckError::Parse(_)
        )
    }

    /// True when repeating the check later may succeed
    ///
    /// This layer never retries on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            CheckError::Transport(_) | CheckError::Shutdown => true,
            CheckError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Create a status error from a raw response
    pub fn status(status: u16, body: &[u8]) -> Self {
        CheckError::Status {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}

/// Failure of a bulk scan request
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ScanError {
    #[error("Please input at least {min} identifiers, got {got}")]
    TooFewIdentifiers { got: usize, min: usize },

    #[error("Failed to read scan input: {0}")]
    Io(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Scan request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed scan response: {0}")]
    Parse(String),
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        ScanError::Io(err.to_string())
    }
}

/// Invalid or unloadable configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config_crate::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid config error
    pub fn invalid(msg: impl Into<String>) -> Self {
        ConfigError::Invalid(msg.into())
    }
}

/// Failure to construct a client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}
