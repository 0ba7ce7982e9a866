/// Normalized failure surfaced through [`crate::CallResult`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// The route requires an authorization value and none was supplied.
    #[error("authorization required")]
    AuthRequired,
    /// Upstream answered with a 4xx status. Never retried.
    #[error("client error {status}")]
    Client { status: u16 },
    /// Upstream answered with a 5xx status after all retries were spent.
    #[error("server error {status}")]
    Server { status: u16 },
    /// Timeout or connection failure after all retries were spent.
    #[error("network failure: {0}")]
    Network(String),
    /// The response body matched none of the expected shapes.
    #[error("transcode error: unexpected response body: {preview}")]
    Transcode { preview: String },
}

impl CallError {
    /// HTTP status to report to the upstream caller of the gateway.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthRequired => 401,
            Self::Client { status } | Self::Server { status } => *status,
            Self::Network(_) => 504,
            Self::Transcode { .. } => 500,
        }
    }
}

/// A response body that matched none of the expected shapes.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unexpected response body: {preview}")]
pub struct TranscodeError {
    /// Leading bytes of the body, lossy UTF-8.
    pub preview: String,
}

impl From<TranscodeError> for CallError {
    fn from(err: TranscodeError) -> Self {
        Self::Transcode {
            preview: err.preview,
        }
    }
}

/// Failure reported by a [`crate::Transport`] for a single attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Request(#[from] reqwest::Error),
    /// Connection-level failure reported by a non-`reqwest` transport.
    #[error("connection error: {0}")]
    Connection(String),
    /// The attempt token was cancelled before the call completed.
    #[error("call cancelled")]
    Cancelled,
}

/// Error returned by a [`crate::ValidationService`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The remote check could not be completed.
    #[error("validation service unavailable: {0}")]
    Unavailable(String),
    /// The remote answered with a shape that is not an availability report.
    #[error("invalid validation response: {0}")]
    InvalidResponse(String),
}

/// Invalid configuration read from the environment.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing {0} environment variable")]
    Missing(&'static str),
    #[error("{name} is set but empty")]
    Empty { name: &'static str },
    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}
