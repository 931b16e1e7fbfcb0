use thiserror::Error;

/// Errors surfaced by synthesis and recognition adapters.
///
/// Calls only ever fail with `Status`, `Timeout` or `Connection`.
/// `Config` is returned by constructors and `InvalidRequest` by the input
/// checks that run before any I/O.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl VoiceError {
    /// HTTP status code of a `Status` error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for VoiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Connection(e.to_string())
        }
    }
}
