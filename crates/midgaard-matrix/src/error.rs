//! Matrix client error types.

use midgaard_core::ChatError;

/// Errors from talking to a homeserver.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Homeserver error ({status}) {errcode}: {message}")]
    Api {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Invalid homeserver URL: {0}")]
    Url(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MatrixError {
    /// Whether retrying the same request can never succeed.
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Api {
                status: 401 | 403,
                ..
            } | Self::Url(_)
                | Self::Config(_)
        )
    }
}

impl From<MatrixError> for ChatError {
    fn from(e: MatrixError) -> Self {
        match e {
            MatrixError::Api {
                status, message, ..
            } => Self::Rejected { status, message },
            other => Self::Request(other.to_string()),
        }
    }
}
