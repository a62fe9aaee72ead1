//! Client error types

use thiserror::Error;

/// Every way a call through [`super::HttpClient`] can fail.
///
/// Business errors (`MalformedResponse`, `Application`, `Unauthorized`) have
/// already been reported through the [`super::Notifier`] when they are
/// returned, so callers should not show them again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The payload carried no integer `code`
    #[error("{0}")]
    MalformedResponse(String),

    /// Non-zero business `code` other than 401
    #[error("{message}")]
    Application { code: i64, message: String },

    /// Business `code` 401: the session is gone
    #[error("{0}")]
    Unauthorized(String),

    /// Network failure, timeout, cancellation or a non-envelope HTTP error
    #[error("{message}")]
    Transport {
        message: String,
        status: Option<u16>,
        cancelled: bool,
    },

    /// The token refresh this request waited on did not produce a token
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The request could not be built (bad URL, bad header, bad config)
    #[error("Invalid request: {0}")]
    Build(String),
}

impl ClientError {
    pub(crate) fn cancelled() -> Self {
        Self::Transport {
            message: "Request cancelled".to_string(),
            status: None,
            cancelled: true,
        }
    }

    pub(crate) fn from_status(status: reqwest::StatusCode) -> Self {
        Self::Transport {
            message: format!("Request failed with status {status}"),
            status: Some(status.as_u16()),
            cancelled: false,
        }
    }

    /// `true` when the caller aborted the request, as opposed to a network failure.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport { cancelled: true, .. })
    }

    /// The business code, when the server answered with an envelope.
    #[must_use]
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Application { code, .. } => Some(*code),
            Self::Unauthorized(_) => Some(401),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            return Self::Build(err.to_string());
        }
        Self::Transport {
            message: err.to_string(),
            status: err.status().map(|status| status.as_u16()),
            cancelled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_flagged() {
        assert!(ClientError::cancelled().is_cancelled());
        assert!(!ClientError::from_status(reqwest::StatusCode::BAD_GATEWAY).is_cancelled());
    }

    #[test]
    fn display_is_the_message() {
        assert_eq!(ClientError::Unauthorized("expired".to_string()).to_string(), "expired");
        let err = ClientError::Application {
            code: 1001,
            message: "bad".to_string(),
        };
        assert_eq!(err.to_string(), "bad");
        assert_eq!(err.code(), Some(1001));
    }

    #[test]
    fn status_errors_carry_the_status() {
        let err = ClientError::from_status(reqwest::StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(
            err,
            ClientError::Transport {
                status: Some(503),
                cancelled: false,
                ..
            }
        ));
        assert_eq!(err.code(), None);
    }
}
