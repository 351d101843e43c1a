use std::io;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure a request can end in. Handlers bubble these up with `?` and
/// the conversion to an HTTP response happens once, in `into_response`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    InputInvalid(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("not authorized")]
    NotAuthorized,

    #[error("not found")]
    NotFound,

    #[error("too many login attempts")]
    RateLimited,

    #[error("{program} exited with status {code:?}")]
    Subprocess {
        program: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),

    #[error("no free name left for {0}")]
    NamingExhausted(String),
}

impl Error {
    pub fn input(message: impl Into<String>) -> Self {
        Self::InputInvalid(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputInvalid(_) => "bad_request",
            Self::NotAuthenticated => "unauthenticated",
            Self::NotAuthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::RateLimited => "rate_limited",
            Self::Subprocess { .. } | Self::Spawn { .. } => "command_failed",
            Self::Io(_) => "io_failed",
            Self::NamingExhausted(_) => "naming_exhausted",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InputInvalid(_) => StatusCode::BAD_REQUEST,
            Self::NotAuthenticated | Self::NotAuthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Subprocess { .. }
            | Self::Spawn { .. }
            | Self::Io(_)
            | Self::NamingExhausted(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the client. Server-side failures get a fixed
    /// string; the cause only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            Self::Subprocess { .. } | Self::Spawn { .. } => "command failed".to_string(),
            Self::Io(_) => "i/o failure".to_string(),
            Self::NamingExhausted(_) => "could not find a free name".to_string(),
            other => other.to_string(),
        }
    }
}

// Error response structure
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            Self::Subprocess { stderr, .. } => {
                tracing::error!(error = %self, stderr = %stderr.trim(), "request failed")
            }
            _ if status.is_server_error() => tracing::error!(error = %self, "request failed"),
            _ => tracing::warn!(error = %self, "request rejected"),
        }

        let body = ErrorResponse {
            error: self.kind(),
            message: Some(self.public_message()),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Error::input("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(Error::NotAuthenticated.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::NotAuthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(Error::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::Io(io::Error::other("disk")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_subprocess_message_does_not_leak_stderr() {
        let error = Error::Subprocess {
            program: "tar",
            code: Some(2),
            stderr: "tar: /home/alice/secret: Cannot open".to_string(),
        };
        assert_eq!(error.public_message(), "command failed");
        assert!(!error.to_string().contains("secret"));
    }

    #[test]
    fn test_input_message_is_passed_through() {
        assert_eq!(
            Error::input("path outside of home").public_message(),
            "path outside of home"
        );
    }
}
