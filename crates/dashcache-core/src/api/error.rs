use reqwest::StatusCode;
use thiserror::Error;

/// Failures of an authorized GET.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("No active session - log in or switch to a session first")]
    NoActiveSession,

    #[error("Credential rejected by the server - log in again")]
    Unauthorized,

    #[error("Active session may not read {url}")]
    Forbidden { url: String },

    #[error("Nothing at {url}")]
    NotFound { url: String },

    #[error("Still rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Server error {status}: {body}")]
    Server { status: StatusCode, body: String },

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Longest response body kept in an error
const MAX_ERROR_BODY_LENGTH: usize = 500;

fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    /// Error for a final non-success response. 429 is retried by the
    /// client and never reaches here.
    pub fn from_status(status: StatusCode, url: &str, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
            StatusCode::FORBIDDEN => ApiError::Forbidden { url: url.to_string() },
            StatusCode::NOT_FOUND => ApiError::NotFound { url: url.to_string() },
            s if s.is_server_error() => ApiError::Server {
                status,
                body: truncate_body(body),
            },
            _ => ApiError::UnexpectedStatus {
                status,
                body: truncate_body(body),
            },
        }
    }
}
