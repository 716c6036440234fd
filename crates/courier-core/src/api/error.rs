use thiserror::Error;

use crate::auth::CredentialError;

#[derive(Error, Debug)]
pub enum AuthorityError {
    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Unauthorized - credentials rejected")]
    Unauthorized,

    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Authority issued an unreadable token: {0}")]
    MalformedToken(#[from] CredentialError),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl AuthorityError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => AuthorityError::Unauthorized,
            403 => AuthorityError::AccessDenied(truncated),
            404 => AuthorityError::NotFound(truncated),
            429 => AuthorityError::RateLimited,
            500..=599 => AuthorityError::ServerError(truncated),
            _ => AuthorityError::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }

    /// True when the authority actively refused the request, as opposed to the
    /// exchange failing on the way.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuthorityError::Unauthorized
                | AuthorityError::AccessDenied(_)
                | AuthorityError::NotFound(_)
        )
    }
}
