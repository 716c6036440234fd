use thiserror::Error;

use crate::api::AuthorityError;

/// Errors surfaced to the UI layer by `login` and `logout`.
///
/// Renewal failures never appear here; they end the session and are reported
/// through `SessionManager::last_end`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Authentication rejected: {0}")]
    AuthenticationRejected(#[source] AuthorityError),

    #[error("Authentication failed: {0}")]
    Authority(#[source] AuthorityError),

    #[error("Login was superseded by a newer login or logout")]
    Superseded,

    #[error("Credential store failure: {0:#}")]
    Store(anyhow::Error),
}

impl From<AuthorityError> for SessionError {
    fn from(err: AuthorityError) -> Self {
        if err.is_rejection() {
            SessionError::AuthenticationRejected(err)
        } else {
            SessionError::Authority(err)
        }
    }
}

impl SessionError {
    /// Short message suitable for a login form.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::AuthenticationRejected(_) => "Invalid username or password".to_string(),
            SessionError::Authority(AuthorityError::NetworkError(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            SessionError::Authority(AuthorityError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            SessionError::Authority(AuthorityError::RateLimited) => {
                "Too many attempts. Please wait and try again.".to_string()
            }
            SessionError::Authority(e) => format!("Login failed: {}", e),
            SessionError::Superseded => "Login cancelled".to_string(),
            SessionError::Store(e) => format!("Could not save session: {:#}", e),
        }
    }
}
