use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::api::{Authority, AuthorityError};
use crate::auth::Credential;

/// Why a renewal attempt did not produce a new credential.
///
/// Both kinds currently end the session; they are kept apart so callers can
/// treat a flaky network differently from a revoked account later on.
#[derive(Error, Debug)]
pub enum RenewalError {
    #[error("Renewal exchange failed: {0}")]
    Transport(#[source] AuthorityError),

    #[error("Authority refused renewal: {0}")]
    Rejected(#[source] AuthorityError),
}

impl From<AuthorityError> for RenewalError {
    fn from(err: AuthorityError) -> Self {
        if err.is_rejection() {
            RenewalError::Rejected(err)
        } else {
            RenewalError::Transport(err)
        }
    }
}

/// Performs one renewal exchange per call. Never retries and never touches
/// the credential store; persisting the result is the caller's decision.
#[derive(Clone)]
pub struct RenewalExecutor {
    authority: Arc<dyn Authority>,
}

impl RenewalExecutor {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        Self { authority }
    }

    pub async fn renew(&self, current: &Credential) -> Result<Credential, RenewalError> {
        match self.authority.renew(current).await {
            Ok(renewed) => {
                info!(
                    subject = %renewed.claims().subject,
                    expires_at = %renewed.claims().expires_at,
                    "Credential renewed"
                );
                Ok(renewed)
            }
            Err(e) => {
                let err = RenewalError::from(e);
                warn!(error = %err, "Credential renewal failed");
                Err(err)
            }
        }
    }
}
