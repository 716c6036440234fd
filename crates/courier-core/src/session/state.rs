use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::{Claims, Role};
use crate::realtime::ConnectionState;

/// Renew this long before the credential actually expires.
pub const DEFAULT_SAFETY_MARGIN_SECS: u64 = 300;

/// Give up on a realtime handshake after this long.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub safety_margin: Duration,
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(DEFAULT_SAFETY_MARGIN_SECS),
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    LoggedOut,
    Authenticating,
    Active,
    Renewing,
}

/// Why the most recent session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionEnd {
    LoggedOut,
    RenewalTransportFailure,
    RenewalRejected,
    StoreFailure,
}

impl SessionEnd {
    /// True when the session ended without the user asking for it.
    pub fn was_forced(&self) -> bool {
        !matches!(self, SessionEnd::LoggedOut)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            SessionEnd::LoggedOut => "Logged out.",
            SessionEnd::RenewalTransportFailure => {
                "Lost contact with the server. Please log in again."
            }
            SessionEnd::RenewalRejected => "Session expired. Please log in again.",
            SessionEnd::StoreFailure => "Session could not be saved. Please log in again.",
        }
    }
}

/// Snapshot of the live session handed to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub subject: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub connection: ConnectionState,
}

impl Session {
    pub(crate) fn from_claims(claims: &Claims, connection: ConnectionState) -> Self {
        Self {
            subject: claims.subject.clone(),
            role: claims.role,
            expires_at: claims.expires_at,
            connection,
        }
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at - Utc::now()).num_minutes().max(0)
    }
}
