//! Courier session core.
//!
//! This crate owns the authenticated session lifecycle of the courier client:
//! deciding whether the held credential is still valid, renewing it before it
//! expires, and keeping the realtime notification channel open exactly while a
//! session is live.
//!
//! The UI layer builds one [`SessionManager`] at startup and hands clones of it
//! to whatever needs session state. Everything the manager talks to sits
//! behind a trait so it can be swapped out:
//!
//! - [`CredentialStore`]: where the current token is persisted
//! - [`Authority`]: the remote login/refresh endpoints
//! - [`RealtimeTransport`]: the live notification connection

pub mod api;
pub mod auth;
pub mod config;
pub mod realtime;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{Authority, AuthorityError, HttpAuthority};
pub use auth::{
    Claims, Credential, CredentialError, CredentialStore, FileCredentialStore,
    KeyringCredentialStore, MemoryCredentialStore, Role,
};
pub use config::{Config, CredentialBackend};
pub use realtime::{
    ConnectionCoordinator, ConnectionState, Notification, RealtimeTransport, TransportError,
    WsTransport,
};
pub use session::{
    ArmOutcome, ExpiryScheduler, RenewalError, RenewalExecutor, Session, SessionConfig,
    SessionEnd, SessionError, SessionManager, SessionState,
};
