//! Credentials and where they live.
//!
//! This module provides:
//! - `Credential`: a bearer token plus its decoded claims (subject, role, expiry)
//! - `CredentialStore`: persistence for the current credential, with file,
//!   OS keychain and in-memory implementations

pub mod credential;
pub mod store;

pub use credential::{Claims, Credential, CredentialError, Role};
pub use store::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};
