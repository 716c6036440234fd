//! REST client module for the courier platform authority.
//!
//! The authority issues bearer tokens at login and exchanges a live token for
//! a fresh one on renewal. Everything else the platform API offers belongs to
//! the UI layer.

pub mod client;
pub mod error;

pub use client::{Authority, HttpAuthority};
pub use error::AuthorityError;
