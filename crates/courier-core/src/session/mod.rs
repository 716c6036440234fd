//! Authenticated session lifecycle.
//!
//! This module provides:
//! - `SessionManager`: the entry point for login, logout, startup restore and
//!   validity checks
//! - `ExpiryScheduler`: the single renewal timer
//! - `RenewalExecutor`: one renewal exchange per call, typed failures
//!
//! Renewal happens `safety_margin` (5 minutes by default) before the
//! credential expires. A failed renewal ends the session; there is no retry.

pub mod error;
pub mod manager;
pub mod renewal;
pub mod scheduler;
pub mod state;

pub use error::SessionError;
pub use manager::SessionManager;
pub use renewal::{RenewalError, RenewalExecutor};
pub use scheduler::{ArmOutcome, ExpiryScheduler};
pub use state::{Session, SessionConfig, SessionEnd, SessionState};
