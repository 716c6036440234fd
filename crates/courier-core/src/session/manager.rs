//! Session lifecycle: login, logout, startup restore and background renewal.
//!
//! The manager is the only writer of the credential store and the realtime
//! connection. All state lives behind one mutex that is never held across an
//! `.await`; asynchronous completions (login responses, renewal responses,
//! timer fires) capture the generation they started under and drop their
//! result if a login or logout has happened since.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::api::Authority;
use crate::auth::{Claims, CredentialStore, Role};
use crate::realtime::{ConnectionCoordinator, ConnectionState, RealtimeTransport};

use super::{
    ArmOutcome, ExpiryScheduler, RenewalError, RenewalExecutor, Session, SessionConfig,
    SessionEnd, SessionError, SessionState,
};

struct Inner {
    state: SessionState,
    generation: u64,
    /// Decoded from the stored credential; the token itself stays in the store.
    claims: Option<Claims>,
    scheduler: ExpiryScheduler,
    last_end: Option<SessionEnd>,
}

struct Shared {
    store: Arc<dyn CredentialStore>,
    authority: Arc<dyn Authority>,
    renewal: RenewalExecutor,
    connection: ConnectionCoordinator,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to the process-wide session. Clone is cheap; all clones drive the
/// same session.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<Shared>,
}

impl SessionManager {
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn CredentialStore>,
        authority: Arc<dyn Authority>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        info!(
            safety_margin_secs = config.safety_margin.as_secs(),
            handshake_timeout_secs = config.handshake_timeout.as_secs(),
            "Session manager created"
        );
        Self {
            shared: Arc::new(Shared {
                store,
                renewal: RenewalExecutor::new(Arc::clone(&authority)),
                authority,
                connection: ConnectionCoordinator::new(transport, config.handshake_timeout),
                inner: Mutex::new(Inner {
                    state: SessionState::LoggedOut,
                    generation: 0,
                    claims: None,
                    scheduler: ExpiryScheduler::new(config.safety_margin),
                    last_end: None,
                }),
            }),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Authenticate and start a session. Any current session is ended first.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Session, SessionError> {
        let generation = {
            let mut inner = self.shared.lock();
            if inner.state != SessionState::LoggedOut {
                info!(state = ?inner.state, "Ending current session for new login");
                if let Err(e) = self.end_session(&mut inner, SessionEnd::LoggedOut) {
                    error!(error = %format!("{:#}", e), "Failed to clear previous credential");
                }
            }
            inner.generation += 1;
            inner.state = SessionState::Authenticating;
            inner.generation
        };

        info!(identifier = identifier, "Authenticating");
        let result = self.shared.authority.authenticate(identifier, secret).await;

        let mut inner = self.shared.lock();
        if inner.generation != generation {
            debug!(generation, current = inner.generation, "Discarding superseded login");
            return Err(SessionError::Superseded);
        }

        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                inner.state = SessionState::LoggedOut;
                warn!(error = %e, "Login failed");
                return Err(e.into());
            }
        };

        if let Err(e) = self.shared.store.save(&credential) {
            inner.state = SessionState::LoggedOut;
            error!(error = %format!("{:#}", e), "Failed to save credential");
            return Err(SessionError::Store(e));
        }

        let (_, claims) = credential.into_parts();
        info!(subject = %claims.subject, role = ?claims.role, "Login successful");
        Ok(self.activate(&mut inner, claims))
    }

    /// End the session. Safe to call at any time, any number of times.
    pub fn logout(&self) -> Result<(), SessionError> {
        let mut inner = self.shared.lock();
        if inner.state == SessionState::LoggedOut {
            inner.generation += 1;
            // Nothing live, but a stale credential may still be on disk
            return self.shared.store.clear().map_err(SessionError::Store);
        }
        info!(state = ?inner.state, "Logging out");
        self.end_session(&mut inner, SessionEnd::LoggedOut)
            .map_err(SessionError::Store)
    }

    /// Pick up a session persisted by a previous run.
    ///
    /// Returns `None` if nothing is stored, the stored credential cannot be
    /// read, or it has already expired. An expired credential is left where
    /// it is and no renewal is attempted.
    pub fn restore_on_startup(&self) -> Option<Session> {
        let mut inner = self.shared.lock();
        if inner.state != SessionState::LoggedOut {
            let connection = self.shared.connection.state();
            return inner
                .claims
                .as_ref()
                .map(|claims| Session::from_claims(claims, connection));
        }

        let credential = match self.shared.store.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!("No stored session");
                return None;
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Stored session unreadable");
                return None;
            }
        };

        let (_, claims) = credential.into_parts();
        if claims.is_expired() {
            info!(expired_at = %claims.expires_at, "Stored session already expired");
            return None;
        }

        inner.generation += 1;
        info!(subject = %claims.subject, expires_at = %claims.expires_at, "Restoring session");
        Some(self.activate(&mut inner, claims))
    }

    /// Whether a session is live and its credential has not expired. No I/O.
    pub fn is_valid(&self) -> bool {
        let inner = self.shared.lock();
        matches!(inner.state, SessionState::Active | SessionState::Renewing)
            && inner.claims.as_ref().is_some_and(|claims| !claims.is_expired())
    }

    // =========================================================================
    // Derived state
    // =========================================================================

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn session(&self) -> Option<Session> {
        let inner = self.shared.lock();
        let connection = self.shared.connection.state();
        inner
            .claims
            .as_ref()
            .map(|claims| Session::from_claims(claims, connection))
    }

    pub fn role(&self) -> Option<Role> {
        self.shared.lock().claims.as_ref().map(|claims| claims.role)
    }

    pub fn subject(&self) -> Option<String> {
        self.shared
            .lock()
            .claims
            .as_ref()
            .map(|claims| claims.subject.clone())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.shared.connection.subscribe()
    }

    /// Why the previous session ended, if one has.
    pub fn last_end(&self) -> Option<SessionEnd> {
        self.shared.lock().last_end
    }

    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn renewal_pending(&self) -> bool {
        self.shared.lock().scheduler.is_armed()
    }

    pub fn pending_renewal_delay(&self) -> Option<Duration> {
        self.shared.lock().scheduler.pending_delay()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn activate(&self, inner: &mut Inner, claims: Claims) -> Session {
        inner.state = SessionState::Active;
        self.arm_renewal(inner, &claims);
        self.shared.connection.open();
        let session = Session::from_claims(&claims, self.shared.connection.state());
        inner.claims = Some(claims);
        session
    }

    fn arm_renewal(&self, inner: &mut Inner, claims: &Claims) {
        let weak = Arc::downgrade(&self.shared);
        let generation = inner.generation;

        let outcome = inner.scheduler.arm(claims, move |timer| async move {
            if let Some(shared) = weak.upgrade() {
                SessionManager { shared }.on_renewal_due(generation, timer).await;
            }
        });

        match outcome {
            ArmOutcome::Armed { delay } => {
                debug!(generation, delay_secs = delay.as_secs(), "Renewal scheduled");
            }
            ArmOutcome::RenewNow => {
                info!(generation, "Credential inside safety margin, renewing now");
            }
        }
    }

    async fn on_renewal_due(&self, generation: u64, timer: u64) {
        let current = {
            let mut inner = self.shared.lock();
            if !inner.scheduler.claim_fired(timer)
                || inner.generation != generation
                || inner.state != SessionState::Active
            {
                debug!(generation, timer, "Ignoring stale renewal timer");
                return;
            }
            inner.state = SessionState::Renewing;

            match self.shared.store.load() {
                Ok(Some(credential)) => credential,
                Ok(None) => {
                    warn!("Credential disappeared from the store before renewal");
                    self.force_end(&mut inner, SessionEnd::StoreFailure);
                    return;
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "Failed to load credential for renewal");
                    self.force_end(&mut inner, SessionEnd::StoreFailure);
                    return;
                }
            }
        };

        let result = self.shared.renewal.renew(&current).await;

        let mut inner = self.shared.lock();
        if inner.generation != generation || inner.state != SessionState::Renewing {
            debug!(generation, current = inner.generation, "Discarding renewal result for ended session");
            return;
        }

        match result {
            Ok(renewed) => {
                if let Err(e) = self.shared.store.save(&renewed) {
                    error!(error = %format!("{:#}", e), "Failed to save renewed credential");
                    self.force_end(&mut inner, SessionEnd::StoreFailure);
                    return;
                }
                let (_, claims) = renewed.into_parts();
                inner.state = SessionState::Active;
                self.arm_renewal(&mut inner, &claims);
                inner.claims = Some(claims);
            }
            Err(RenewalError::Transport(_)) => {
                self.force_end(&mut inner, SessionEnd::RenewalTransportFailure);
            }
            Err(RenewalError::Rejected(_)) => {
                self.force_end(&mut inner, SessionEnd::RenewalRejected);
            }
        }
    }

    /// End the session without a caller to report store errors to.
    fn force_end(&self, inner: &mut Inner, reason: SessionEnd) {
        warn!(?reason, "Session ended");
        if let Err(e) = self.end_session(inner, reason) {
            error!(error = %format!("{:#}", e), "Failed to clear credential");
        }
    }

    fn end_session(&self, inner: &mut Inner, reason: SessionEnd) -> Result<()> {
        inner.generation += 1;
        inner.state = SessionState::LoggedOut;
        inner.claims = None;
        inner.last_end = Some(reason);
        inner.scheduler.cancel();
        self.shared.connection.close();
        self.shared.store.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AuthorityError;
    use crate::auth::{Credential, FileCredentialStore, MemoryCredentialStore};
    use crate::test_support::{
        credential_expiring_at, fresh_credential, ConnectMode, FakeAuthority, FakeTransport,
    };
    use chrono::{Duration as ChronoDuration, Utc};

    struct Harness {
        manager: SessionManager,
        authority: Arc<FakeAuthority>,
        transport: Arc<FakeTransport>,
        store: Arc<MemoryCredentialStore>,
    }

    fn harness_with_store(store: MemoryCredentialStore) -> Harness {
        let authority = Arc::new(FakeAuthority::new());
        let transport = Arc::new(FakeTransport::new(ConnectMode::Succeed));
        let store = Arc::new(store);
        let manager = SessionManager::new(
            SessionConfig::default(),
            store.clone(),
            authority.clone(),
            transport.clone(),
        );
        Harness {
            manager,
            authority,
            transport,
            store,
        }
    }

    fn harness() -> Harness {
        harness_with_store(MemoryCredentialStore::new())
    }

    fn expiring_in(secs: i64) -> Credential {
        credential_expiring_at("courier-7", Utc::now() + ChronoDuration::seconds(secs))
    }

    /// Let spawned handshakes and zero-delay timers run.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn stored(h: &Harness) -> Option<Credential> {
        h.store.load().expect("memory store never fails")
    }

    // -------------------------------------------------------------------------
    // Login / Logout
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_login_arms_one_timer_and_connects() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(3600)));

        let session = h.manager.login("courier-7", "secret").await.expect("login");
        assert_eq!(session.subject, "courier-7");
        assert_eq!(h.manager.state(), SessionState::Active);
        assert!(h.manager.renewal_pending());

        let delay = h.manager.pending_renewal_delay().expect("timer armed");
        assert!(delay > Duration::from_secs(3290) && delay <= Duration::from_secs(3300));

        settle().await;
        assert_eq!(h.manager.connection_state(), ConnectionState::Connected);
        assert!(stored(&h).is_some());
        assert!(h.manager.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_failure_leaves_no_state() {
        let h = harness();
        h.authority.push_login(Err(AuthorityError::Unauthorized));

        let err = h.manager.login("courier-7", "wrong").await.expect_err("login should fail");
        assert!(matches!(err, SessionError::AuthenticationRejected(AuthorityError::Unauthorized)));

        settle().await;
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert!(!h.manager.renewal_pending());
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.connects(), 0);
        assert!(stored(&h).is_none());
        assert!(h.manager.session().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_transport_error_propagates() {
        let h = harness();
        h.authority.push_login(Err(AuthorityError::ServerError("maintenance".into())));

        let err = h.manager.login("courier-7", "secret").await.expect_err("login should fail");
        assert!(matches!(err, SessionError::Authority(AuthorityError::ServerError(_))));
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_is_idempotent() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(3600)));
        h.manager.login("courier-7", "secret").await.expect("login");
        settle().await;

        h.manager.logout().expect("first logout");
        let after_once = (
            h.manager.state(),
            h.manager.connection_state(),
            h.manager.renewal_pending(),
            stored(&h).is_some(),
            h.manager.last_end(),
        );

        h.manager.logout().expect("second logout");
        let after_twice = (
            h.manager.state(),
            h.manager.connection_state(),
            h.manager.renewal_pending(),
            stored(&h).is_some(),
            h.manager.last_end(),
        );

        assert_eq!(after_once, after_twice);
        assert_eq!(
            after_once,
            (
                SessionState::LoggedOut,
                ConnectionState::Disconnected,
                false,
                false,
                Some(SessionEnd::LoggedOut)
            )
        );
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_without_session() {
        let h = harness();
        h.manager.logout().expect("logout");
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.last_end(), None);
        assert!(!h.manager.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_replaces_active_session() {
        let h = harness();
        h.authority.push_login(Ok(credential_expiring_at(
            "alice",
            Utc::now() + ChronoDuration::hours(1),
        )));
        h.authority.push_login(Ok(credential_expiring_at(
            "bob",
            Utc::now() + ChronoDuration::hours(1),
        )));

        h.manager.login("alice", "a").await.expect("first login");
        settle().await;
        h.manager.login("bob", "b").await.expect("second login");
        settle().await;

        assert_eq!(h.manager.subject().as_deref(), Some("bob"));
        assert_eq!(stored(&h).expect("stored").claims().subject, "bob");
        assert!(h.manager.renewal_pending());
        assert_eq!(h.manager.connection_state(), ConnectionState::Connected);
        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.transport.disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_supersedes_login_in_flight() {
        let h = harness();
        let gate = h.authority.gate_logins();
        h.authority.push_login(Ok(expiring_in(3600)));

        let manager = h.manager.clone();
        let login = tokio::spawn(async move { manager.login("courier-7", "secret").await });
        settle().await;
        assert_eq!(h.manager.state(), SessionState::Authenticating);

        h.manager.logout().expect("logout");
        gate.notify_one();

        let result = login.await.expect("login task panicked");
        assert!(matches!(result, Err(SessionError::Superseded)));
        assert_eq!(h.authority.login_calls(), 1);

        settle().await;
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert!(stored(&h).is_none());
        assert!(!h.manager.renewal_pending());
    }

    // -------------------------------------------------------------------------
    // Restore
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_restore_expired_returns_none() {
        let h = harness_with_store(MemoryCredentialStore::with_credential(expiring_in(-60)));

        assert!(h.manager.restore_on_startup().is_none());

        settle().await;
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert!(!h.manager.renewal_pending());
        assert_eq!(h.authority.renew_calls(), 0);
        assert_eq!(h.transport.connects(), 0);
        // No side effects: the expired credential is left alone
        assert!(stored(&h).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_valid_session() {
        let h = harness_with_store(MemoryCredentialStore::with_credential(expiring_in(3600)));

        let session = h.manager.restore_on_startup().expect("session restored");
        assert_eq!(session.subject, "courier-7");
        assert_eq!(h.manager.state(), SessionState::Active);
        assert!(h.manager.renewal_pending());

        settle().await;
        assert_eq!(h.manager.connection_state(), ConnectionState::Connected);
        assert_eq!(h.authority.renew_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_empty_store() {
        let h = harness();
        assert!(h.manager.restore_on_startup().is_none());
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_unreadable_store_is_no_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("session.json"), "garbage").expect("write");

        let manager = SessionManager::new(
            SessionConfig::default(),
            Arc::new(FileCredentialStore::new(dir.path().to_path_buf())),
            Arc::new(FakeAuthority::new()),
            Arc::new(FakeTransport::new(ConnectMode::Succeed)),
        );
        assert!(manager.restore_on_startup().is_none());
        assert_eq!(manager.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restore_inside_margin_renews_immediately() {
        let h = harness_with_store(MemoryCredentialStore::with_credential(expiring_in(60)));
        let renewed = expiring_in(3600);
        h.authority.push_renewal(Ok(renewed.clone()));

        h.manager.restore_on_startup().expect("session restored");
        settle().await;

        assert_eq!(h.authority.renew_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::Active);
        assert_eq!(stored(&h), Some(renewed));

        let delay = h.manager.pending_renewal_delay().expect("timer re-armed");
        assert!(delay > Duration::from_secs(3290));
    }

    // -------------------------------------------------------------------------
    // Renewal
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_renewal_success_rearms() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(600)));
        let renewed = expiring_in(3600);
        h.authority.push_renewal(Ok(renewed.clone()));

        h.manager.login("courier-7", "secret").await.expect("login");
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(h.authority.renew_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::Active);
        assert_eq!(stored(&h), Some(renewed));
        assert!(h.manager.renewal_pending());
        assert!(h.manager.pending_renewal_delay().expect("armed") > Duration::from_secs(3290));
        assert_eq!(h.manager.connection_state(), ConnectionState::Connected);
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_lived_renewals_do_not_spin() {
        let h = harness();
        // Every token the authority hands out is shorter than the margin
        h.authority.push_login(Ok(fresh_credential("courier-7", ChronoDuration::seconds(200))));
        for _ in 0..20 {
            h.authority
                .push_renewal(Ok(fresh_credential("courier-7", ChronoDuration::seconds(200))));
        }

        h.manager.login("courier-7", "secret").await.expect("login");
        settle().await;
        assert_eq!(h.authority.renew_calls(), 0);
        let delay = h.manager.pending_renewal_delay().expect("timer armed");
        assert!(delay > Duration::from_secs(98) && delay <= Duration::from_secs(100));

        tokio::time::sleep(Duration::from_secs(101)).await;
        assert_eq!(h.authority.renew_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::Active);
        assert!(h.manager.pending_renewal_delay().expect("re-armed") > Duration::from_secs(98));

        tokio::time::sleep(Duration::from_secs(400)).await;
        assert!(h.authority.renew_calls() <= 5);
        assert!(h.manager.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_rejected_forces_logout() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(600)));
        h.authority
            .push_renewal(Err(AuthorityError::AccessDenied("token revoked".into())));

        h.manager.login("courier-7", "secret").await.expect("login");
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert!(stored(&h).is_none());
        assert!(!h.manager.renewal_pending());
        assert_eq!(h.manager.last_end(), Some(SessionEnd::RenewalRejected));
        assert!(!h.manager.is_valid());
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_transport_failure_forces_logout() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(600)));
        h.authority
            .push_renewal(Err(AuthorityError::ServerError("bad gateway".into())));

        h.manager.login("courier-7", "secret").await.expect("login");
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert!(stored(&h).is_none());
        assert_eq!(h.manager.last_end(), Some(SessionEnd::RenewalTransportFailure));
        // No retry
        assert_eq!(h.authority.renew_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_renewal_after_logout_is_ignored() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(600)));
        h.authority.push_renewal(Ok(expiring_in(3600)));
        let gate = h.authority.gate_renewals();

        h.manager.login("courier-7", "secret").await.expect("login");
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(h.manager.state(), SessionState::Renewing);
        assert!(!h.manager.renewal_pending());

        h.manager.logout().expect("logout");
        gate.notify_one();
        settle().await;

        assert_eq!(h.authority.renew_calls(), 1);
        assert_eq!(h.manager.state(), SessionState::LoggedOut);
        assert_eq!(h.manager.connection_state(), ConnectionState::Disconnected);
        assert!(stored(&h).is_none());
        assert!(!h.manager.renewal_pending());
        assert_eq!(h.transport.connects(), 1);
        assert_eq!(h.manager.last_end(), Some(SessionEnd::LoggedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_while_renewing() {
        let h = harness();
        h.authority.push_login(Ok(expiring_in(600)));
        let _gate = h.authority.gate_renewals();

        h.manager.login("courier-7", "secret").await.expect("login");
        tokio::time::sleep(Duration::from_secs(301)).await;

        assert_eq!(h.manager.state(), SessionState::Renewing);
        assert!(h.manager.is_valid());
        assert_eq!(h.manager.role(), Some(Role::Courier));
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_renewal_per_session() {
        let h = harness();
        for _ in 0..3 {
            h.authority.push_login(Ok(expiring_in(600)));
        }
        h.authority.push_renewal(Ok(expiring_in(3600)));

        // Each login replaces the previous timer, and a logout in between
        // cancels one outright
        h.manager.login("courier-7", "secret").await.expect("login");
        assert!(h.manager.renewal_pending());
        h.manager.logout().expect("logout");
        assert!(!h.manager.renewal_pending());
        h.manager.login("courier-7", "secret").await.expect("login");
        h.manager.login("courier-7", "secret").await.expect("login");
        assert!(h.manager.renewal_pending());

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(h.authority.renew_calls(), 1);
        assert!(h.manager.renewal_pending());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(h.authority.renew_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_advances_on_every_transition() {
        let h = harness();
        let start = h.manager.generation();
        h.authority.push_login(Ok(expiring_in(3600)));

        h.manager.login("courier-7", "secret").await.expect("login");
        let after_login = h.manager.generation();
        assert!(after_login > start);

        h.manager.logout().expect("logout");
        assert!(h.manager.generation() > after_login);
    }
}
