//! Fakes for the session collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Notify;

use crate::api::{Authority, AuthorityError};
use crate::auth::Credential;
use crate::realtime::{RealtimeTransport, TransportError};

pub fn encode_segment(json: &str) -> String {
    URL_SAFE_NO_PAD.encode(json.as_bytes())
}

/// Build an unsigned compact JWT issued an hour ago.
pub fn make_token(subject: &str, role: &str, expires_at: DateTime<Utc>) -> String {
    make_token_issued_at(subject, role, Utc::now() - ChronoDuration::hours(1), expires_at)
}

pub fn make_token_issued_at(
    subject: &str,
    role: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> String {
    let header = encode_segment(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = encode_segment(
        &serde_json::json!({
            "sub": subject,
            "role": role,
            "exp": expires_at.timestamp(),
            "iat": issued_at.timestamp(),
        })
        .to_string(),
    );
    format!("{}.{}.signature", header, payload)
}

pub fn credential_expiring_at(subject: &str, expires_at: DateTime<Utc>) -> Credential {
    Credential::decode(make_token(subject, "courier", expires_at)).expect("test token should decode")
}

/// A credential freshly issued now, valid for `lifetime`.
pub fn fresh_credential(subject: &str, lifetime: ChronoDuration) -> Credential {
    let now = Utc::now();
    Credential::decode(make_token_issued_at(subject, "courier", now, now + lifetime))
        .expect("test token should decode")
}

// ============================================================================
// Authority
// ============================================================================

/// Scripted authority. Each call pops the next queued response; an empty
/// queue answers `Unauthorized`.
#[derive(Default)]
pub struct FakeAuthority {
    logins: Mutex<VecDeque<Result<Credential, AuthorityError>>>,
    renewals: Mutex<VecDeque<Result<Credential, AuthorityError>>>,
    login_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    renew_gate: Mutex<Option<Arc<Notify>>>,
    login_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_login(&self, result: Result<Credential, AuthorityError>) {
        self.logins.lock().unwrap().push_back(result);
    }

    pub fn push_renewal(&self, result: Result<Credential, AuthorityError>) {
        self.renewals.lock().unwrap().push_back(result);
    }

    /// Make renewals wait until the returned handle is notified.
    pub fn gate_renewals(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.renew_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make logins wait until the returned handle is notified.
    pub fn gate_logins(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.login_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authority for FakeAuthority {
    async fn authenticate(&self, _identifier: &str, _secret: &str) -> Result<Credential, AuthorityError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AuthorityError::Unauthorized));
        let gate = self.login_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        result
    }

    async fn renew(&self, _current: &Credential) -> Result<Credential, AuthorityError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        let result = self
            .renewals
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(AuthorityError::Unauthorized));
        let gate = self.renew_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        result
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub enum ConnectMode {
    Succeed,
    Fail,
    Hang,
    Delay(Duration),
}

type ConnectHook = Box<dyn FnOnce() + Send>;

pub struct FakeTransport {
    mode: Mutex<ConnectMode>,
    on_connect: Mutex<Option<ConnectHook>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl FakeTransport {
    pub fn new(mode: ConnectMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            on_connect: Mutex::new(None),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    /// Run `hook` once, right before the next successful `connect` returns.
    pub fn on_connect(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_connect.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mode = *self.mode.lock().unwrap();
        match mode {
            ConnectMode::Succeed => {}
            ConnectMode::Fail => return Err(TransportError::NoCredential),
            ConnectMode::Hang => std::future::pending::<()>().await,
            ConnectMode::Delay(delay) => tokio::time::sleep(delay).await,
        }
        let hook = self.on_connect.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
