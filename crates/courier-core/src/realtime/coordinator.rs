use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{RealtimeTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn display_name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        }
    }
}

struct Attempt {
    /// Bumped on every open and close so late handshakes can tell they lost.
    id: u64,
    handshake: Option<JoinHandle<()>>,
}

struct CoordinatorInner {
    transport: Arc<dyn RealtimeTransport>,
    handshake_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    attempt: Mutex<Attempt>,
}

/// Owns the open/closed state of the realtime transport.
///
/// `open` and `close` never block: the handshake runs on its own task and
/// reports back through the state channel. Clone is cheap and all clones
/// share the same connection.
#[derive(Clone)]
pub struct ConnectionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ConnectionCoordinator {
    pub fn new(transport: Arc<dyn RealtimeTransport>, handshake_timeout: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(CoordinatorInner {
                transport,
                handshake_timeout,
                state,
                attempt: Mutex::new(Attempt {
                    id: 0,
                    handshake: None,
                }),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Start a handshake unless one is already running or done.
    pub fn open(&self) {
        let mut attempt = self.inner.lock_attempt();
        if self.state() != ConnectionState::Disconnected {
            return;
        }

        attempt.id += 1;
        let id = attempt.id;
        self.inner.state.send_replace(ConnectionState::Connecting);
        debug!(attempt = id, "Realtime handshake starting");

        let inner = Arc::clone(&self.inner);
        attempt.handshake = Some(tokio::spawn(async move {
            inner.handshake(id).await;
        }));
    }

    /// Drop the connection, abandoning any handshake in flight.
    pub fn close(&self) {
        let mut attempt = self.inner.lock_attempt();
        if self.state() == ConnectionState::Disconnected {
            return;
        }

        attempt.id += 1;
        if let Some(handshake) = attempt.handshake.take() {
            handshake.abort();
        }
        self.inner.transport.disconnect();
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!("Realtime connection closed");
    }
}

impl CoordinatorInner {
    fn lock_attempt(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn handshake(&self, id: u64) {
        let outcome = match tokio::time::timeout(self.handshake_timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.handshake_timeout)),
        };

        let mut attempt = self.lock_attempt();
        if attempt.id != id {
            // Closed while we were connecting
            if outcome.is_ok() {
                self.transport.disconnect();
            }
            debug!(attempt = id, "Discarding stale handshake result");
            return;
        }
        attempt.handshake = None;

        match outcome {
            Ok(()) => {
                self.state.send_replace(ConnectionState::Connected);
                info!(attempt = id, "Realtime connection established");
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                warn!(attempt = id, error = %e, "Realtime handshake failed");
            }
        }
    }
}
