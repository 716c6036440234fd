//! WebSocket transport for live package notifications.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::CredentialStore;

/// Buffer size for the notification broadcast channel.
/// Slow subscribers lag and skip rather than stall the socket reader.
const NOTIFICATION_BUFFER_SIZE: usize = 64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No credential available to authenticate the realtime channel")]
    NoCredential,

    #[error("Credential store failure: {0}")]
    Store(String),

    #[error("Token cannot be sent as a header")]
    InvalidToken,

    #[error("Handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Handshake timed out after {0:?}")]
    Timeout(Duration),
}

/// A persistent realtime connection.
///
/// `connect` resolves once the handshake completes. Reconnecting after the
/// remote end drops is the transport's own business.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;

    fn disconnect(&self);
}

/// A server push on the realtime channel, e.g. a package status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsTransport {
    url: String,
    store: Arc<dyn CredentialStore>,
    notifications: broadcast::Sender<Notification>,
    running: Mutex<Option<CancellationToken>>,
}

impl WsTransport {
    /// The transport authenticates with whatever token `store` holds at
    /// connect time.
    pub fn new(url: impl Into<String>, store: Arc<dyn CredentialStore>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER_SIZE);
        Self {
            url: url.into(),
            store,
            notifications,
            running: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Whether a reader is still pumping frames. Turns false after
    /// `disconnect` and also when the server ends the connection.
    pub fn is_open(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|cancel| !cancel.is_cancelled())
    }

    fn bearer_header(&self) -> Result<HeaderValue, TransportError> {
        let credential = self
            .store
            .load()
            .map_err(|e| TransportError::Store(format!("{:#}", e)))?
            .ok_or(TransportError::NoCredential)?;
        HeaderValue::from_str(&format!("Bearer {}", credential.token()))
            .map_err(|_| TransportError::InvalidToken)
    }

    /// Pump frames until cancelled or the server goes away.
    async fn run(
        mut stream: WsStream,
        notifications: broadcast::Sender<Notification>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = stream.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    break;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Notification>(&text) {
                            Ok(notification) => {
                                debug!(event = %notification.event, "Notification received");
                                // No subscribers is fine
                                let _ = notifications.send(notification);
                            }
                            Err(e) => warn!(error = %e, "Ignoring unparseable realtime frame"),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Realtime channel closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Realtime channel error");
                        break;
                    }
                    None => break,
                },
            }
        }
        cancel.cancel();
        debug!("Realtime reader stopped");
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, self.bearer_header()?);

        let (stream, _response) = connect_async(request).await?;
        info!(url = %self.url, "Realtime channel connected");

        let cancel = CancellationToken::new();
        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(cancel.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tokio::spawn(Self::run(stream, self.notifications.clone(), cancel));
        Ok(())
    }

    fn disconnect(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cancel) = running {
            cancel.cancel();
            info!(url = %self.url, "Realtime channel disconnecting");
        }
    }
}
