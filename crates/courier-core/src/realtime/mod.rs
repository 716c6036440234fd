//! Realtime notification channel.
//!
//! `ConnectionCoordinator` decides when the channel is open; `WsTransport`
//! is the WebSocket connection it drives in production.

pub mod coordinator;
pub mod transport;

pub use coordinator::{ConnectionCoordinator, ConnectionState};
pub use transport::{Notification, RealtimeTransport, TransportError, WsTransport};
