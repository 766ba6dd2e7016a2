//! Transports a channel can ride on
//!
//! A [`Connector`] opens one connection and hands back a [`TransportLink`]:
//! an outbound sender for frames and an inbound receiver for what the peer
//! sent. The link ends with exactly one [`TransportEvent::Closed`], or with
//! the receiver returning `None` if the connection task died.

pub mod sse;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

use std::future::Future;

use tokio::sync::mpsc;
use url::Url;

pub use sse::{SseEvent, SseParser};
pub use websocket::WsConnector;

/// Frame written to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// Something the transport observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed { code: u16, reason: String },
}

/// An open connection
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<WireFrame>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Server answered the handshake with HTTP {status}")]
    Http { status: u16 },
    #[error("Connection timed out")]
    Timeout,
}

/// Opens connections for a channel
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: Url) -> impl Future<Output = Result<TransportLink, TransportError>> + Send;
}
