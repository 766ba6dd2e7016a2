//! WebSocket transport (tokio-tungstenite)
//!
//! Each connection runs two tasks: a writer draining the outbound queue into
//! the socket and a reader forwarding text frames. Either side reporting a
//! failure ends the link with a `Closed` event carrying code 1006.

use std::future::Future;
use std::time::Duration;

use chatwire_shared::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use url::Url;

use super::{Connector, TransportError, TransportEvent, TransportLink, WireFrame};
use crate::config::ChannelConfig;

/// Close code reported when the peer closed without a status
const CLOSE_NO_STATUS: u16 = 1005;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens WebSocket connections
#[derive(Debug, Clone)]
pub struct WsConnector {
    origin: Option<String>,
    cookie: Option<String>,
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            origin: None,
            cookie: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WsConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector sending the configured origin and session cookie
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            origin: Some(config.origin.origin().ascii_serialization()),
            cookie: config.cookie.clone(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, url: Url) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        let origin = self.origin.clone();
        let cookie = self.cookie.clone();
        let connect_timeout = self.connect_timeout;

        async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

            if let Some(origin) = origin {
                request.headers_mut().insert("Origin", header_value(&origin)?);
            }
            if let Some(cookie) = cookie {
                request.headers_mut().insert("Cookie", header_value(&cookie)?);
            }

            let stream = match tokio::time::timeout(connect_timeout, connect_async(request)).await {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(tungstenite::Error::Http(response))) => {
                    return Err(TransportError::Http {
                        status: response.status().as_u16(),
                    });
                }
                Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
                Err(_) => return Err(TransportError::Timeout),
            };

            tracing::debug!(url = %url, "WebSocket handshake complete");
            Ok(spawn_link(stream))
        }
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Connect(format!("invalid header value: {}", e)))
}

/// Wire a connected socket to a pair of channels
pub(crate) fn spawn_link<S>(stream: WebSocketStream<S>) -> TransportLink
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut source) = stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WireFrame>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let writer_events = inbound_tx.clone();

    tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let (message, closing) = match frame {
                WireFrame::Text(text) => (Message::Text(text), false),
                WireFrame::Close { code, reason } => (
                    Message::Close(Some(CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    })),
                    true,
                ),
            };

            if let Err(e) = sink.send(message).await {
                tracing::warn!(error = %e, "WebSocket write failed");
                let _ = writer_events.send(TransportEvent::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: e.to_string(),
                });
                return;
            }
            if closing {
                return;
            }
        }

        // Every sender is gone: nobody will write again
        let _ = sink.close().await;
    });

    tokio::spawn(async move {
        let mut closed = (CLOSE_ABNORMAL, "connection lost".to_string());

        while let Some(message) = source.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(TransportEvent::Frame(text)).is_err() {
                        return;
                    }
                }
                Ok(Message::Close(frame)) => {
                    closed = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.into_owned()),
                        None => (CLOSE_NO_STATUS, String::new()),
                    };
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    closed = (CLOSE_ABNORMAL, e.to_string());
                    break;
                }
            }
        }

        if closed.0 == CLOSE_NORMAL {
            tracing::debug!("WebSocket closed normally");
        }
        let _ = inbound_tx.send(TransportEvent::Closed {
            code: closed.0,
            reason: closed.1,
        });
    });

    TransportLink {
        outbound: outbound_tx,
        inbound: inbound_rx,
    }
}
