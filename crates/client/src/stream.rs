//! Read-only SSE event stream
//!
//! Fallback for environments where the WebSocket channel cannot stay up.
//! Events are dispatched through the same [`HandlerRegistry`] as the
//! channel, so consumers register their handlers once. Reconnects follow the
//! channel's backoff policy and replay the last seen event id.

use std::sync::Arc;
use std::time::Duration;

use chatwire_shared::{ConnectionState, Decoded, InboundEvent};
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, COOKIE};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::backoff::ReconnectBackoff;
use crate::config::{ChannelConfig, ConfigError};
use crate::dispatch::HandlerRegistry;
use crate::transport::{SseEvent, SseParser, TransportError};

/// Handle to a running SSE stream
pub struct EventStream {
    state: watch::Receiver<ConnectionState>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EventStream {
    /// Start streaming `<origin>/<stream_resource>/stream/`
    pub fn open(
        http: reqwest::Client,
        config: &ChannelConfig,
        registry: Arc<HandlerRegistry>,
    ) -> Result<Self, ConfigError> {
        let url = config.stream_url()?;
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = StreamWorker {
            http,
            url,
            cookie: config.cookie.clone(),
            registry,
            backoff: ReconnectBackoff::from_config(config),
            state: state_tx,
            last_event_id: None,
            retry_hint: None,
        };
        let task = tokio::spawn(worker.run(shutdown_rx));

        Ok(Self {
            state: state_rx,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop streaming and wait for the task to finish
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct StreamWorker {
    http: reqwest::Client,
    url: Url,
    cookie: Option<String>,
    registry: Arc<HandlerRegistry>,
    backoff: ReconnectBackoff,
    state: watch::Sender<ConnectionState>,
    last_event_id: Option<String>,
    retry_hint: Option<Duration>,
}

impl StreamWorker {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            self.state.send_replace(ConnectionState::Connecting);

            let result = tokio::select! {
                _ = &mut shutdown => break,
                result = self.read_once() => result,
            };
            match result {
                Ok(()) => tracing::info!(url = %self.url, "Event stream ended by server"),
                Err(e) => tracing::warn!(url = %self.url, error = %e, "Event stream failed"),
            }

            let Some(delay) = self.backoff.next() else {
                tracing::error!(
                    url = %self.url,
                    attempts = self.backoff.attempt(),
                    "Event stream reconnect attempts exhausted"
                );
                self.state.send_replace(ConnectionState::Failed);
                return;
            };
            let delay = self.retry_hint.map_or(delay, |hint| hint.max(delay));

            self.state.send_replace(ConnectionState::Reconnecting);
            tracing::info!(
                attempt = self.backoff.attempt(),
                max_attempts = self.backoff.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting event stream"
            );

            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        tracing::debug!(url = %self.url, "Event stream closed");
    }

    /// One connection, until the body ends or fails
    async fn read_once(&mut self) -> Result<(), TransportError> {
        let mut request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header("Last-Event-ID", id.as_str());
        }
        if let Some(cookie) = &self.cookie {
            request = request.header(COOKIE, cookie.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
            });
        }

        self.state.send_replace(ConnectionState::Connected);
        tracing::info!(url = %self.url, "Event stream connected");

        // Backoff restarts only once the stream delivers something
        let mut delivered = false;
        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| TransportError::Connect(e.to_string()))?;
            for event in parser.feed(&chunk) {
                if !delivered {
                    delivered = true;
                    self.backoff.reset();
                }
                if let Some(id) = &event.id {
                    self.last_event_id = Some(id.clone());
                }
                dispatch_sse(&self.registry, &event);
            }
            if let Some(retry) = parser.retry() {
                self.retry_hint = Some(retry);
            }
        }

        Ok(())
    }
}

/// Route one SSE event into the registry
///
/// A named event other than `message` supplies the discriminator; otherwise
/// the JSON `type`/`kind` field does. Returns the number of handlers invoked.
pub(crate) fn dispatch_sse(registry: &HandlerRegistry, event: &SseEvent) -> usize {
    let value: Value = match serde_json::from_str(&event.data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(event = ?event.event, error = %e, "Malformed SSE payload; dropped");
            return 0;
        }
    };

    let name = event.event.as_deref().filter(|name| *name != "message");
    match InboundEvent::from_value(value, name) {
        Ok(Decoded::Event(inbound)) => registry.dispatch(&inbound),
        Ok(Decoded::Unknown { discriminator }) => {
            tracing::warn!(kind = %discriminator, "Unknown SSE event kind; dropped");
            0
        }
        Err(e) => {
            tracing::warn!(event = ?event.event, error = %e, "Unroutable SSE event; dropped");
            0
        }
    }
}
