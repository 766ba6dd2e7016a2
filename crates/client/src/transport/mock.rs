//! In-memory connector for channel tests

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

use super::{Connector, TransportError, TransportEvent, TransportLink, WireFrame};

#[derive(Debug, Clone, Copy)]
pub(crate) enum MockOutcome {
    Accept,
    Refuse,
    /// Never completes
    Hang,
    /// Accepts after a delay
    Delay(Duration),
}

/// Server side of one accepted mock connection
pub(crate) struct MockServer {
    pub url: Url,
    pub received: mpsc::UnboundedReceiver<WireFrame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockServer {
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Frame(frame.into()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.events.send(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    /// Everything the client wrote so far, without waiting
    pub fn drain(&mut self) -> Vec<WireFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.received.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Text frames written so far, parsed as JSON
    pub fn drain_json(&mut self) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter_map(|frame| match frame {
                WireFrame::Text(text) => Some(serde_json::from_str(&text).unwrap()),
                WireFrame::Close { .. } => None,
            })
            .collect()
    }

    /// `type` of every text frame written so far
    pub fn drain_types(&mut self) -> Vec<String> {
        self.drain_json()
            .into_iter()
            .map(|value| value["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

struct Inner {
    script: VecDeque<MockOutcome>,
    attempts: Vec<(Instant, Url)>,
    servers: mpsc::UnboundedSender<MockServer>,
}

#[derive(Clone)]
pub(crate) struct MockConnector {
    inner: Arc<Mutex<Inner>>,
}

/// Test-side view of a [`MockConnector`]
pub(crate) struct MockHandle {
    inner: Arc<Mutex<Inner>>,
    servers: mpsc::UnboundedReceiver<MockServer>,
}

impl MockConnector {
    pub fn new() -> (Self, MockHandle) {
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Mutex::new(Inner {
            script: VecDeque::new(),
            attempts: Vec::new(),
            servers: servers_tx,
        }));
        (
            Self {
                inner: inner.clone(),
            },
            MockHandle {
                inner,
                servers: servers_rx,
            },
        )
    }
}

impl MockHandle {
    /// Queue outcomes for the next connection attempts; later ones accept
    pub fn script(&self, outcomes: &[MockOutcome]) {
        self.inner.lock().unwrap().script.extend(outcomes.iter().copied());
    }

    /// Wait for the next accepted connection
    pub async fn accept(&mut self) -> MockServer {
        self.servers.recv().await.unwrap()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(at, _)| *at)
            .collect()
    }

    pub fn attempt_urls(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .attempts
            .iter()
            .map(|(_, url)| url.to_string())
            .collect()
    }
}

impl Connector for MockConnector {
    fn connect(&self, url: Url) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        let inner = self.inner.clone();
        async move {
            let outcome = {
                let mut inner = inner.lock().unwrap();
                inner.attempts.push((Instant::now(), url.clone()));
                inner.script.pop_front().unwrap_or(MockOutcome::Accept)
            };

            match outcome {
                MockOutcome::Refuse => Err(TransportError::Connect("connection refused".to_string())),
                MockOutcome::Hang => std::future::pending().await,
                MockOutcome::Delay(_) | MockOutcome::Accept => {
                    if let MockOutcome::Delay(delay) = outcome {
                        tokio::time::sleep(delay).await;
                    }
                    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
                    let server = MockServer {
                        url,
                        received: outbound_rx,
                        events: inbound_tx,
                    };
                    let _ = inner.lock().unwrap().servers.send(server);
                    Ok(TransportLink {
                        outbound: outbound_tx,
                        inbound: inbound_rx,
                    })
                }
            }
        }
    }
}
