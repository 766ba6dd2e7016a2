//! Session-wide owner of the real-time pieces
//!
//! Built once per session and passed around by reference. Watches the
//! channel: when it fails the user gets a persistent notice and, if enabled,
//! the SSE stream takes over delivery into the same handler registry until
//! the channel is connected again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chatwire_shared::{ChannelId, ConnectionState};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::channel::RealtimeChannel;
use crate::config::ChannelConfig;
use crate::dispatch::HandlerRegistry;
use crate::error::ApiError;
use crate::http::ApiClient;
use crate::notify::{Notifier, ToastKind};
use crate::stream::EventStream;
use crate::transport::{Connector, WsConnector};

const CONNECTION_LOST: &str = "Connection lost. Live updates are paused until you reconnect.";
const CONNECTION_RESTORED: &str = "Connection restored";

pub struct ChannelManager {
    config: Arc<ChannelConfig>,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<dyn Notifier>,
    channel: RealtimeChannel,
    api: ApiClient,
    fallback_active: Arc<AtomicBool>,
    supervisor: JoinHandle<()>,
}

impl ChannelManager {
    /// Manager over WebSocket with an SSE fallback
    pub fn new(config: ChannelConfig, notifier: Arc<dyn Notifier>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().build()?;
        let connector = WsConnector::from_config(&config);
        Ok(Self::with_connector(config, notifier, connector, http))
    }

    pub fn with_connector<C: Connector>(
        config: ChannelConfig,
        notifier: Arc<dyn Notifier>,
        connector: C,
        http: reqwest::Client,
    ) -> Self {
        let registry = Arc::new(HandlerRegistry::new());
        let api = ApiClient::new(http.clone(), &config, notifier.clone());
        let config = Arc::new(config);
        let channel =
            RealtimeChannel::with_connector(config.as_ref().clone(), connector, registry.clone());
        let fallback_active = Arc::new(AtomicBool::new(false));

        let supervisor = tokio::spawn(
            Supervisor {
                config: config.clone(),
                registry: registry.clone(),
                notifier: notifier.clone(),
                http,
                fallback: None,
                fallback_state: None,
                fallback_active: fallback_active.clone(),
            }
            .run(channel.watch_state(), channel.watch_failures()),
        );

        Self {
            config,
            registry,
            notifier,
            channel,
            api,
            fallback_active,
            supervisor,
        }
    }

    pub fn connect(&self, channel_id: impl Into<ChannelId>) {
        self.channel.connect(channel_id);
    }

    pub async fn disconnect(&self) {
        self.channel.disconnect().await;
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.channel
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// True while the SSE stream is standing in for the channel
    pub fn fallback_active(&self) -> bool {
        self.fallback_active.load(Ordering::Relaxed)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}

struct Supervisor {
    config: Arc<ChannelConfig>,
    registry: Arc<HandlerRegistry>,
    notifier: Arc<dyn Notifier>,
    http: reqwest::Client,
    fallback: Option<EventStream>,
    fallback_state: Option<watch::Receiver<ConnectionState>>,
    fallback_active: Arc<AtomicBool>,
}

impl Supervisor {
    /// React to channel failures, reconnects and a failing fallback
    ///
    /// Failures come from their own counter: the state watch only keeps the
    /// latest value and can skip a short-lived `failed`.
    async fn run(
        mut self,
        mut state: watch::Receiver<ConnectionState>,
        mut failures: watch::Receiver<u64>,
    ) {
        loop {
            tokio::select! {
                changed = failures.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.on_failed();
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    if current == ConnectionState::Connected {
                        self.on_connected().await;
                    }
                }
                _ = stream_failed(&mut self.fallback_state) => self.on_fallback_failed(),
            }
        }

        self.stop_fallback().await;
    }

    fn on_failed(&mut self) {
        self.notifier.show(CONNECTION_LOST, ToastKind::Error);

        if self
            .fallback
            .as_ref()
            .is_some_and(|stream| stream.state() == ConnectionState::Failed)
        {
            self.on_fallback_failed();
        }

        if !self.config.sse_fallback || self.fallback.is_some() {
            return;
        }
        match EventStream::open(self.http.clone(), &self.config, self.registry.clone()) {
            Ok(stream) => {
                tracing::info!("Channel failed; streaming events over SSE instead");
                self.fallback_state = Some(stream.watch_state());
                self.fallback = Some(stream);
                self.fallback_active.store(true, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!(error = %e, "Cannot open SSE fallback"),
        }
    }

    async fn on_connected(&mut self) {
        if self.fallback.is_some() {
            self.stop_fallback().await;
            self.notifier.show(CONNECTION_RESTORED, ToastKind::Success);
        }
    }

    /// The SSE stream gave up too; forget it so the next failure reopens it
    fn on_fallback_failed(&mut self) {
        self.fallback_state = None;
        if self.fallback.take().is_some() {
            self.fallback_active.store(false, Ordering::Relaxed);
            tracing::warn!("SSE fallback failed; live updates stopped");
        }
    }

    async fn stop_fallback(&mut self) {
        self.fallback_state = None;
        if let Some(stream) = self.fallback.take() {
            stream.close().await;
            self.fallback_active.store(false, Ordering::Relaxed);
            tracing::info!("SSE fallback closed");
        }
    }
}

/// Resolves once the stream reports `failed`; never when there is none
async fn stream_failed(state: &mut Option<watch::Receiver<ConnectionState>>) {
    let failed = match state {
        Some(state) => state
            .wait_for(|current| *current == ConnectionState::Failed)
            .await
            .is_ok(),
        None => false,
    };
    if !failed {
        std::future::pending::<()>().await;
    }
}
