//! Background task driving one channel

use std::sync::Arc;
use std::time::Duration;

use chatwire_shared::{
    is_intentional_close, ChannelId, ConnectionState, Decoded, InboundEvent, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::ChannelShared;
use crate::backoff::ReconnectBackoff;
use crate::config::QueuePolicy;
use crate::transport::{Connector, TransportEvent, TransportLink, WireFrame};

pub(crate) enum Command {
    Connect(ChannelId),
    Disconnect(oneshot::Sender<()>),
    /// Local typing deadline moved; `None` cancels it
    TypingDeadline(Option<Instant>),
}

enum Phase {
    Idle,
    Connecting,
    Open(TransportLink),
    Waiting(Duration),
    Failed,
    Stopped,
}

/// What a command asks the current phase to do
enum Step {
    Stay,
    Go(Phase),
}

pub(crate) struct ChannelTask<C> {
    connector: Arc<C>,
    shared: Arc<ChannelShared>,
    commands: mpsc::UnboundedReceiver<Command>,
    channel_id: Option<ChannelId>,
    backoff: ReconnectBackoff,
    typing_deadline: Option<Instant>,
}

impl<C: Connector> ChannelTask<C> {
    pub(crate) fn new(
        connector: C,
        shared: Arc<ChannelShared>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        let backoff = ReconnectBackoff::from_config(&shared.config);
        Self {
            connector: Arc::new(connector),
            shared,
            commands,
            channel_id: None,
            backoff,
            typing_deadline: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle(ConnectionState::Disconnected).await,
                Phase::Failed => self.idle(ConnectionState::Failed).await,
                Phase::Connecting => self.connecting().await,
                Phase::Waiting(delay) => self.waiting(delay).await,
                Phase::Open(link) => self.open(link).await,
                Phase::Stopped => break,
            };
        }

        self.shared.detach(QueuePolicy::Preserve);
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("Channel task stopped");
    }

    /// Nothing to do until told otherwise
    async fn idle(&mut self, state: ConnectionState) -> Phase {
        self.shared.set_state(state);
        if state == ConnectionState::Failed {
            self.shared.note_failed();
        }
        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    if let Step::Go(next) = self.apply(command) {
                        return next;
                    }
                }
                _ = sleep_until_opt(self.typing_deadline) => self.expire_typing(),
            }
        }
    }

    async fn connecting(&mut self) -> Phase {
        let Some(channel_id) = self.channel_id.clone() else {
            return Phase::Idle;
        };
        self.shared.set_state(ConnectionState::Connecting);

        let url = match self.shared.config.channel_url(&channel_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Cannot build channel URL");
                return self.retry_later();
            }
        };
        tracing::debug!(channel_id = %channel_id, url = %url, "Opening transport");

        let connector = self.connector.clone();
        let connect = connector.connect(url);
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(link) => Phase::Open(link),
                        Err(e) => {
                            tracing::warn!(channel_id = %channel_id, error = %e, "Connection attempt failed");
                            self.retry_later()
                        }
                    };
                }
                command = self.commands.recv() => {
                    let same_channel = matches!(
                        &command,
                        Some(Command::Connect(id)) if Some(id) == self.channel_id.as_ref()
                    );
                    if !same_channel {
                        if let Step::Go(next) = self.apply(command) {
                            return next;
                        }
                    }
                }
                _ = sleep_until_opt(self.typing_deadline) => self.expire_typing(),
            }
        }
    }

    /// Reconnect timer
    async fn waiting(&mut self, delay: Duration) -> Phase {
        self.shared.set_state(ConnectionState::Reconnecting);
        tracing::info!(
            channel_id = ?self.channel_id.as_ref().map(ChannelId::as_str),
            attempt = self.backoff.attempt(),
            max_attempts = self.backoff.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Phase::Connecting,
                command = self.commands.recv() => {
                    if let Step::Go(next) = self.apply(command) {
                        return next;
                    }
                }
                _ = sleep_until_opt(self.typing_deadline) => self.expire_typing(),
            }
        }
    }

    async fn open(&mut self, link: TransportLink) -> Phase {
        let TransportLink {
            outbound,
            mut inbound,
        } = link;

        let Some(flushed) = self.shared.attach(outbound.clone()) else {
            return self.closed(CLOSE_ABNORMAL, "transport closed while flushing queue");
        };
        self.backoff.reset();
        self.shared.set_attempts(0);
        tracing::info!(
            channel_id = ?self.channel_id.as_ref().map(ChannelId::as_str),
            flushed,
            "Channel connected"
        );

        let period = self.shared.config.heartbeat_interval;
        let mut heartbeat = (!period.is_zero()).then(|| {
            let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
            heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
            heartbeat
        });
        if heartbeat.is_none() {
            tracing::warn!("Heartbeat interval is zero; heartbeats disabled");
        }

        loop {
            tokio::select! {
                event = inbound.recv() => {
                    match event {
                        Some(TransportEvent::Frame(text)) => self.handle_frame(&text),
                        Some(TransportEvent::Closed { code, reason }) => return self.closed(code, &reason),
                        None => return self.closed(CLOSE_ABNORMAL, "transport task ended"),
                    }
                }
                _ = tick_opt(&mut heartbeat) => {
                    if self.shared.send_heartbeat() {
                        tracing::trace!("Heartbeat sent");
                    }
                }
                command = self.commands.recv() => {
                    match command {
                        Some(Command::Connect(id)) if Some(&id) == self.channel_id.as_ref() => {
                            tracing::debug!(channel_id = %id, "Already connected");
                        }
                        Some(Command::TypingDeadline(deadline)) => self.typing_deadline = deadline,
                        other => {
                            let _ = outbound.send(WireFrame::Close {
                                code: CLOSE_NORMAL,
                                reason: "client closing".to_string(),
                            });
                            self.shared.detach(QueuePolicy::Preserve);
                            if let Step::Go(next) = self.apply(other) {
                                return next;
                            }
                        }
                    }
                }
                _ = sleep_until_opt(self.typing_deadline) => self.expire_typing(),
            }
        }
    }

    fn apply(&mut self, command: Option<Command>) -> Step {
        match command {
            None => Step::Go(Phase::Stopped),
            Some(Command::Connect(channel_id)) => {
                tracing::info!(channel_id = %channel_id, "Connect requested");
                self.shared.set_channel_id(Some(channel_id.clone()));
                self.channel_id = Some(channel_id);
                self.backoff.reset();
                self.shared.set_attempts(0);
                Step::Go(Phase::Connecting)
            }
            Some(Command::Disconnect(done)) => {
                self.shared.detach(self.shared.config.queue_policy);
                self.shared.reset_typing();
                self.typing_deadline = None;
                self.backoff.reset();
                self.shared.set_attempts(0);
                self.shared.set_state(ConnectionState::Disconnected);
                tracing::info!(
                    channel_id = ?self.channel_id.as_ref().map(ChannelId::as_str),
                    "Channel disconnected"
                );
                let _ = done.send(());
                Step::Go(Phase::Idle)
            }
            Some(Command::TypingDeadline(deadline)) => {
                self.typing_deadline = deadline;
                Step::Stay
            }
        }
    }

    fn closed(&mut self, code: u16, reason: &str) -> Phase {
        self.shared.detach(QueuePolicy::Preserve);
        if is_intentional_close(code) {
            tracing::info!(code, reason, "Channel closed by server");
            Phase::Idle
        } else {
            tracing::warn!(code, reason, "Channel closed unexpectedly");
            self.retry_later()
        }
    }

    /// Next step after a failure: another attempt later, or give up
    fn retry_later(&mut self) -> Phase {
        match self.backoff.next() {
            Some(delay) => {
                self.shared.set_attempts(self.backoff.attempt());
                Phase::Waiting(delay)
            }
            None => {
                tracing::error!(
                    channel_id = ?self.channel_id.as_ref().map(ChannelId::as_str),
                    attempts = self.backoff.attempt(),
                    "Reconnect attempts exhausted"
                );
                Phase::Failed
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        match InboundEvent::parse(text) {
            Ok(Decoded::Event(event)) => {
                if let Some(update) = event.typing_update() {
                    self.shared.note_typing(&update);
                }
                let handlers = self.shared.registry.dispatch(&event);
                tracing::trace!(kind = event.kind.as_str(), handlers, "Event dispatched");
            }
            Ok(Decoded::Unknown { discriminator }) => {
                tracing::warn!(kind = %discriminator, "Unknown event kind; dropped");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed frame; dropped");
            }
        }
    }

    fn expire_typing(&mut self) {
        self.typing_deadline = self.shared.expire_typing(Instant::now());
    }
}

/// Next tick of `interval`, or never when there is none
async fn tick_opt(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Sleep until `deadline`, or forever when there is none
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
