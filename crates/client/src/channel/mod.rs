//! Reconnecting real-time channel
//!
//! [`RealtimeChannel`] is a cheap handle over a background task that owns the
//! transport. The handle talks to the task through a command queue and
//! shares a small amount of state with it: the outbound queue, the local
//! typing flag and the observable connection state.
//!
//! The task is a state machine:
//!
//! ```text
//! disconnected --connect--> connecting --open--> connected
//!       ^                        |                   |
//!       |                      error          abnormal close
//!       |                        v                   v
//!       +-------disconnect--- reconnecting <---------+
//!                                |
//!                         retries exhausted
//!                                v
//!                              failed
//! ```

mod outbox;
mod task;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chatwire_shared::{
    ChannelId, ClientEvent, ConnectionState, EventKind, InboundEvent, OutboundMessage, SendStatus,
    TypingUpdate,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::{ChannelConfig, QueuePolicy};
use crate::dispatch::{HandlerId, HandlerRegistry, HandlerResult};
use crate::transport::{Connector, WireFrame, WsConnector};
use crate::typing::{TypingTracker, TypingUser};

use outbox::Outbox;
use task::{ChannelTask, Command};

/// Handle to a reconnecting channel
///
/// Must be created inside a Tokio runtime. Dropping the handle closes the
/// connection and stops the background task.
pub struct RealtimeChannel {
    shared: Arc<ChannelShared>,
    commands: mpsc::UnboundedSender<Command>,
    _task: JoinHandle<()>,
}

impl RealtimeChannel {
    /// Channel over WebSocket, with a private handler registry
    pub fn new(config: ChannelConfig) -> Self {
        let connector = WsConnector::from_config(&config);
        Self::with_connector(config, connector, Arc::new(HandlerRegistry::new()))
    }

    /// Channel over a custom transport, dispatching into `registry`
    pub fn with_connector<C: Connector>(
        config: ChannelConfig,
        connector: C,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        let config = Arc::new(config);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (failures, _) = watch::channel(0);
        let shared = Arc::new(ChannelShared {
            presence: Mutex::new(TypingTracker::new(
                config.typing_timeout,
                config.user_id.clone(),
            )),
            config,
            state,
            failures,
            outbox: Mutex::new(Outbox::default()),
            typing: Mutex::new(LocalTyping::default()),
            registry,
            attempts: AtomicU32::new(0),
            channel_id: Mutex::new(None),
        });

        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(ChannelTask::new(connector, shared.clone(), receiver).run());

        Self {
            shared,
            commands,
            _task: task,
        }
    }

    /// Connect to a channel, switching away from the current one if needed
    pub fn connect(&self, channel_id: impl Into<ChannelId>) {
        self.command(Command::Connect(channel_id.into()));
    }

    /// Close the connection and cancel every timer
    ///
    /// Resolves once the background task has acted on it: no reconnect,
    /// heartbeat or typing frame is produced afterwards.
    pub async fn disconnect(&self) {
        let (done, acked) = oneshot::channel();
        if self.commands.send(Command::Disconnect(done)).is_err() {
            return;
        }
        let _ = acked.await;
    }

    /// Send now if connected, otherwise queue until the next connect
    pub fn send(&self, message: impl Into<OutboundMessage>) -> SendStatus {
        self.shared.send(&message.into())
    }

    pub fn send_message(&self, content: impl Into<String>) -> SendStatus {
        self.send(ClientEvent::message(content))
    }

    pub fn reply(&self, content: impl Into<String>, reply_to: impl Into<String>) -> SendStatus {
        let mut event = ClientEvent::message(content);
        if let ClientEvent::Message { reply_to: slot, .. } = &mut event {
            *slot = Some(reply_to.into());
        }
        self.send(event)
    }

    pub fn add_reaction(&self, message_id: impl Into<String>, emoji: impl Into<String>) -> SendStatus {
        self.send(ClientEvent::AddReaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    pub fn remove_reaction(
        &self,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> SendStatus {
        self.send(ClientEvent::RemoveReaction {
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    /// Register a handler for inbound events of one kind
    pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
    where
        F: Fn(&InboundEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.registry.on(kind, handler)
    }

    pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
        self.shared.registry.off(kind, id)
    }

    /// Signal that the local user is typing
    ///
    /// Emits `typing_start` on the first call only; every call pushes the
    /// automatic `typing_stop` back by the typing timeout.
    pub fn start_typing(&self) {
        let deadline = Instant::now() + self.shared.config.typing_timeout;
        if self.shared.start_typing(deadline) {
            self.shared.send(&ClientEvent::TypingStart.into());
        }
        self.command(Command::TypingDeadline(Some(deadline)));
    }

    pub fn stop_typing(&self) {
        if self.shared.stop_typing() {
            self.shared.send(&ClientEvent::TypingStop.into());
            self.command(Command::TypingDeadline(None));
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Count of times the channel gave up and entered `failed`
    ///
    /// Unlike [`watch_state`](Self::watch_state), a failure followed quickly
    /// by a new connect attempt still shows up as a changed value.
    pub fn watch_failures(&self) -> watch::Receiver<u64> {
        self.shared.failures.subscribe()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        lock(&self.shared.channel_id).clone()
    }

    /// Automatic attempts made since the last successful open
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Relaxed)
    }

    pub fn queued_len(&self) -> usize {
        lock(&self.shared.outbox).queued_len()
    }

    /// Remote users currently typing in this channel
    pub fn typing_users(&self) -> Vec<TypingUser> {
        lock(&self.shared.presence).active(Instant::now())
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.shared.registry
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Channel task is gone; command ignored");
        }
    }
}

/// Local typing flag
#[derive(Debug, Default)]
struct LocalTyping {
    active: bool,
    deadline: Option<Instant>,
}

/// State shared between the handle and the background task
pub(crate) struct ChannelShared {
    config: Arc<ChannelConfig>,
    state: watch::Sender<ConnectionState>,
    failures: watch::Sender<u64>,
    outbox: Mutex<Outbox>,
    typing: Mutex<LocalTyping>,
    presence: Mutex<TypingTracker>,
    registry: Arc<HandlerRegistry>,
    attempts: AtomicU32,
    channel_id: Mutex<Option<ChannelId>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChannelShared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Channel state changed");
        }
    }

    fn note_failed(&self) {
        self.failures.send_modify(|count| *count += 1);
    }

    fn set_channel_id(&self, channel_id: Option<ChannelId>) {
        *lock(&self.channel_id) = channel_id;
        lock(&self.presence).clear();
    }

    fn set_attempts(&self, attempts: u32) {
        self.attempts.store(attempts, Ordering::Relaxed);
    }

    fn send(&self, message: &OutboundMessage) -> SendStatus {
        lock(&self.outbox).send(message)
    }

    fn send_heartbeat(&self) -> bool {
        lock(&self.outbox).send_now(&ClientEvent::Heartbeat.into())
    }

    /// Hand a fresh transport to the outbox and mark the channel connected
    ///
    /// Returns the number of queued frames flushed, or `None` if the
    /// transport died during the flush; the state is left untouched then.
    fn attach(&self, link: mpsc::UnboundedSender<WireFrame>) -> Option<usize> {
        let mut outbox = lock(&self.outbox);
        let flushed = outbox.attach(link).ok()?;
        self.set_state(ConnectionState::Connected);
        Some(flushed)
    }

    fn detach(&self, policy: QueuePolicy) {
        lock(&self.outbox).detach(policy);
    }

    /// Returns true if this call starts a typing burst
    fn start_typing(&self, deadline: Instant) -> bool {
        let mut typing = lock(&self.typing);
        typing.deadline = Some(deadline);
        !std::mem::replace(&mut typing.active, true)
    }

    /// Returns true if a typing burst was in progress
    fn stop_typing(&self) -> bool {
        let mut typing = lock(&self.typing);
        typing.deadline = None;
        std::mem::replace(&mut typing.active, false)
    }

    /// Emit `typing_stop` if the burst has been idle past its deadline
    ///
    /// Returns the deadline to wait for instead when it was pushed back.
    fn expire_typing(&self, now: Instant) -> Option<Instant> {
        {
            let mut typing = lock(&self.typing);
            match typing.deadline {
                Some(deadline) if deadline > now => return Some(deadline),
                _ if !typing.active => return None,
                _ => {
                    typing.active = false;
                    typing.deadline = None;
                }
            }
        }

        tracing::debug!("Typing idle; sending typing_stop");
        self.send(&ClientEvent::TypingStop.into());
        None
    }

    /// Forget the local typing burst without telling the server
    fn reset_typing(&self) {
        let mut typing = lock(&self.typing);
        typing.active = false;
        typing.deadline = None;
    }

    fn note_typing(&self, update: &TypingUpdate) {
        lock(&self.presence).apply(update, Instant::now());
    }
}

#[cfg(test)]
mod tests;
