//! Outbound path of a channel
//!
//! Holds the sender of the live transport, if any, and the FIFO of frames
//! accepted while no transport was open. Both live behind one lock so a
//! message can never overtake the queue while it is being flushed.

use std::collections::VecDeque;

use chatwire_shared::{OutboundMessage, SendStatus};
use tokio::sync::mpsc;

use crate::config::QueuePolicy;
use crate::transport::WireFrame;

#[derive(Debug)]
struct QueuedFrame {
    kind: &'static str,
    text: String,
}

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    link: Option<mpsc::UnboundedSender<WireFrame>>,
    queue: VecDeque<QueuedFrame>,
}

impl Outbox {
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Write a message now, or queue it until the next connect
    pub fn send(&mut self, message: &OutboundMessage) -> SendStatus {
        let text = match message.to_frame() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Dropping unserializable message");
                return SendStatus::Dropped;
            }
        };

        if let Some(link) = &self.link {
            match link.send(WireFrame::Text(text)) {
                Ok(()) => return SendStatus::Sent,
                Err(mpsc::error::SendError(frame)) => {
                    tracing::warn!(kind = message.kind(), "Transport went away during send; queueing");
                    self.link = None;
                    if let WireFrame::Text(text) = frame {
                        self.enqueue(message.kind(), text);
                    }
                    return SendStatus::Queued;
                }
            }
        }

        self.enqueue(message.kind(), text);
        SendStatus::Queued
    }

    /// Write a message only if a transport is open. Never queues.
    pub fn send_now(&self, message: &OutboundMessage) -> bool {
        let Some(link) = &self.link else {
            return false;
        };
        match message.to_frame() {
            Ok(text) => link.send(WireFrame::Text(text)).is_ok(),
            Err(e) => {
                tracing::warn!(kind = message.kind(), error = %e, "Dropping unserializable message");
                false
            }
        }
    }

    /// Flush the queue in order into a fresh transport, then keep it
    ///
    /// Returns how many queued frames were written. If the transport dies
    /// mid-flush the unsent remainder stays queued, nothing is attached and
    /// the count written before the failure comes back as the error.
    pub fn attach(&mut self, link: mpsc::UnboundedSender<WireFrame>) -> Result<usize, usize> {
        let mut flushed = 0;
        while let Some(queued) = self.queue.pop_front() {
            let kind = queued.kind;
            if let Err(mpsc::error::SendError(WireFrame::Text(text))) =
                link.send(WireFrame::Text(queued.text))
            {
                self.queue.push_front(QueuedFrame { kind, text });
                tracing::warn!(flushed, remaining = self.queue.len(), "Transport closed while flushing queue");
                return Err(flushed);
            }
            flushed += 1;
        }

        self.link = Some(link);
        Ok(flushed)
    }

    /// Forget the transport
    pub fn detach(&mut self, policy: QueuePolicy) {
        self.link = None;
        if policy == QueuePolicy::Clear && !self.queue.is_empty() {
            tracing::info!(discarded = self.queue.len(), "Clearing outbound queue");
            self.queue.clear();
        }
    }

    fn enqueue(&mut self, kind: &'static str, text: String) {
        self.queue.push_back(QueuedFrame { kind, text });
        tracing::debug!(kind, queued = self.queue.len(), "Message queued");
    }
}
