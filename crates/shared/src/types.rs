//! Common types used across chatwire

use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Close Codes
// =============================================================================

/// Close code for an intentional shutdown. Never triggers a reconnect.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code reported when the peer went away without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Returns true if a close with this code should not be retried
pub fn is_intentional_close(code: u16) -> bool {
    code == CLOSE_NORMAL
}

// =============================================================================
// ID Wrappers
// =============================================================================

/// Channel identifier (chat room, notification feed)
///
/// Opaque to the client. Numeric ids from the server are kept in their
/// decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChannelId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a real-time channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retries exhausted. Only an explicit connect leaves this state.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while the channel is trying to reach the server on its own
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Send Outcome
// =============================================================================

/// What happened to an outbound message handed to `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    /// Written to the open transport
    Sent,
    /// Held in the outbound queue until the next successful connect
    Queued,
    /// Could not be serialized; nothing was sent or queued
    Dropped,
}
