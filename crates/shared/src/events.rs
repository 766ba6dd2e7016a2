//! Channel event types and serialization
//!
//! Defines the client-to-server events a channel can emit and the
//! server-to-client events it understands. Every frame is a JSON object
//! tagged by a `type` discriminator.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::FrameError;

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// New chat message
    Message {
        content: String,
        /// Client-generated id so receivers can drop duplicates after a replay
        client_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<String>,
    },

    /// Local user started typing
    TypingStart,

    /// Local user stopped typing
    TypingStop,

    /// React to a message
    AddReaction { message_id: String, emoji: String },

    /// Withdraw a reaction
    RemoveReaction { message_id: String, emoji: String },

    /// Keep-alive ping
    Heartbeat,
}

impl ClientEvent {
    /// Plain chat message with a fresh client id
    pub fn message(content: impl Into<String>) -> Self {
        ClientEvent::Message {
            content: content.into(),
            client_id: Uuid::new_v4(),
            reply_to: None,
            attachments: Vec::new(),
        }
    }

    /// Wire discriminator for this event
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Message { .. } => "message",
            ClientEvent::TypingStart => "typing_start",
            ClientEvent::TypingStop => "typing_stop",
            ClientEvent::AddReaction { .. } => "add_reaction",
            ClientEvent::RemoveReaction { .. } => "remove_reaction",
            ClientEvent::Heartbeat => "heartbeat",
        }
    }
}

/// An outbound event stamped with the client clock
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub event: ClientEvent,
    /// Milliseconds since the Unix epoch when the event was created
    #[serde(rename = "timestamp")]
    pub client_timestamp: i64,
}

impl OutboundMessage {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            event,
            client_timestamp: now_millis(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    /// Serialize into a single text frame
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<ClientEvent> for OutboundMessage {
    fn from(event: ClientEvent) -> Self {
        Self::new(event)
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Canonical kind of an inbound event
///
/// Several discriminators map onto one kind; the raw value stays available
/// on [`InboundEvent::discriminator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    MessageUpdate,
    MessageDelete,
    Typing,
    Reaction,
    UserStatus,
    UserJoined,
    UserLeft,
    ChannelUpdate,
    Notification,
    Connected,
    Heartbeat,
    Error,
}

impl EventKind {
    /// Map a wire discriminator onto its kind, `None` for unknown values
    pub fn from_discriminator(discriminator: &str) -> Option<Self> {
        let kind = match discriminator {
            "message" | "chat_message" => EventKind::Message,
            "message_update" => EventKind::MessageUpdate,
            "message_delete" => EventKind::MessageDelete,
            "typing" | "typing_start" | "typing_stop" => EventKind::Typing,
            "reaction" | "reaction_add" | "reaction_remove" => EventKind::Reaction,
            "user_status" | "user_status_change" => EventKind::UserStatus,
            "user_joined" => EventKind::UserJoined,
            "user_left" => EventKind::UserLeft,
            "channel_update" => EventKind::ChannelUpdate,
            "notification" => EventKind::Notification,
            "connected" => EventKind::Connected,
            "heartbeat" => EventKind::Heartbeat,
            "error" => EventKind::Error,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::MessageUpdate => "message_update",
            EventKind::MessageDelete => "message_delete",
            EventKind::Typing => "typing",
            EventKind::Reaction => "reaction",
            EventKind::UserStatus => "user_status",
            EventKind::UserJoined => "user_joined",
            EventKind::UserLeft => "user_left",
            EventKind::ChannelUpdate => "channel_update",
            EventKind::Notification => "notification",
            EventKind::Connected => "connected",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Error => "error",
        }
    }
}

/// Result of reading one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Event(InboundEvent),
    /// Well-formed frame whose discriminator is not recognized
    Unknown { discriminator: String },
}

/// Event received from the server
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub kind: EventKind,
    /// Discriminator exactly as sent (`chat_message`, `typing_stop`, ...)
    pub discriminator: String,
    /// The whole frame object, discriminator included
    pub payload: Value,
}

impl InboundEvent {
    /// Parse a text frame
    pub fn parse(frame: &str) -> Result<Decoded, FrameError> {
        let value: Value = serde_json::from_str(frame)?;
        Self::from_value(value, None)
    }

    /// Build an event from an already-parsed object
    ///
    /// `discriminator` overrides the `type`/`kind` fields, which is how SSE
    /// named events are routed.
    pub fn from_value(value: Value, discriminator: Option<&str>) -> Result<Decoded, FrameError> {
        let payload = match value {
            Value::Object(map) => map,
            _ => return Err(FrameError::NotAnObject),
        };

        let discriminator = match discriminator {
            Some(d) => d.to_string(),
            None => discriminator_of(&payload).ok_or(FrameError::MissingDiscriminator)?,
        };

        Ok(match EventKind::from_discriminator(&discriminator) {
            Some(kind) => Decoded::Event(InboundEvent {
                kind,
                discriminator,
                payload: Value::Object(payload),
            }),
            None => Decoded::Unknown { discriminator },
        })
    }

    /// Decode the payload into a typed structure
    pub fn decode<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Chat message carried by a `message` event
    ///
    /// Servers send it either nested under `message` or inline.
    pub fn chat_message(&self) -> Option<ChatMessage> {
        if self.kind != EventKind::Message {
            return None;
        }
        let body = self.payload.get("message").unwrap_or(&self.payload);
        ChatMessage::deserialize(body).ok()
    }

    /// Typing signal carried by a `typing*` event
    pub fn typing_update(&self) -> Option<TypingUpdate> {
        if self.kind != EventKind::Typing {
            return None;
        }

        let typing = match self.discriminator.as_str() {
            "typing_start" => true,
            "typing_stop" => false,
            _ => self
                .payload
                .get("typing")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        };

        let user = self.payload.get("user");
        let user_id = user
            .and_then(|u| u.get("id"))
            .and_then(id_from_value)
            .or_else(|| self.payload.get("user_id").and_then(id_from_value))
            .or_else(|| user.and_then(id_from_value))?;

        let user_name = user
            .and_then(|u| u.get("full_name").or_else(|| u.get("username")))
            .or_else(|| self.payload.get("user_name"))
            .and_then(Value::as_str)
            .map(str::to_string);

        Some(TypingUpdate {
            user_id,
            user_name,
            typing,
        })
    }

    /// Error reported by the server in an `error` event
    pub fn server_error(&self) -> Option<ServerError> {
        if self.kind != EventKind::Error {
            return None;
        }
        ServerError::deserialize(&self.payload).ok()
    }
}

fn discriminator_of(payload: &Map<String, Value>) -> Option<String> {
    payload
        .get("type")
        .or_else(|| payload.get("kind"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Ids arrive as strings or integers depending on the endpoint
fn id_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_from_value(&value).ok_or_else(|| serde::de::Error::custom("expected string or integer id"))
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(id_from_value))
}

// =============================================================================
// Event Data Structures
// =============================================================================

/// Reference to a user as embedded in events
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserRef {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl UserRef {
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Chat message data
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub client_id: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Someone started or stopped typing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUpdate {
    pub user_id: String,
    pub user_name: Option<String>,
    pub typing: bool,
}

/// Server-side error report
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerError {
    #[serde(alias = "error")]
    pub message: String,
    #[serde(default)]
    pub code: Option<Value>,
}
