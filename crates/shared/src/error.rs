//! Error types for the chatwire wire protocol

use thiserror::Error;

/// Failure to turn a transport frame into an [`InboundEvent`](crate::InboundEvent)
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame has no `type` or `kind` discriminator")]
    MissingDiscriminator,
}
