//! chatwire shared protocol types
//!
//! Wire-level types shared by the channel client and the command-line tool:
//! channel identifiers, connection state, and the JSON event protocol spoken
//! over the WebSocket and SSE transports.

pub mod error;
pub mod events;
pub mod types;

pub use error::*;
pub use events::*;
pub use types::*;
