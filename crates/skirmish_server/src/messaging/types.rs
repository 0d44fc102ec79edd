//! Message type definitions for client-server communication.

use crate::auth::Claims;
use serde::{Deserialize, Serialize};
use skirmish_runtime::SessionId;

/// An operation addressed to one entity of one session.
///
/// # Fields
///
/// * `session_id` - The session whose queue receives the message
/// * `entity_id` - The entity the operation applies to
/// * `operation_id` - Selects the handler, resolved as `MessageHandler.<operation_id>`
/// * `args` - Operation arguments as a JSON value
///
/// # Example
///
/// ```json
/// {
///   "session_id": 0,
///   "entity_id": 1,
///   "operation_id": "move",
///   "args": { "position": { "x": 0, "y": 0 }, "velocity": { "x": 1, "y": 2 } }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameMessage {
    pub session_id: SessionId,
    pub entity_id: u64,
    pub operation_id: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

/// One line of the JSON transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    NewSession,
    Message {
        #[serde(default)]
        claims: Option<Claims>,
        message: GameMessage,
    },
    EndSession {
        session_id: SessionId,
    },
    Stop,
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    SessionCreated { session_id: SessionId },
    Accepted,
    SessionEnded { session_id: SessionId },
    Stopping,
    Error { message: String },
}
