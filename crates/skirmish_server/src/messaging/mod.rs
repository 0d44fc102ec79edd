//! Inbound messages: wire types, interpretation inside sessions, and request routing.

pub mod handlers;
pub mod router;
pub mod types;

pub use handlers::{message_handler, register_default_handlers, InterpretCommand, MessageContext};
pub use router::{handle_request, route_line};
pub use types::{GameMessage, Request, Response};
