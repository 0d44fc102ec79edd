//! # Skirmish Server
//!
//! Sharded session dispatch on top of [`skirmish_runtime`]. A fixed pool of event
//! loops, one OS thread each, hosts any number of game sessions; session `n` always
//! runs on shard `n % shard_count`, and every session gets a fair, bounded tick each
//! time its shard cycles back to it.
//!
//! ## Message Flow
//!
//! 1. A transport decodes a [`Request`] and calls [`handle_request`]
//! 2. The [`Authorizer`](auth::Authorizer) registered under `Auth.Strategy` checks the
//!    caller's claims (when enabled)
//! 3. [`DispatchServer::route_message`] puts a delivery command on the session's shard
//! 4. On the shard thread, the delivery pushes an [`InterpretCommand`] onto the
//!    session's private queue
//! 5. During the session's next tick the command resolves `MessageHandler.<operation>`
//!    through the session scope and runs what it returns
//!
//! Failures inside a session never reach the transport. They are turned into recovery
//! work by the shared exception handler store, according to [`ServerConfig::recovery`].
//!
//! ## Extending
//!
//! Handlers, the authorizer and anything else resolved by name can be replaced by
//! registering a provider in the root scope (all sessions), a shard scope
//! (`EventLoop <i>`) or a session scope (`Game <id>`).
//!
//! ```rust
//! use skirmish_runtime::{Resolver, ScopeChain};
//! use skirmish_server::{DispatchServer, ServerConfig};
//!
//! let resolver = Resolver::new();
//! ScopeChain::install(&resolver)?;
//! let config = ServerConfig { shard_count: 2, ..Default::default() };
//! let server = DispatchServer::new(config, resolver);
//! server.start()?;
//!
//! let first = server.new_session()?;
//! let second = server.new_session()?;
//! assert_eq!(server.shard_of(first), Some(0));
//! assert_eq!(server.shard_of(second), Some(1));
//!
//! server.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod auth;
pub mod behaviour;
pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod objects;
pub mod server;

pub use auth::{AllowAll, Authorizer, Claims, TokenMatch, AUTH_STRATEGY};
pub use config::ServerConfig;
pub use error::ServerError;
pub use logging::setup_logging;
pub use messaging::{handle_request, route_line, GameMessage, InterpretCommand, Request, Response};
pub use objects::{GameObject, ObjectTable, PropertyBag, GAME_OBJECTS};
pub use server::{DispatchServer, SERVER};
