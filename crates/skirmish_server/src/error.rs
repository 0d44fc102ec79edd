//! Error types for the dispatch server.

use skirmish_runtime::{CommandError, ResolveError, SessionId, WorkerError};
use thiserror::Error;

/// Failures surfaced to callers of the [`DispatchServer`](crate::DispatchServer).
///
/// Errors raised while admitting or routing are returned directly; failures of commands
/// running inside a shard never reach this type; they are recovered on the shard.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server has not been started")]
    NotStarted,

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("server is stopping")]
    Stopped,

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("not authorized for session {0}")]
    Unauthorized(SessionId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("failed to spawn shard worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// A shard's worker terminated with a fatal error.
    #[error("shard '{shard}' terminated: {source}")]
    Worker {
        shard: String,
        #[source]
        source: WorkerError,
    },

    #[error("shard '{0}' panicked")]
    WorkerPanicked(String),
}
