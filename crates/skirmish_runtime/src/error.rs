//! Error types shared by every layer of the runtime.
//!
//! Errors fall into four groups:
//!
//! * [`ResolveError`] - a dependency could not be resolved through the scope chain
//! * [`CommandError`] - a command failed while executing; classified by [`ErrorKind`]
//! * [`NoSuitableHandler`] - the exception handler store has no recovery for a failure
//! * [`WorkerError`] - a failure that terminates an event loop's worker thread

use crate::command::CommandKind;
use crate::ioc::DependencyKey;
use thiserror::Error;

/// Failure to resolve a dependency.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The identifier is not registered anywhere in the scope chain.
    #[error(
        "dependency '{key}' not found{}",
        .scope.as_deref().map(|s| format!(" (resolving from scope '{s}')")).unwrap_or_default()
    )]
    NotFound {
        key: DependencyKey,
        scope: Option<String>,
    },

    /// The parent of the root scope was requested.
    #[error("root scope has no parent")]
    RootHasNoParent,

    /// A provider was found but was registered with a different argument or result type.
    #[error("dependency '{key}' is registered as {registered}, requested as {requested}")]
    SignatureMismatch {
        key: DependencyKey,
        registered: &'static str,
        requested: &'static str,
    },

    /// A provider ran but could not produce its value.
    #[error("dependency '{key}' is unavailable: {reason}")]
    Unavailable { key: DependencyKey, reason: String },
}

/// Classification of a [`CommandError`], used as the error half of an exception handler key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Macro,
    Resolve,
    Property,
    InsufficientResource,
    Fatal,
    /// Application-defined failure, identified by a static name.
    Domain(&'static str),
}

/// Failure raised by [`Command::execute`](crate::Command::execute).
#[derive(Debug, Error)]
pub enum CommandError {
    /// A child of a macro command failed; the remaining children were not executed.
    #[error("macro command failed at step {index} ({command}): {source}")]
    Macro {
        index: usize,
        command: &'static str,
        #[source]
        source: Box<CommandError>,
    },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Reading or writing an entity property failed.
    #[error("property '{name}': {reason}")]
    Property { name: String, reason: String },

    /// The operation needs more of a resource than the entity has.
    #[error("not enough {resource}: has {available}, needs {required}")]
    InsufficientResource {
        resource: &'static str,
        available: i64,
        required: i64,
    },

    /// A failure that must terminate the worker instead of being recovered.
    #[error(transparent)]
    Fatal(Box<WorkerError>),

    #[error("{kind}: {message}")]
    Domain {
        kind: &'static str,
        message: String,
    },
}

impl CommandError {
    /// Builds an application-defined error of the given kind.
    pub fn domain(kind: &'static str, message: impl Into<String>) -> Self {
        Self::Domain {
            kind,
            message: message.into(),
        }
    }

    pub fn property(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Property {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Macro { .. } => ErrorKind::Macro,
            Self::Resolve(_) => ErrorKind::Resolve,
            Self::Property { .. } => ErrorKind::Property,
            Self::InsufficientResource { .. } => ErrorKind::InsufficientResource,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Domain { kind, .. } => ErrorKind::Domain(kind),
        }
    }

    /// Returns the innermost cause, unwrapping macro command layers.
    pub fn root_cause(&self) -> &CommandError {
        match self {
            Self::Macro { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<WorkerError> for CommandError {
    fn from(error: WorkerError) -> Self {
        Self::Fatal(Box::new(error))
    }
}

/// No recovery strategy matched a failed command.
///
/// This is a configuration gap, fixed by registering a catch-all default handler.
#[derive(Debug, Error)]
#[error("no suitable exception handler for command {command} and error {error} ({kind:?})")]
pub struct NoSuitableHandler {
    pub command: CommandKind,
    pub kind: ErrorKind,
    pub error: String,
}

/// Failure that stops an event loop's worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    NoSuitableHandler(#[from] NoSuitableHandler),

    /// The recovery command produced by the handler store failed itself.
    #[error("recovery command {command} failed: {source}")]
    Recovery {
        command: CommandKind,
        #[source]
        source: Box<CommandError>,
    },

    /// The loop was asked to run while already running or after it stopped.
    #[error("event loop '{0}' cannot be started twice")]
    AlreadyStarted(String),

    /// The worker thread could not install its scope.
    #[error("event loop '{name}' failed to enter its scope: {source}")]
    Scope {
        name: String,
        #[source]
        source: Box<CommandError>,
    },
}
