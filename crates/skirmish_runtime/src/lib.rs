//! # Skirmish Runtime
//!
//! Command dispatch runtime for multi-tenant game servers. Independent sessions are
//! spread over a fixed pool of event loops, each session is cooperatively time-sliced
//! on its loop, and every cross-cutting lookup goes through a hierarchical, swappable
//! dependency resolver.
//!
//! ## Core Pieces
//!
//! - **Commands** ([`command`]): units of deferred, possibly failing work, with macro
//!   and deferred variants
//! - **Resolver** ([`ioc`]): process-wide resolution strategy, replaceable at runtime
//!   through a reserved identifier
//! - **Scopes** ([`ioc::scope`]): named provider maps chained to their parents, with a
//!   per-thread current scope
//! - **Recovery** ([`handlers`]): failures become scheduled recovery work (retry, retry
//!   again, log) chosen by a lookup table
//! - **Event loops** ([`event_loop`]): one worker thread per loop, hard and soft stop
//! - **Sessions** ([`game`]): bounded ticks over a private queue, round-robin per loop
//!
//! ## Quick Start
//!
//! ```rust
//! use skirmish_runtime::{CommandError, Dependency, Resolver, ScopeChain};
//!
//! const GREETING: Dependency<String, String> = Dependency::new("Example.Greeting");
//!
//! let resolver = Resolver::new();
//! ScopeChain::install(&resolver)?;
//! resolver.register(&GREETING, |name: String| Ok(format!("hello {name}")))?;
//!
//! // Child scopes inherit everything registered in their ancestors.
//! let session = resolver.create_scope("Game 0", None)?;
//! let greeting = resolver.within(session, || {
//!     Ok(resolver.resolve(&GREETING, "pilot".to_string())?)
//! })?;
//! assert_eq!(greeting, "hello pilot");
//! # Ok::<(), CommandError>(())
//! ```

pub mod command;
pub mod error;
pub mod event_loop;
pub mod game;
pub mod handlers;
pub mod ioc;
pub mod keys;

pub use command::{BoxedCommand, Command, CommandKind, DeferredCommand, MacroCommand};
pub use error::{CommandError, ErrorKind, NoSuitableHandler, ResolveError, WorkerError};
pub use event_loop::{EventLoop, HardStopCommand, LoopState, SoftStopCommand};
pub use game::{DeliverToSession, GameCommand, SessionId, SessionRoster, TickSession};
pub use handlers::{ExceptionHandlerStore, RecoveryPolicy};
pub use ioc::scope::{Scope, ScopeChain, ScopeGuard};
pub use ioc::{Dependency, DependencyKey, Provider, Resolver};
pub use keys::{EVENT_LOOP, EXCEPTION_HANDLER_STORE, SCHEDULE_COMMAND};
