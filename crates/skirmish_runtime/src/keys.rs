//! Well-known dependency identifiers shared by the runtime and its hosts.

use crate::command::BoxedCommand;
use crate::event_loop::EventLoop;
use crate::handlers::ExceptionHandlerStore;
use crate::ioc::Dependency;
use std::sync::Arc;

/// Enqueues a command on whatever queue the current scope schedules onto.
///
/// Each event loop scope registers its own queue here; session scopes override it with
/// the session's private queue.
pub const SCHEDULE_COMMAND: Dependency<BoxedCommand, ()> = Dependency::new("Command.Schedule");

/// The event loop that owns the current scope.
pub const EVENT_LOOP: Dependency<(), Arc<EventLoop>> = Dependency::new("EventLoop.Current");

/// The exception handler store used for recovery in the current scope.
pub const EXCEPTION_HANDLER_STORE: Dependency<(), Arc<ExceptionHandlerStore>> =
    Dependency::new("ExceptionHandler.Store");
