//! Recovery commands and the factories that build them.
//!
//! Every factory produces a [`DelayedCommand`]: the recovery is not run where the
//! failure happened but re-enqueued through [`SCHEDULE_COMMAND`], so it lands on the
//! queue of whatever scope was current when the failure was handled (the session's
//! queue inside a tick, the loop's queue otherwise).
//!
//! Escalation is pure registration. A failed command is wrapped in
//! [`FirstRetryCommand`]; a failing `FirstRetryCommand` is wrapped in
//! [`SecondRetryCommand`]; a failing `SecondRetryCommand` is logged and dropped.

use super::store::{ExceptionHandlerStore, HandlerFactory};
use crate::command::{BoxedCommand, Command, CommandKind};
use crate::error::CommandError;
use crate::ioc::Resolver;
use crate::keys::SCHEDULE_COMMAND;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Puts a command on the current scope's queue when executed.
pub struct DelayedCommand {
    resolver: Arc<Resolver>,
    command: Option<BoxedCommand>,
}

impl DelayedCommand {
    pub fn new(resolver: Arc<Resolver>, command: BoxedCommand) -> Self {
        Self {
            resolver,
            command: Some(command),
        }
    }
}

impl Command for DelayedCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        match self.command.take() {
            Some(command) => Ok(self.resolver.resolve(&SCHEDULE_COMMAND, command)?),
            None => Ok(()),
        }
    }
}

/// Logs a failure and drops the command that caused it.
pub struct LogErrorCommand {
    command: CommandKind,
    error: CommandError,
}

impl LogErrorCommand {
    pub fn new(command: CommandKind, error: CommandError) -> Self {
        Self { command, error }
    }
}

impl Command for LogErrorCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        error!(command = %self.command, "❌ Command failed, dropping it: {}", self.error);
        Ok(())
    }
}

/// Runs a failed command a second time.
pub struct FirstRetryCommand(BoxedCommand);

impl FirstRetryCommand {
    pub fn new(command: BoxedCommand) -> Self {
        Self(command)
    }
}

impl Command for FirstRetryCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        self.0.execute()
    }
}

/// Runs a failed command a third time; distinguishable from [`FirstRetryCommand`] in the store.
pub struct SecondRetryCommand(BoxedCommand);

impl SecondRetryCommand {
    pub fn new(command: BoxedCommand) -> Self {
        Self(command)
    }
}

impl Command for SecondRetryCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        self.0.execute()
    }
}

pub fn log_and_drop(resolver: Arc<Resolver>) -> HandlerFactory {
    Arc::new(move |command: BoxedCommand, error: CommandError| -> BoxedCommand {
        let log = LogErrorCommand::new(command.kind(), error);
        Box::new(DelayedCommand::new(resolver.clone(), Box::new(log)))
    })
}

pub fn retry_once(resolver: Arc<Resolver>) -> HandlerFactory {
    Arc::new(move |command: BoxedCommand, _error: CommandError| -> BoxedCommand {
        let retry = FirstRetryCommand::new(command);
        Box::new(DelayedCommand::new(resolver.clone(), Box::new(retry)))
    })
}

pub fn retry_again(resolver: Arc<Resolver>) -> HandlerFactory {
    Arc::new(move |command: BoxedCommand, _error: CommandError| -> BoxedCommand {
        let retry = SecondRetryCommand::new(command);
        Box::new(DelayedCommand::new(resolver.clone(), Box::new(retry)))
    })
}

/// How failed commands are recovered by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Log the failure and drop the command.
    Log,
    /// Retry once, then log.
    RetryThenLog,
    /// Retry, retry again, then log.
    #[default]
    RetryTwiceThenLog,
}

impl ExceptionHandlerStore {
    /// Registers the catch-all and retry-wrapper defaults for `policy`.
    ///
    /// Handlers registered more specifically still take precedence.
    pub fn install_policy(&self, resolver: &Arc<Resolver>, policy: RecoveryPolicy) {
        let log = log_and_drop(resolver.clone());
        match policy {
            RecoveryPolicy::Log => {
                self.register_fallback(log);
            }
            RecoveryPolicy::RetryThenLog => {
                self.register_fallback(retry_once(resolver.clone()));
                self.register_default_command_handler_for(
                    CommandKind::of::<FirstRetryCommand>(),
                    log,
                );
            }
            RecoveryPolicy::RetryTwiceThenLog => {
                self.register_fallback(retry_once(resolver.clone()));
                self.register_default_command_handler_for(
                    CommandKind::of::<FirstRetryCommand>(),
                    retry_again(resolver.clone()),
                );
                self.register_default_command_handler_for(
                    CommandKind::of::<SecondRetryCommand>(),
                    log,
                );
            }
        }
    }

    fn register_fallback(&self, factory: HandlerFactory) {
        self.register_default_handler(move |command, error| factory(command, error));
    }
}
