//! Failure recovery: the exception handler store and the stock recovery commands.

pub mod recovery;
pub mod store;

pub use recovery::{
    log_and_drop, retry_again, retry_once, DelayedCommand, FirstRetryCommand, LogErrorCommand,
    RecoveryPolicy, SecondRetryCommand,
};
pub use store::{ExceptionHandlerStore, HandlerFactory};
