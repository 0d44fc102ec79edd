//! Recovery lookup table keyed by failing command and error classification.

use crate::command::{BoxedCommand, Command, CommandKind};
use crate::error::{CommandError, ErrorKind, NoSuitableHandler, WorkerError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds the recovery command that replaces a failed command.
///
/// The factory takes ownership of the failed command so a retry can run it again.
pub type HandlerFactory = Arc<dyn Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync>;

/// Maps `(command kind, error kind)` to recovery factories, with three levels of fallback.
///
/// Lookup order for [`create_recovery`](Self::create_recovery):
///
/// 1. exact `(command kind, error kind)`
/// 2. default for the error kind
/// 3. default for the command kind
/// 4. the catch-all default
///
/// Registering under an existing key replaces the previous factory.
#[derive(Default)]
pub struct ExceptionHandlerStore {
    exact: RwLock<HashMap<(CommandKind, ErrorKind), HandlerFactory>>,
    by_error: RwLock<HashMap<ErrorKind, HandlerFactory>>,
    by_command: RwLock<HashMap<CommandKind, HandlerFactory>>,
    fallback: RwLock<Option<HandlerFactory>>,
}

impl ExceptionHandlerStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a factory for failures of command type `C` with the given error kind.
    ///
    /// # Arguments
    ///
    /// * `error` - Classification of the error, as reported by [`CommandError::kind`]
    /// * `factory` - Builds the recovery command from the failed command and its error
    pub fn register_handler<C, F>(&self, error: ErrorKind, factory: F)
    where
        C: Command,
        F: Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync + 'static,
    {
        self.register_handler_for(CommandKind::of::<C>(), error, Arc::new(factory));
    }

    pub fn register_handler_for(
        &self,
        command: CommandKind,
        error: ErrorKind,
        factory: HandlerFactory,
    ) {
        self.exact.write().insert((command, error), factory);
    }

    /// Registers the fallback for command type `C` regardless of the error.
    pub fn register_default_command_handler<C, F>(&self, factory: F)
    where
        C: Command,
        F: Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync + 'static,
    {
        self.register_default_command_handler_for(CommandKind::of::<C>(), Arc::new(factory));
    }

    pub fn register_default_command_handler_for(
        &self,
        command: CommandKind,
        factory: HandlerFactory,
    ) {
        self.by_command.write().insert(command, factory);
    }

    /// Registers the fallback for an error kind regardless of which command failed.
    pub fn register_default_exception_handler<F>(&self, error: ErrorKind, factory: F)
    where
        F: Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync + 'static,
    {
        self.by_error.write().insert(error, Arc::new(factory));
    }

    /// Registers the catch-all used when nothing more specific matches.
    pub fn register_default_handler<F>(&self, factory: F)
    where
        F: Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync + 'static,
    {
        *self.fallback.write() = Some(Arc::new(factory));
    }

    /// Produces the recovery command for `command`, which failed with `error`.
    ///
    /// # Errors
    ///
    /// Returns [`NoSuitableHandler`] when no table has a matching entry. Callers are
    /// expected to treat this as fatal.
    pub fn create_recovery(
        &self,
        command: BoxedCommand,
        error: CommandError,
    ) -> Result<BoxedCommand, NoSuitableHandler> {
        let command_kind = command.kind();
        let error_kind = error.kind();

        let factory = self
            .exact
            .read()
            .get(&(command_kind, error_kind))
            .cloned()
            .or_else(|| self.by_error.read().get(&error_kind).cloned())
            .or_else(|| self.by_command.read().get(&command_kind).cloned())
            .or_else(|| self.fallback.read().clone());

        match factory {
            Some(factory) => {
                debug!(command = %command_kind, error = ?error_kind, "Creating recovery command");
                Ok(factory(command, error))
            }
            None => Err(NoSuitableHandler {
                command: command_kind,
                kind: error_kind,
                error: error.to_string(),
            }),
        }
    }

    /// Executes `command` and, if it fails, executes its recovery in line.
    ///
    /// Fatal errors from the command or from its recovery are returned unchanged; a
    /// missing handler or a failing recovery command becomes a [`WorkerError`].
    pub fn execute_recovering(&self, mut command: BoxedCommand) -> Result<(), WorkerError> {
        let error = match command.execute() {
            Ok(()) => return Ok(()),
            Err(CommandError::Fatal(fatal)) => return Err(*fatal),
            Err(error) => error,
        };

        let failed = command.kind();
        let mut recovery = self.create_recovery(command, error)?;
        recovery.execute().map_err(|err| match err {
            CommandError::Fatal(fatal) => *fatal,
            other => WorkerError::Recovery {
                command: failed,
                source: Box::new(other),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Failing(ErrorKind);

    impl Command for Failing {
        fn execute(&mut self) -> Result<(), CommandError> {
            Err(match self.0 {
                ErrorKind::Property => CommandError::property("position", "missing"),
                ErrorKind::Domain(kind) => CommandError::domain(kind, "boom"),
                _ => CommandError::InsufficientResource {
                    resource: "fuel",
                    available: 0,
                    required: 1,
                },
            })
        }
    }

    struct OtherFailing;

    impl Command for OtherFailing {
        fn execute(&mut self) -> Result<(), CommandError> {
            Err(CommandError::property("velocity", "missing"))
        }
    }

    /// Recovery command that records which factory produced it.
    struct Marker(&'static str, Arc<Mutex<Vec<&'static str>>>);

    impl Command for Marker {
        fn execute(&mut self) -> Result<(), CommandError> {
            self.1.lock().push(self.0);
            Ok(())
        }
    }

    fn marking(
        label: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> impl Fn(BoxedCommand, CommandError) -> BoxedCommand + Send + Sync + 'static {
        let log = log.clone();
        move |_: BoxedCommand, _: CommandError| -> BoxedCommand {
            Box::new(Marker(label, log.clone()))
        }
    }

    fn recover(store: &ExceptionHandlerStore, command: BoxedCommand) -> Result<(), WorkerError> {
        store.execute_recovering(command)
    }

    #[test]
    fn exact_handler_beats_command_default() {
        let store = ExceptionHandlerStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.register_handler::<Failing, _>(ErrorKind::Property, marking("exact", &log));
        store.register_default_command_handler::<Failing, _>(marking("by-command", &log));

        recover(&store, Box::new(Failing(ErrorKind::Property))).unwrap();
        recover(&store, Box::new(Failing(ErrorKind::Domain("jam")))).unwrap();

        assert_eq!(*log.lock(), vec!["exact", "by-command"]);
    }

    #[test]
    fn error_default_beats_command_default() {
        let store = ExceptionHandlerStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.register_default_command_handler::<Failing, _>(marking("by-command", &log));
        store.register_default_exception_handler(ErrorKind::Property, marking("by-error", &log));
        store.register_default_handler(marking("fallback", &log));

        recover(&store, Box::new(Failing(ErrorKind::Property))).unwrap();
        recover(&store, Box::new(Failing(ErrorKind::InsufficientResource))).unwrap();
        recover(&store, Box::new(OtherFailing)).unwrap();

        assert_eq!(*log.lock(), vec!["by-error", "by-command", "by-error"]);
    }

    #[test]
    fn catch_all_applies_when_nothing_else_matches() {
        let store = ExceptionHandlerStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.register_default_command_handler::<Failing, _>(marking("by-command", &log));
        store.register_default_handler(marking("fallback", &log));

        recover(&store, Box::new(OtherFailing)).unwrap();
        assert_eq!(*log.lock(), vec!["fallback"]);
    }

    #[test]
    fn registration_overwrites_previous_entry() {
        let store = ExceptionHandlerStore::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        store.register_default_handler(marking("first", &log));
        store.register_default_handler(marking("second", &log));

        recover(&store, Box::new(OtherFailing)).unwrap();
        assert_eq!(*log.lock(), vec!["second"]);
    }

    #[test]
    fn empty_store_reports_no_suitable_handler() {
        let store = ExceptionHandlerStore::new();
        let err = store
            .create_recovery(Box::new(OtherFailing), CommandError::property("velocity", "missing"))
            .err()
            .expect("no handler registered");

        assert_eq!(err.command, CommandKind::of::<OtherFailing>());
        assert_eq!(err.kind, ErrorKind::Property);
        assert!(err.to_string().contains("velocity"));

        assert!(matches!(
            recover(&store, Box::new(OtherFailing)),
            Err(WorkerError::NoSuitableHandler(_))
        ));
    }

    #[test]
    fn failing_recovery_is_reported_with_the_original_command() {
        let store = ExceptionHandlerStore::new();
        store.register_default_handler(|_, _| Box::new(OtherFailing) as BoxedCommand);

        match recover(&store, Box::new(Failing(ErrorKind::InsufficientResource))) {
            Err(WorkerError::Recovery { command, .. }) => {
                assert_eq!(command, CommandKind::of::<Failing>())
            }
            other => panic!("expected a recovery failure, got {other:?}"),
        }
    }
}
