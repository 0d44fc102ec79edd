//! The command abstraction and its composite variants.
//!
//! A [`Command`] is a unit of deferred, possibly failing work. Everything the runtime
//! schedules is a command: session ticks, stop requests, retries, message deliveries.

use crate::error::CommandError;
use std::any::{type_name, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A unit of work that performs a side effect and reports failure through a typed error.
pub trait Command: Send + 'static {
    fn execute(&mut self) -> Result<(), CommandError>;

    /// Classification used by the exception handler store.
    ///
    /// Defaults to the concrete type of the command.
    fn kind(&self) -> CommandKind {
        CommandKind::of::<Self>()
    }
}

pub type BoxedCommand = Box<dyn Command>;

impl Command for BoxedCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        (**self).execute()
    }

    fn kind(&self) -> CommandKind {
        (**self).kind()
    }
}

/// Type identity of a command, compared by [`TypeId`] and reported by name.
#[derive(Clone, Copy)]
pub struct CommandKind {
    id: TypeId,
    name: &'static str,
}

impl CommandKind {
    pub fn of<C: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<C>(),
            name: type_name::<C>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for CommandKind {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CommandKind {}

impl Hash for CommandKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Executes an ordered list of commands, stopping at the first failure.
///
/// The failure is wrapped in [`CommandError::Macro`] with the index and kind of the
/// failing child. Fatal errors pass through unwrapped so the event loop still sees them.
pub struct MacroCommand {
    commands: Vec<BoxedCommand>,
}

impl MacroCommand {
    pub fn new(commands: Vec<BoxedCommand>) -> Self {
        Self { commands }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

impl Command for MacroCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        for (index, command) in self.commands.iter_mut().enumerate() {
            match command.execute() {
                Ok(()) => {}
                Err(fatal @ CommandError::Fatal(_)) => return Err(fatal),
                Err(source) => {
                    return Err(CommandError::Macro {
                        index,
                        command: command.kind().name(),
                        source: Box::new(source),
                    })
                }
            }
        }
        Ok(())
    }
}

/// Binds a function to a fixed argument and invokes it on every `execute`.
///
/// The command is reusable: executing it twice calls the function twice with the
/// same bound argument.
pub struct DeferredCommand<A, F> {
    func: F,
    args: A,
}

impl<A, F> DeferredCommand<A, F>
where
    A: Send + 'static,
    F: FnMut(&A) -> Result<(), CommandError> + Send + 'static,
{
    pub fn new(func: F, args: A) -> Self {
        Self { func, args }
    }

    /// Replaces the bound argument.
    pub fn bind(mut self, args: A) -> Self {
        self.args = args;
        self
    }
}

impl<A, F> Command for DeferredCommand<A, F>
where
    A: Send + 'static,
    F: FnMut(&A) -> Result<(), CommandError> + Send + 'static,
{
    fn execute(&mut self) -> Result<(), CommandError> {
        (self.func)(&self.args)
    }
}
