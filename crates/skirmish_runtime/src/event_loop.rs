//! Single-threaded command queue consumer with in-line failure recovery.
//!
//! An [`EventLoop`] moves through `Idle -> Running -> Stopped`. While running it
//! dequeues commands in FIFO order and executes each one; a failing command is handed
//! to the [`ExceptionHandlerStore`] and the recovery command it returns runs
//! immediately on the same thread. A missing handler is fatal and ends the loop.
//!
//! Two stop modes exist. A hard stop ends the loop at the next dequeue and discards
//! whatever is still queued. A soft stop lets the current backlog drain first. A hard
//! stop always supersedes a pending soft stop.

use crate::command::{BoxedCommand, Command};
use crate::error::{CommandError, ResolveError, WorkerError};
use crate::handlers::ExceptionHandlerStore;
use crate::ioc::scope::Scope;
use crate::ioc::Resolver;
use crate::keys::{EVENT_LOOP, EXCEPTION_HANDLER_STORE, SCHEDULE_COMMAND};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const STOP_NEVER: u8 = 0;
const STOP_WHEN_DRAINED: u8 = 1;
const STOP_NOW: u8 = 2;

type Hook = Box<dyn FnMut() + Send>;

/// Lifecycle of an [`EventLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

pub struct EventLoop {
    name: String,
    sender: Sender<BoxedCommand>,
    receiver: Receiver<BoxedCommand>,
    store: Arc<ExceptionHandlerStore>,
    before_hooks: Mutex<Vec<Hook>>,
    after_hooks: Mutex<Vec<Hook>>,
    stop_mode: AtomicU8,
    state: Mutex<LoopState>,
}

impl EventLoop {
    pub fn new(name: impl Into<String>, store: Arc<ExceptionHandlerStore>) -> Arc<Self> {
        let (sender, receiver) = channel::unbounded();
        Arc::new(Self {
            name: name.into(),
            sender,
            receiver,
            store,
            before_hooks: Mutex::new(Vec::new()),
            after_hooks: Mutex::new(Vec::new()),
            stop_mode: AtomicU8::new(STOP_NEVER),
            state: Mutex::new(LoopState::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    pub fn store(&self) -> &Arc<ExceptionHandlerStore> {
        &self.store
    }

    /// Number of commands waiting in the queue.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// Enqueues a command without blocking.
    pub fn put_command<C: Command>(&self, command: C) {
        self.put_boxed(Box::new(command));
    }

    pub fn put_boxed(&self, command: BoxedCommand) {
        // The loop owns the receiver, so the channel cannot be disconnected here.
        if self.sender.send(command).is_err() {
            warn!(event_loop = %self.name, "Dropping command for a disconnected queue");
        }
    }

    /// Adds a hook run once before the first command is dequeued.
    pub fn add_before_hook(&self, hook: impl FnMut() + Send + 'static) {
        self.before_hooks.lock().push(Box::new(hook));
    }

    /// Adds a hook run once after the loop stops cleanly.
    pub fn add_after_hook(&self, hook: impl FnMut() + Send + 'static) {
        self.after_hooks.lock().push(Box::new(hook));
    }

    pub fn set_hard_stop(&self) {
        self.stop_mode.fetch_max(STOP_NOW, Ordering::AcqRel);
    }

    pub fn set_soft_stop(&self) {
        self.stop_mode.fetch_max(STOP_WHEN_DRAINED, Ordering::AcqRel);
    }

    /// Command that hard-stops this loop when dequeued.
    pub fn hard_stop_command(self: &Arc<Self>) -> HardStopCommand {
        HardStopCommand {
            event_loop: Arc::downgrade(self),
        }
    }

    /// Command that soft-stops this loop when dequeued.
    pub fn soft_stop_command(self: &Arc<Self>) -> SoftStopCommand {
        SoftStopCommand {
            event_loop: Arc::downgrade(self),
        }
    }

    /// Runs until stopped, blocking on an empty queue.
    pub fn run_forever(&self) -> Result<(), WorkerError> {
        self.run(false)
    }

    /// Runs until stopped or until the queue is empty, whichever comes first.
    pub fn run_until_complete(&self) -> Result<(), WorkerError> {
        self.run(true)
    }

    fn run(&self, until_complete: bool) -> Result<(), WorkerError> {
        {
            let mut state = self.state.lock();
            if *state != LoopState::Idle {
                return Err(WorkerError::AlreadyStarted(self.name.clone()));
            }
            *state = LoopState::Running;
        }
        info!(event_loop = %self.name, "▶️ Event loop running");

        for hook in self.before_hooks.lock().iter_mut() {
            hook();
        }

        let result = self.process(until_complete);

        let discarded = self.receiver.try_iter().count();
        *self.state.lock() = LoopState::Stopped;

        match &result {
            Ok(()) => {
                for hook in self.after_hooks.lock().iter_mut() {
                    hook();
                }
                info!(event_loop = %self.name, discarded, "⏹️ Event loop stopped");
            }
            Err(err) => {
                error!(event_loop = %self.name, discarded, "💥 Event loop terminated: {err}");
            }
        }
        result
    }

    fn process(&self, until_complete: bool) -> Result<(), WorkerError> {
        loop {
            let mode = self.stop_mode.load(Ordering::Acquire);
            if mode == STOP_NOW {
                return Ok(());
            }

            let command = if until_complete || mode == STOP_WHEN_DRAINED {
                match self.receiver.try_recv() {
                    Ok(command) => command,
                    Err(_) => return Ok(()),
                }
            } else {
                match self.receiver.recv() {
                    Ok(command) => command,
                    Err(_) => return Ok(()),
                }
            };

            self.store.execute_recovering(command)?;
        }
    }

    /// Registers this loop in `scope`: [`EVENT_LOOP`], [`EXCEPTION_HANDLER_STORE`], and
    /// [`SCHEDULE_COMMAND`] pointing at this loop's queue.
    ///
    /// The scope keeps only weak references to the loop.
    pub fn register(
        self: &Arc<Self>,
        resolver: &Resolver,
        scope: Arc<Scope>,
    ) -> Result<(), CommandError> {
        let store = self.store.clone();
        let current = Arc::downgrade(self);
        let schedule = Arc::downgrade(self);
        resolver.within(scope, || {
            resolver.register(&EVENT_LOOP, move |()| upgrade(&current))?;
            resolver.register(&EXCEPTION_HANDLER_STORE, move |()| Ok(store.clone()))?;
            resolver.register(&SCHEDULE_COMMAND, move |command: BoxedCommand| {
                upgrade(&schedule)?.put_boxed(command);
                Ok(())
            })
        })
    }

    /// Starts the loop on a dedicated named thread whose current scope is `scope`.
    pub fn spawn(
        self: &Arc<Self>,
        resolver: Arc<Resolver>,
        scope: Arc<Scope>,
    ) -> io::Result<JoinHandle<Result<(), WorkerError>>> {
        let event_loop = self.clone();
        thread::Builder::new().name(self.name.clone()).spawn(move || {
            resolver
                .set_current_scope(scope.clone())
                .map_err(|source| WorkerError::Scope {
                    name: event_loop.name.clone(),
                    source: Box::new(source),
                })?;
            debug!(
                event_loop = %event_loop.name,
                scope = %scope.name(),
                "Worker entered its scope"
            );
            event_loop.run_forever()
        })
    }
}

fn upgrade(event_loop: &Weak<EventLoop>) -> Result<Arc<EventLoop>, ResolveError> {
    event_loop.upgrade().ok_or_else(|| ResolveError::Unavailable {
        key: EVENT_LOOP.key().clone(),
        reason: "event loop has been dropped".to_string(),
    })
}

pub struct HardStopCommand {
    event_loop: Weak<EventLoop>,
}

impl Command for HardStopCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        if let Some(event_loop) = self.event_loop.upgrade() {
            event_loop.set_hard_stop();
        }
        Ok(())
    }
}

pub struct SoftStopCommand {
    event_loop: Weak<EventLoop>,
}

impl Command for SoftStopCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        if let Some(event_loop) = self.event_loop.upgrade() {
            event_loop.set_soft_stop();
        }
        Ok(())
    }
}
