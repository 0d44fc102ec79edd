//! Cooperative session scheduling.
//!
//! Each session owns a private command queue and a scope whose parent is its shard's
//! scope. A [`GameCommand`] drains that queue for at most one quantum per tick. Ticks
//! are driven by a [`SessionRoster`] per shard: every live session has exactly one
//! [`TickSession`] token, so sessions take turns with each other and with one-off
//! commands queued on the same loop. A token whose session has nothing queued is
//! parked in the roster and goes back on the loop when the next command is delivered.
//!
//! A tick is not preemptive. The quantum is checked between commands, and at least one
//! queued command runs per tick.

use crate::command::{BoxedCommand, Command};
use crate::error::{CommandError, WorkerError};
use crate::event_loop::EventLoop;
use crate::handlers::ExceptionHandlerStore;
use crate::ioc::scope::Scope;
use crate::ioc::Resolver;
use crate::keys::{EXCEPTION_HANDLER_STORE, SCHEDULE_COMMAND};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Dense, monotonically allocated session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One session's tick: drains its private queue inside its own scope for one quantum.
pub struct GameCommand {
    id: SessionId,
    queue: Receiver<BoxedCommand>,
    quantum: Duration,
    scope: Arc<Scope>,
    resolver: Arc<Resolver>,
    store: Arc<ExceptionHandlerStore>,
}

impl GameCommand {
    /// Builds the tick for a session and runs `init` once with `scope` as the current scope.
    ///
    /// # Arguments
    ///
    /// * `queue` - The session's private command queue
    /// * `quantum` - Wall-clock budget of one tick
    /// * `scope` - The session scope, made current for `init` and for every tick
    /// * `store` - Recovery table for commands failing inside the session
    /// * `init` - Setup run once in the session scope, e.g. registering session dependencies
    pub fn new(
        id: SessionId,
        queue: Receiver<BoxedCommand>,
        quantum: Duration,
        scope: Arc<Scope>,
        resolver: Arc<Resolver>,
        store: Arc<ExceptionHandlerStore>,
        init: impl FnOnce(&Resolver) -> Result<(), CommandError>,
    ) -> Result<Self, CommandError> {
        resolver.within(scope.clone(), || init(&resolver))?;
        Ok(Self {
            id,
            queue,
            quantum,
            scope,
            resolver,
            store,
        })
    }

    /// Creates the session queue, points the scope's [`SCHEDULE_COMMAND`] at it, then
    /// builds the tick. Returns the tick and the queue's sending half.
    ///
    /// The recovery table is the [`EXCEPTION_HANDLER_STORE`] visible from `scope`,
    /// normally the one registered by the owning event loop.
    pub fn open(
        id: SessionId,
        quantum: Duration,
        scope: Arc<Scope>,
        resolver: Arc<Resolver>,
        init: impl FnOnce(&Resolver) -> Result<(), CommandError>,
    ) -> Result<(Self, Sender<BoxedCommand>), CommandError> {
        let store = resolver.within(scope.clone(), || {
            Ok(resolver.resolve(&EXCEPTION_HANDLER_STORE, ())?)
        })?;
        let (sender, receiver) = channel::unbounded();
        let schedule = sender.clone();
        let game = Self::new(id, receiver, quantum, scope, resolver, store, move |resolver| {
            resolver.register(&SCHEDULE_COMMAND, move |command: BoxedCommand| {
                if schedule.send(command).is_err() {
                    warn!(session = %id, "Session queue closed, dropping scheduled command");
                }
                Ok(())
            })?;
            init(resolver)
        })?;
        Ok((game, sender))
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    /// True when nothing is waiting on the session queue.
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs one tick and returns how many commands it executed.
    pub fn tick(&mut self) -> Result<usize, WorkerError> {
        let _scope = self
            .resolver
            .enter(self.scope.clone())
            .map_err(|source| WorkerError::Scope {
                name: self.scope.name().to_string(),
                source: Box::new(source),
            })?;

        let started = Instant::now();
        let mut executed = 0;
        while let Ok(command) = self.queue.try_recv() {
            self.store.execute_recovering(command)?;
            executed += 1;
            if started.elapsed() >= self.quantum {
                break;
            }
        }

        trace!(
            session = %self.id,
            executed,
            elapsed = ?started.elapsed(),
            "Session tick finished"
        );
        Ok(executed)
    }
}

impl Command for GameCommand {
    fn execute(&mut self) -> Result<(), CommandError> {
        self.tick()?;
        Ok(())
    }
}

struct SessionSlot {
    sender: Sender<BoxedCommand>,
    game: Option<GameCommand>,
    parked: Option<Weak<EventLoop>>,
}

/// Round-robin table of the sessions owned by one shard.
///
/// A session's tick is checked out while it runs and returned afterwards; removing a
/// session while its tick is checked out drops the tick on return. Returning a tick
/// and delivering a command both happen under the table lock, so a parked token is
/// always woken by the delivery that follows it.
#[derive(Default)]
pub struct SessionRoster {
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl SessionRoster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn admit(&self, game: GameCommand, sender: Sender<BoxedCommand>) {
        let id = game.id();
        self.sessions.lock().insert(
            id,
            SessionSlot {
                sender,
                game: Some(game),
                parked: None,
            },
        );
    }

    /// Removes a session; its queued commands are discarded. Returns `false` if unknown.
    pub fn remove(&self, id: SessionId) -> bool {
        self.sessions.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Pushes a command onto a session's private queue, waking its tick if parked.
    pub fn deliver(
        self: &Arc<Self>,
        id: SessionId,
        command: BoxedCommand,
    ) -> Result<(), BoxedCommand> {
        let mut sessions = self.sessions.lock();
        let Some(slot) = sessions.get_mut(&id) else {
            return Err(command);
        };
        slot.sender.send(command).map_err(|err| err.into_inner())?;
        if let Some(event_loop) = slot.parked.take() {
            trace!(session = %id, "Waking parked session");
            TickSession {
                roster: self.clone(),
                session: id,
                event_loop,
            }
            .reschedule();
        }
        Ok(())
    }

    fn take(&self, id: SessionId) -> Option<GameCommand> {
        self.sessions.lock().get_mut(&id).and_then(|slot| slot.game.take())
    }

    fn restore(&self, game: GameCommand) {
        if let Some(slot) = self.sessions.lock().get_mut(&game.id()) {
            slot.game = Some(game);
        }
    }

    /// Returns a tick after a successful run and sends `token` on: dropped when the
    /// session is gone, parked when its queue is empty, back on the loop otherwise.
    fn settle(&self, game: GameCommand, token: TickSession) {
        let mut sessions = self.sessions.lock();
        let Some(slot) = sessions.get_mut(&game.id()) else {
            debug!(session = %game.id(), "Session ended, retiring tick");
            return;
        };
        let idle = game.is_idle();
        slot.game = Some(game);
        if idle {
            trace!(session = %token.session, "Session idle, parking tick");
            slot.parked = Some(token.event_loop);
        } else {
            token.reschedule();
        }
    }
}

/// Runs one tick of a session, then hands a fresh token for the same session back to
/// the roster. A token for a removed session retires without re-enqueueing.
pub struct TickSession {
    roster: Arc<SessionRoster>,
    session: SessionId,
    event_loop: Weak<EventLoop>,
}

impl TickSession {
    /// Starts the perpetual tick cycle of `session` on `event_loop`.
    pub fn start(event_loop: &Arc<EventLoop>, roster: Arc<SessionRoster>, session: SessionId) {
        event_loop.put_command(Self {
            roster,
            session,
            event_loop: Arc::downgrade(event_loop),
        });
    }

    fn next(&self) -> Self {
        Self {
            roster: self.roster.clone(),
            session: self.session,
            event_loop: self.event_loop.clone(),
        }
    }

    fn reschedule(self) {
        match self.event_loop.upgrade() {
            Some(event_loop) => event_loop.put_command(self),
            None => warn!(session = %self.session, "Event loop gone, session can no longer tick"),
        }
    }
}

impl Command for TickSession {
    fn execute(&mut self) -> Result<(), CommandError> {
        let Some(mut game) = self.roster.take(self.session) else {
            debug!(session = %self.session, "Session ended, retiring tick");
            return Ok(());
        };

        if let Err(err) = game.tick() {
            self.roster.restore(game);
            return Err(err.into());
        }
        self.roster.settle(game, self.next());
        Ok(())
    }
}

/// Moves a command onto a session's queue. Runs on the session's shard thread.
pub struct DeliverToSession {
    roster: Arc<SessionRoster>,
    session: SessionId,
    command: Option<BoxedCommand>,
}

impl DeliverToSession {
    pub fn new(roster: Arc<SessionRoster>, session: SessionId, command: BoxedCommand) -> Self {
        Self {
            roster,
            session,
            command: Some(command),
        }
    }
}

impl Command for DeliverToSession {
    fn execute(&mut self) -> Result<(), CommandError> {
        if let Some(command) = self.command.take() {
            if self.roster.deliver(self.session, command).is_err() {
                warn!(session = %self.session, "Session ended before delivery, dropping command");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::DeferredCommand;
    use crate::ioc::scope::ScopeChain;
    use std::thread;

    fn resolver() -> Arc<Resolver> {
        let resolver = Resolver::new();
        ScopeChain::install(&resolver).unwrap();
        let store = ExceptionHandlerStore::new();
        resolver
            .register(&EXCEPTION_HANDLER_STORE, move |()| Ok(store.clone()))
            .unwrap();
        resolver
    }

    fn open(
        resolver: &Arc<Resolver>,
        id: u64,
        quantum: Duration,
    ) -> (GameCommand, Sender<BoxedCommand>) {
        let scope = resolver.create_scope(format!("Game {id}"), None).unwrap();
        GameCommand::open(
            SessionId(id),
            quantum,
            scope,
            resolver.clone(),
            |_| Ok(()),
        )
        .unwrap()
    }

    fn sleeper(ms: u64) -> BoxedCommand {
        Box::new(DeferredCommand::new(
            |ms: &u64| {
                thread::sleep(Duration::from_millis(*ms));
                Ok(())
            },
            ms,
        ))
    }

    #[test]
    fn tick_stops_when_queue_is_empty() {
        let resolver = resolver();
        let (mut game, sender) = open(&resolver, 0, Duration::from_secs(10));
        for _ in 0..3 {
            sender.send(sleeper(0)).unwrap();
        }
        assert_eq!(game.tick().unwrap(), 3);
        assert_eq!(game.tick().unwrap(), 0);
    }

    #[test]
    fn tick_yields_after_quantum() {
        let resolver = resolver();
        let (mut game, sender) = open(&resolver, 0, Duration::from_millis(25));
        for _ in 0..20 {
            sender.send(sleeper(10)).unwrap();
        }

        let first = game.tick().unwrap();
        assert!((1..20).contains(&first), "first tick ran {first} commands");
        assert_eq!(game.queue.len(), 20 - first);
    }

    #[test]
    fn long_command_is_not_preempted() {
        let resolver = resolver();
        let (mut game, sender) = open(&resolver, 0, Duration::from_millis(1));
        sender.send(sleeper(20)).unwrap();
        sender.send(sleeper(0)).unwrap();
        assert_eq!(game.tick().unwrap(), 1);
    }

    #[test]
    fn commands_run_in_the_session_scope() {
        let resolver = resolver();
        let (mut game, sender) = open(&resolver, 7, Duration::from_secs(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let inner = resolver.clone();
        sender
            .send(Box::new(DeferredCommand::new(
                move |_: &()| {
                    sink.lock().push(inner.current_scope()?.name().to_string());
                    // Scheduling from inside a session lands on the session queue.
                    let sink = sink.clone();
                    let follow_up = DeferredCommand::new(
                        move |_: &()| {
                            sink.lock().push("follow-up".to_string());
                            Ok(())
                        },
                        (),
                    );
                    inner.resolve(&SCHEDULE_COMMAND, Box::new(follow_up))?;
                    Ok(())
                },
                (),
            )))
            .unwrap();

        assert_eq!(game.tick().unwrap(), 2);
        assert_eq!(*seen.lock(), vec!["Game 7".to_string(), "follow-up".to_string()]);
        assert_eq!(resolver.current_scope().unwrap().name(), "root");
    }

    #[test]
    fn init_runs_once_inside_the_session_scope() {
        let resolver = resolver();
        let scope = resolver.create_scope("Game 1", None).unwrap();
        let mut init_scope = None;
        GameCommand::open(
            SessionId(1),
            Duration::from_millis(5),
            scope,
            resolver.clone(),
            |resolver| {
                init_scope = Some(resolver.current_scope()?.name().to_string());
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(init_scope.as_deref(), Some("Game 1"));
    }

    #[test]
    fn sessions_on_one_loop_take_turns() {
        let resolver = resolver();
        let event_loop = EventLoop::new("roster", ExceptionHandlerStore::new());
        let roster = SessionRoster::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for id in 0..2 {
            let (game, sender) = open(&resolver, id, Duration::ZERO);
            for step in 0..3 {
                let order = order.clone();
                let stop = Arc::downgrade(&event_loop);
                sender
                    .send(Box::new(DeferredCommand::new(
                        move |_: &()| {
                            let mut order = order.lock();
                            order.push((id, step));
                            if order.len() == 6 {
                                if let Some(event_loop) = stop.upgrade() {
                                    event_loop.set_hard_stop();
                                }
                            }
                            Ok(())
                        },
                        (),
                    )))
                    .unwrap();
            }
            roster.admit(game, sender);
            TickSession::start(&event_loop, roster.clone(), SessionId(id));
        }

        event_loop.run_forever().unwrap();
        assert_eq!(
            *order.lock(),
            vec![(0, 0), (1, 0), (0, 1), (1, 1), (0, 2), (1, 2)]
        );
    }

    #[test]
    fn removed_session_retires_its_tick() {
        let resolver = resolver();
        let event_loop = EventLoop::new("retire", ExceptionHandlerStore::new());
        let roster = SessionRoster::new();
        let (game, sender) = open(&resolver, 0, Duration::from_millis(5));
        roster.admit(game, sender);
        TickSession::start(&event_loop, roster.clone(), SessionId(0));

        assert!(roster.remove(SessionId(0)));
        assert!(!roster.remove(SessionId(0)));
        event_loop.run_until_complete().unwrap();
        assert_eq!(event_loop.pending(), 0);
        assert!(roster.is_empty());
    }

    #[test]
    fn idle_session_parks_until_a_command_is_delivered() {
        let resolver = resolver();
        let event_loop = EventLoop::new("park", ExceptionHandlerStore::new());
        let roster = SessionRoster::new();
        let (game, sender) = open(&resolver, 0, Duration::from_millis(5));
        roster.admit(game, sender);
        TickSession::start(&event_loop, roster.clone(), SessionId(0));

        // Returns only because the idle tick stops re-enqueueing itself.
        event_loop.run_until_complete().unwrap();
        assert_eq!(event_loop.pending(), 0);
        assert!(roster.sessions.lock()[&SessionId(0)].parked.is_some());

        assert!(roster.deliver(SessionId(0), sleeper(0)).is_ok());
        assert_eq!(event_loop.pending(), 1);
        assert!(roster.sessions.lock()[&SessionId(0)].parked.is_none());

        // Nothing is parked now, so a second delivery enqueues no extra token.
        assert!(roster.deliver(SessionId(0), sleeper(0)).is_ok());
        assert_eq!(event_loop.pending(), 1);
    }

    #[test]
    fn open_uses_the_store_visible_from_the_session_scope() {
        let resolver = Resolver::new();
        ScopeChain::install(&resolver).unwrap();
        let scope = resolver.create_scope("Game 9", None).unwrap();
        let missing = GameCommand::open(
            SessionId(9),
            Duration::from_millis(5),
            scope.clone(),
            resolver.clone(),
            |_| Ok(()),
        );
        assert!(missing.is_err());

        let store = ExceptionHandlerStore::new();
        let registered = store.clone();
        resolver
            .register(&EXCEPTION_HANDLER_STORE, move |()| Ok(registered.clone()))
            .unwrap();
        let (game, _sender) = GameCommand::open(
            SessionId(9),
            Duration::from_millis(5),
            scope,
            resolver.clone(),
            |_| Ok(()),
        )
        .unwrap();
        assert!(Arc::ptr_eq(&game.store, &store));
    }

    #[test]
    fn scheduling_onto_a_dropped_session_is_discarded() {
        let resolver = resolver();
        let (game, sender) = open(&resolver, 4, Duration::from_millis(5));
        let scope = game.scope().clone();
        drop(game);
        drop(sender);

        let scheduled = resolver.within(scope, || {
            Ok(resolver.resolve(&SCHEDULE_COMMAND, sleeper(0))?)
        });
        assert!(scheduled.is_ok());
    }

    #[test]
    fn delivery_to_unknown_session_is_dropped() {
        let roster = SessionRoster::new();
        let mut deliver = DeliverToSession::new(roster.clone(), SessionId(3), sleeper(0));
        deliver.execute().unwrap();
        assert!(roster.deliver(SessionId(3), sleeper(0)).is_err());
    }
}
