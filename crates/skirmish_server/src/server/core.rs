//! The sharded dispatch server.

use crate::auth::{AllowAll, Authorizer, Claims, AUTH_STRATEGY};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::messaging::{register_default_handlers, GameMessage, InterpretCommand};
use crate::objects::{ObjectTable, GAME_OBJECTS};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use skirmish_runtime::{
    DeliverToSession, Dependency, EventLoop, ExceptionHandlerStore, GameCommand, ResolveError,
    Resolver, Scope, SessionId, SessionRoster, TickSession, WorkerError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

/// The running server, registered in the root scope by [`DispatchServer::start`].
pub const SERVER: Dependency<(), Arc<DispatchServer>> = Dependency::new("Server");

/// One event loop, its thread, its scope and the sessions it ticks.
struct Shard {
    scope: Arc<Scope>,
    event_loop: Arc<EventLoop>,
    roster: Arc<SessionRoster>,
    worker: Mutex<Option<JoinHandle<Result<(), WorkerError>>>>,
}

/// Spreads sessions over a fixed pool of event loops.
///
/// Session `n` lives on shard `n % shard_count`. Everything that touches a session's
/// queue is enqueued on that shard's loop and runs on its thread.
///
/// # Lifecycle
///
/// 1. [`new`](Self::new) with a configuration and the resolver every shard resolves through
/// 2. [`start`](Self::start) spawns one named worker thread per shard
/// 3. [`new_session`](Self::new_session) / [`route_message`](Self::route_message) while running
/// 4. [`stop`](Self::stop) then [`join`](Self::join), or [`shutdown`](Self::shutdown) for both
pub struct DispatchServer {
    config: ServerConfig,
    resolver: Arc<Resolver>,
    store: Arc<ExceptionHandlerStore>,
    shards: RwLock<Vec<Shard>>,
    /// Session id to shard index.
    sessions: DashMap<SessionId, usize>,
    /// Next id to hand out; advanced only once a session is fully admitted.
    next_session: Mutex<u64>,
    stopping: AtomicBool,
}

impl DispatchServer {
    /// Creates a server that has not started any shard yet.
    ///
    /// # Arguments
    ///
    /// * `config` - Shard count, tick quantum, auth and recovery settings
    /// * `resolver` - Resolver with a scope chain installed; the server registers
    ///   itself and its defaults in that chain's root scope
    pub fn new(config: ServerConfig, resolver: Arc<Resolver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            resolver,
            store: ExceptionHandlerStore::new(),
            shards: RwLock::new(Vec::new()),
            sessions: DashMap::new(),
            next_session: Mutex::new(0),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Recovery table shared by every shard and session.
    pub fn store(&self) -> &Arc<ExceptionHandlerStore> {
        &self.store
    }

    /// Registers the server in the root scope and starts `shard_count` event loops.
    ///
    /// Root registrations: [`SERVER`], the default message handlers, and an allow-all
    /// [`AUTH_STRATEGY`] unless one is already registered. Each shard gets a scope named
    /// `EventLoop <i>` whose parent is the root, and a worker thread named `event-loop-<i>`.
    ///
    /// # Returns
    ///
    /// `Ok(())` once every worker thread is running, [`ServerError::AlreadyStarted`] on a
    /// second call, or the first registration or spawn failure.
    pub fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        self.config.validate()?;
        let mut shards = self.shards.write();
        if !shards.is_empty() {
            return Err(ServerError::AlreadyStarted);
        }

        let root = self.resolver.root_scope()?;
        let server = Arc::downgrade(self);
        self.resolver.within(root.clone(), || {
            self.resolver
                .register(&SERVER, move |()| upgrade(&server))?;
            if matches!(
                self.resolver.resolve(&AUTH_STRATEGY, ()),
                Err(ResolveError::NotFound { .. })
            ) {
                self.resolver
                    .register(&AUTH_STRATEGY, |()| Ok(Arc::new(AllowAll) as Arc<dyn Authorizer>))?;
            }
            register_default_handlers(&self.resolver)
        })?;
        self.store.install_policy(&self.resolver, self.config.recovery);

        for index in 0..self.config.shard_count {
            let scope = self
                .resolver
                .create_scope(format!("EventLoop {index}"), Some(root.clone()))?;
            let event_loop = EventLoop::new(format!("event-loop-{index}"), self.store.clone());
            event_loop.register(&self.resolver, scope.clone())?;
            let worker = event_loop
                .spawn(self.resolver.clone(), scope.clone())
                .map_err(ServerError::Spawn)?;
            info!("🔧 Shard {} started on thread '{}'", index, event_loop.name());

            shards.push(Shard {
                scope,
                event_loop,
                roster: SessionRoster::new(),
                worker: Mutex::new(Some(worker)),
            });
        }

        info!(
            "🚀 Dispatch server running with {} shards, {:?} quantum, recovery {:?}",
            shards.len(),
            self.config.quantum(),
            self.config.recovery
        );
        Ok(())
    }

    /// Admits a new session and starts ticking it on its shard.
    ///
    /// The session scope `Game <id>` has the shard scope as parent; it carries the
    /// session's scheduling dependency and its [`GAME_OBJECTS`] table. Admissions are
    /// serialized; a failed admission does not use up its id.
    pub fn new_session(&self) -> Result<SessionId, ServerError> {
        let shards = self.running_shards()?;
        let mut next_session = self.next_session.lock();
        let id = SessionId(*next_session);
        let index = (id.0 % shards.len() as u64) as usize;
        let shard = &shards[index];

        let scope = self
            .resolver
            .create_scope(format!("Game {id}"), Some(shard.scope.clone()))?;
        let (game, sender) = GameCommand::open(
            id,
            self.config.quantum(),
            scope,
            self.resolver.clone(),
            |resolver| {
                let objects = ObjectTable::new();
                resolver.register(&GAME_OBJECTS, move |()| Ok(objects.clone()))
            },
        )?;

        shard.roster.admit(game, sender);
        self.sessions.insert(id, index);
        TickSession::start(&shard.event_loop, shard.roster.clone(), id);
        *next_session += 1;

        info!("🎮 Session {} admitted on {}", id, shard.event_loop.name());
        Ok(id)
    }

    /// Checks `claims` against the registered [`AUTH_STRATEGY`]. Always passes when
    /// authorization is disabled in the configuration.
    pub fn authorize(
        &self,
        session: SessionId,
        claims: Option<&Claims>,
    ) -> Result<(), ServerError> {
        if !self.config.enable_auth {
            return Ok(());
        }
        let authorizer = self.resolver.resolve(&AUTH_STRATEGY, ())?;
        authorizer.authorize(session, claims)
    }

    /// Queues a message for interpretation inside its session.
    ///
    /// The delivery itself runs on the session's shard thread; a session ended in the
    /// meantime drops the message there.
    pub fn route_message(&self, message: GameMessage) -> Result<(), ServerError> {
        let shards = self.running_shards()?;
        let session = message.session_id;
        let index = self
            .shard_of(session)
            .ok_or(ServerError::UnknownSession(session))?;
        let shard = &shards[index];

        debug!(
            session = %session,
            entity = message.entity_id,
            operation = %message.operation_id,
            shard = %shard.event_loop.name(),
            "📨 Routing message"
        );
        let interpret = InterpretCommand::new(self.resolver.clone(), message);
        shard.event_loop.put_command(DeliverToSession::new(
            shard.roster.clone(),
            session,
            Box::new(interpret),
        ));
        Ok(())
    }

    /// Removes a session. Its queued commands are discarded and it is never ticked again.
    pub fn end_session(&self, session: SessionId) -> Result<(), ServerError> {
        let shards = self.shards.read();
        let (_, index) = self
            .sessions
            .remove(&session)
            .ok_or(ServerError::UnknownSession(session))?;
        if let Some(shard) = shards.get(index) {
            shard.roster.remove(session);
        }
        info!("👋 Session {} ended", session);
        Ok(())
    }

    /// Puts a hard stop on every shard's loop. Later calls do nothing.
    pub fn stop(&self) {
        let shards = self.shards.read();
        if shards.is_empty() || self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        for shard in shards.iter() {
            shard.event_loop.put_command(shard.event_loop.hard_stop_command());
        }
        info!("🛑 Stop requested on {} shards", shards.len());
    }

    /// Waits for every shard worker to finish.
    ///
    /// Every worker is joined even if one fails; the first failure is returned.
    pub fn join(&self) -> Result<(), ServerError> {
        let shards = self.shards.read();
        let mut first_error = None;
        for shard in shards.iter() {
            let Some(worker) = shard.worker.lock().take() else {
                continue;
            };
            let name = shard.event_loop.name().to_string();
            let outcome = match worker.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(source)) => Err(ServerError::Worker {
                    shard: name.clone(),
                    source,
                }),
                Err(_) => Err(ServerError::WorkerPanicked(name.clone())),
            };
            match outcome {
                Ok(()) => debug!(shard = %name, "Shard worker joined"),
                Err(err) => {
                    error!("❌ Shard {} ended abnormally: {}", name, err);
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// [`stop`](Self::stop) followed by [`join`](Self::join).
    pub fn shutdown(&self) -> Result<(), ServerError> {
        self.stop();
        self.join()
    }

    /// Index of the shard a live session runs on.
    pub fn shard_of(&self, session: SessionId) -> Option<usize> {
        self.sessions.get(&session).map(|entry| *entry.value())
    }

    pub fn shard_count(&self) -> usize {
        self.shards.read().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_running(&self) -> bool {
        !self.shards.read().is_empty() && !self.stopping.load(Ordering::SeqCst)
    }

    fn running_shards(&self) -> Result<RwLockReadGuard<'_, Vec<Shard>>, ServerError> {
        let shards = self.shards.read();
        if shards.is_empty() {
            return Err(ServerError::NotStarted);
        }
        if self.stopping.load(Ordering::SeqCst) {
            return Err(ServerError::Stopped);
        }
        Ok(shards)
    }
}

fn upgrade(server: &Weak<DispatchServer>) -> Result<Arc<DispatchServer>, ResolveError> {
    server.upgrade().ok_or_else(|| ResolveError::Unavailable {
        key: SERVER.key().clone(),
        reason: "server has been dropped".to_string(),
    })
}
