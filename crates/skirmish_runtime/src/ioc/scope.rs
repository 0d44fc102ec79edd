//! Hierarchical scopes on top of the [`Resolver`].
//!
//! A [`ScopeChain`] owns a root [`Scope`] and installs a strategy that resolves an
//! identifier by walking from the calling thread's current scope up through each
//! parent until the root. Each non-root scope stores its parent as an ordinary entry
//! under [`SCOPE_PARENT`]; the root's entry for that key always fails with
//! [`ResolveError::RootHasNoParent`], which ends the walk.
//!
//! The current scope is thread-local. Setting it on one thread never changes what
//! another thread sees; a thread that never set it resolves from the root.
//!
//! The chain's own operations are registered in the root scope and are reached through
//! the resolver like any other dependency:
//!
//! | key | signature |
//! |-----|-----------|
//! | [`SCOPE_CURRENT`] | `() -> Arc<Scope>` |
//! | [`SCOPE_SET_CURRENT`] | `Arc<Scope> -> BoxedCommand` |
//! | [`SCOPE_CLEAR_CURRENT`] | `() -> BoxedCommand` |
//! | [`SCOPE_PARENT`] | `() -> Arc<Scope>` |
//! | [`SCOPE_CREATE`] | `(name, Option<parent>) -> Arc<Scope>` |
//! | [`SCOPE_REGISTER`] | `(key, provider) -> BoxedCommand` |

use super::{Dependency, DependencyKey, Provider, Resolver, Strategy, UPDATE_STRATEGY};
use crate::command::{BoxedCommand, Command};
use crate::error::{CommandError, ResolveError};
use parking_lot::{Mutex, RwLock};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

pub const SCOPE_CURRENT: Dependency<(), Arc<Scope>> = Dependency::new("Scope.Current");
pub const SCOPE_SET_CURRENT: Dependency<Arc<Scope>, BoxedCommand> =
    Dependency::new("Scope.Current.Set");
pub const SCOPE_CLEAR_CURRENT: Dependency<(), BoxedCommand> =
    Dependency::new("Scope.Current.Clear");
pub const SCOPE_PARENT: Dependency<(), Arc<Scope>> = Dependency::new("Scope.Parent");
pub const SCOPE_CREATE: Dependency<(String, Option<Arc<Scope>>), Arc<Scope>> =
    Dependency::new("Scope.Create");
pub const SCOPE_REGISTER: Dependency<(DependencyKey, Provider), BoxedCommand> =
    Dependency::new("Scope.Register");

static NEXT_CHAIN_ID: AtomicU64 = AtomicU64::new(1);
static GLOBAL_CHAIN: Mutex<Option<Arc<ScopeChain>>> = parking_lot::const_mutex(None);

thread_local! {
    static CURRENT_SCOPE: RefCell<Option<Arc<Scope>>> = const { RefCell::new(None) };
}

/// A named, mutable map from identifier to provider.
pub struct Scope {
    name: String,
    chain: u64,
    entries: RwLock<HashMap<DependencyKey, Provider>>,
}

impl Scope {
    fn new(name: String, chain: u64) -> Arc<Self> {
        Arc::new(Self {
            name,
            chain,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up an identifier in this scope only, without consulting parents.
    pub fn lookup(&self, key: &DependencyKey) -> Option<Provider> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn parent(&self) -> Result<Arc<Scope>, ResolveError> {
        let provider = self
            .lookup(SCOPE_PARENT.key())
            .ok_or(ResolveError::RootHasNoParent)?;
        provider.invoke(SCOPE_PARENT.key(), ())
    }

    fn insert(&self, key: DependencyKey, provider: Provider) {
        self.entries.write().insert(key, provider);
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

/// Owner of a root scope and the strategy that walks scopes towards it.
pub struct ScopeChain {
    id: u64,
    root: Arc<Scope>,
}

/// Installs the scope chain on the process-wide resolver.
///
/// Idempotent and safe to call from several threads at once: the first caller
/// registers the operations and swaps the strategy, later callers get the same chain.
pub fn setup() -> Result<Arc<ScopeChain>, ResolveError> {
    let mut installed = GLOBAL_CHAIN.lock();
    if let Some(chain) = installed.as_ref() {
        return Ok(chain.clone());
    }
    let chain = ScopeChain::install(&Resolver::global())?;
    *installed = Some(chain.clone());
    Ok(chain)
}

impl ScopeChain {
    /// Installs a new chain on `resolver`. Every call creates a distinct root scope.
    pub fn install(resolver: &Resolver) -> Result<Arc<Self>, ResolveError> {
        let id = NEXT_CHAIN_ID.fetch_add(1, Ordering::Relaxed);
        let chain = Arc::new(Self {
            id,
            root: Scope::new("root".to_string(), id),
        });
        chain.register_operations();

        let walker = chain.clone();
        resolver.resolve(
            &UPDATE_STRATEGY,
            Box::new(move |previous| walker.strategy(previous)),
        )?;

        info!(chain = id, "🌳 Scope chain installed");
        Ok(chain)
    }

    pub fn root(&self) -> Arc<Scope> {
        self.root.clone()
    }

    /// The calling thread's current scope, or the root if none was set for this chain.
    pub fn current(&self) -> Arc<Scope> {
        CURRENT_SCOPE
            .with(|current| {
                current
                    .borrow()
                    .as_ref()
                    .filter(|scope| scope.chain == self.id)
                    .cloned()
            })
            .unwrap_or_else(|| self.root.clone())
    }

    pub fn create_scope(&self, name: String, parent: Option<Arc<Scope>>) -> Arc<Scope> {
        let parent = parent.unwrap_or_else(|| self.current());
        let scope = Scope::new(name, self.id);
        scope.insert(SCOPE_PARENT.key().clone(), Provider::value(parent));
        scope
    }

    fn register_operations(self: &Arc<Self>) {
        let root = &self.root;
        root.insert(
            SCOPE_CURRENT.key().clone(),
            chain_op(self, |chain, ()| Ok(chain.current())),
        );
        root.insert(
            SCOPE_SET_CURRENT.key().clone(),
            Provider::new(|scope: Arc<Scope>| {
                Ok(Box::new(SetCurrentScope { scope: Some(scope) }) as BoxedCommand)
            }),
        );
        root.insert(
            SCOPE_CLEAR_CURRENT.key().clone(),
            Provider::new(|()| Ok(Box::new(SetCurrentScope { scope: None }) as BoxedCommand)),
        );
        root.insert(
            SCOPE_PARENT.key().clone(),
            Provider::new(|()| Err::<Arc<Scope>, _>(ResolveError::RootHasNoParent)),
        );
        root.insert(
            SCOPE_CREATE.key().clone(),
            chain_op(self, |chain, (name, parent): (String, Option<Arc<Scope>>)| {
                Ok(chain.create_scope(name, parent))
            }),
        );
        root.insert(
            SCOPE_REGISTER.key().clone(),
            chain_op(self, |chain, (key, provider): (DependencyKey, Provider)| {
                Ok(Box::new(RegisterDependency {
                    scope: chain.current(),
                    key,
                    provider,
                }) as BoxedCommand)
            }),
        );
    }

    fn strategy(self: Arc<Self>, previous: Strategy) -> Strategy {
        Arc::new(move |key: &DependencyKey| {
            let start = self.current();
            let mut scope = start.clone();
            loop {
                if let Some(provider) = scope.lookup(key) {
                    return Ok(provider);
                }
                match scope.parent() {
                    Ok(parent) => scope = parent,
                    Err(ResolveError::RootHasNoParent) => break,
                    Err(other) => return Err(other),
                }
            }
            previous(key).map_err(|err| match err {
                ResolveError::NotFound { key, .. } => ResolveError::NotFound {
                    key,
                    scope: Some(start.name().to_string()),
                },
                other => other,
            })
        })
    }
}

impl fmt::Debug for ScopeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeChain").field("id", &self.id).finish()
    }
}

/// Wraps a chain operation so the root scope holds only a weak reference to its chain.
fn chain_op<A, T, F>(chain: &Arc<ScopeChain>, op: F) -> Provider
where
    A: 'static,
    T: 'static,
    F: Fn(&ScopeChain, A) -> Result<T, ResolveError> + Send + Sync + 'static,
{
    let chain: Weak<ScopeChain> = Arc::downgrade(chain);
    Provider::new(move |args: A| {
        let chain = chain.upgrade().ok_or_else(|| ResolveError::Unavailable {
            key: SCOPE_CURRENT.key().clone(),
            reason: "scope chain has been dropped".to_string(),
        })?;
        op(&chain, args)
    })
}

struct SetCurrentScope {
    scope: Option<Arc<Scope>>,
}

impl Command for SetCurrentScope {
    fn execute(&mut self) -> Result<(), CommandError> {
        let scope = self.scope.clone();
        CURRENT_SCOPE.with(|current| *current.borrow_mut() = scope);
        Ok(())
    }
}

struct RegisterDependency {
    scope: Arc<Scope>,
    key: DependencyKey,
    provider: Provider,
}

impl Command for RegisterDependency {
    fn execute(&mut self) -> Result<(), CommandError> {
        self.scope.insert(self.key.clone(), self.provider.clone());
        Ok(())
    }
}

/// Restores the previous current scope when dropped.
#[must_use = "the previous scope is restored when the guard is dropped"]
pub struct ScopeGuard<'r> {
    resolver: &'r Resolver,
    previous: Arc<Scope>,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.resolver.set_current_scope(self.previous.clone()) {
            warn!(scope = %self.previous.name(), "Failed to restore current scope: {err}");
        }
    }
}

/// Scope operations expressed through resolution, so callers work with any strategy
/// that serves the scope keys.
impl Resolver {
    pub fn current_scope(&self) -> Result<Arc<Scope>, ResolveError> {
        self.resolve(&SCOPE_CURRENT, ())
    }

    pub fn set_current_scope(&self, scope: Arc<Scope>) -> Result<(), CommandError> {
        self.resolve(&SCOPE_SET_CURRENT, scope)?.execute()
    }

    pub fn clear_current_scope(&self) -> Result<(), CommandError> {
        self.resolve(&SCOPE_CLEAR_CURRENT, ())?.execute()
    }

    pub fn parent_scope(&self) -> Result<Arc<Scope>, ResolveError> {
        self.resolve(&SCOPE_PARENT, ())
    }

    pub fn create_scope(
        &self,
        name: impl Into<String>,
        parent: Option<Arc<Scope>>,
    ) -> Result<Arc<Scope>, ResolveError> {
        self.resolve(&SCOPE_CREATE, (name.into(), parent))
    }

    /// The root of the current scope's chain.
    pub fn root_scope(&self) -> Result<Arc<Scope>, ResolveError> {
        let mut scope = self.current_scope()?;
        loop {
            match scope.parent() {
                Ok(parent) => scope = parent,
                Err(ResolveError::RootHasNoParent) => return Ok(scope),
                Err(other) => return Err(other),
            }
        }
    }

    /// Registers a provider in the current scope, never in an ancestor.
    pub fn register<A, T, F>(
        &self,
        dependency: &Dependency<A, T>,
        provider: F,
    ) -> Result<(), CommandError>
    where
        A: 'static,
        T: 'static,
        F: Fn(A) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        self.resolve(
            &SCOPE_REGISTER,
            (dependency.key().clone(), Provider::new(provider)),
        )?
        .execute()
    }

    /// Makes `scope` current until the returned guard is dropped.
    pub fn enter(&self, scope: Arc<Scope>) -> Result<ScopeGuard<'_>, CommandError> {
        let previous = self.current_scope()?;
        self.set_current_scope(scope)?;
        Ok(ScopeGuard {
            resolver: self,
            previous,
        })
    }

    /// Runs `f` with `scope` as the current scope, restoring the previous one afterwards.
    pub fn within<R>(
        &self,
        scope: Arc<Scope>,
        f: impl FnOnce() -> Result<R, CommandError>,
    ) -> Result<R, CommandError> {
        let _guard = self.enter(scope)?;
        f()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    const FORMAT: Dependency<(i32, String), String> = Dependency::new("Test.Format");

    fn chain() -> (Arc<Resolver>, Arc<ScopeChain>) {
        let resolver = Resolver::new();
        let chain = ScopeChain::install(&resolver).expect("chain installs");
        (resolver, chain)
    }

    fn register_counter(resolver: &Resolver, calls: &Arc<AtomicUsize>) {
        let calls = calls.clone();
        resolver
            .register(&FORMAT, move |(n, s): (i32, String)| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("{n}:{s}"))
            })
            .unwrap();
    }

    #[test]
    fn scope_operations() {
        let (resolver, chain) = chain();
        let root = resolver.current_scope().unwrap();
        assert!(Arc::ptr_eq(&root, &chain.root()));

        let scope1 = resolver.create_scope("scope1", None).unwrap();
        assert!(!Arc::ptr_eq(&scope1, &root));

        resolver.set_current_scope(scope1.clone()).unwrap();
        assert!(Arc::ptr_eq(&resolver.current_scope().unwrap(), &scope1));
        assert!(Arc::ptr_eq(&resolver.parent_scope().unwrap(), &root));

        resolver.clear_current_scope().unwrap();
        assert!(Arc::ptr_eq(&resolver.current_scope().unwrap(), &root));
    }

    #[test]
    fn root_has_no_parent() {
        let (resolver, _chain) = chain();
        assert!(matches!(
            resolver.parent_scope(),
            Err(ResolveError::RootHasNoParent)
        ));
    }

    #[test]
    fn create_scope_with_explicit_parent() {
        let (resolver, _chain) = chain();
        let scope1 = resolver.create_scope("scope1", None).unwrap();
        let scope2 = resolver.create_scope("scope2", Some(scope1.clone())).unwrap();

        resolver
            .within(scope2.clone(), || {
                assert!(Arc::ptr_eq(&resolver.current_scope()?, &scope2));
                assert!(Arc::ptr_eq(&resolver.parent_scope()?, &scope1));
                Ok(())
            })
            .unwrap();
        assert_eq!(resolver.root_scope().unwrap().name(), "root");
    }

    #[test]
    fn unknown_dependency_reports_key_and_scope() {
        let (resolver, _chain) = chain();
        let scope = resolver.create_scope("lonely", None).unwrap();
        let err = resolver
            .within(scope, || Ok(resolver.resolve(&FORMAT, (1, "a".into()))))
            .unwrap()
            .unwrap_err();
        match err {
            ResolveError::NotFound { key, scope } => {
                assert_eq!(key.as_str(), "Test.Format");
                assert_eq!(scope.as_deref(), Some("lonely"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn resolve_from_root() {
        let (resolver, _chain) = chain();
        let calls = Arc::new(AtomicUsize::new(0));
        register_counter(&resolver, &calls);

        assert_eq!(resolver.resolve(&FORMAT, (1, "a".into())).unwrap(), "1:a");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_targets_the_current_scope_only() {
        let (resolver, _chain) = chain();
        let parent = resolver.create_scope("parent", None).unwrap();
        let child = resolver.create_scope("child", Some(parent.clone())).unwrap();
        let sibling = resolver.create_scope("sibling", Some(parent.clone())).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        resolver
            .within(child.clone(), || {
                register_counter(&resolver, &calls);
                Ok(())
            })
            .unwrap();

        assert!(child.contains(FORMAT.key()));
        assert!(!parent.contains(FORMAT.key()));
        let from_child = resolver
            .within(child, || Ok(resolver.resolve(&FORMAT, (2, "b".into()))))
            .unwrap();
        assert_eq!(from_child.unwrap(), "2:b");

        let from_sibling = resolver
            .within(sibling, || Ok(resolver.resolve(&FORMAT, (2, "b".into()))))
            .unwrap();
        assert!(matches!(from_sibling, Err(ResolveError::NotFound { .. })));
    }

    #[test]
    fn resolve_inherits_from_parent() {
        let (resolver, _chain) = chain();
        let scope1 = resolver.create_scope("scope1", None).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        resolver
            .within(scope1.clone(), || {
                register_counter(&resolver, &calls);
                Ok(())
            })
            .unwrap();

        let scope2 = resolver.create_scope("scope2", Some(scope1)).unwrap();
        let value = resolver
            .within(scope2, || Ok(resolver.resolve(&FORMAT, (3, "c".into()))))
            .unwrap();
        assert_eq!(value.unwrap(), "3:c");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn current_scope_is_thread_local() {
        let (resolver, chain) = chain();
        let scope1 = resolver.create_scope("scope1", None).unwrap();
        resolver.set_current_scope(scope1.clone()).unwrap();

        let other = resolver.clone();
        let root = chain.root();
        thread::spawn(move || {
            assert!(Arc::ptr_eq(&other.current_scope().unwrap(), &root));
            let scope2 = other.create_scope("scope2", None).unwrap();
            other.set_current_scope(scope2.clone()).unwrap();
            assert!(Arc::ptr_eq(&other.current_scope().unwrap(), &scope2));
        })
        .join()
        .unwrap();

        assert!(Arc::ptr_eq(&resolver.current_scope().unwrap(), &scope1));
        resolver.clear_current_scope().unwrap();
    }

    #[test]
    fn threads_resolve_against_their_own_scopes() {
        let (resolver, _chain) = chain();
        let handles: Vec<_> = ["alpha", "beta"]
            .into_iter()
            .map(|name| {
                let resolver = resolver.clone();
                thread::spawn(move || {
                    let scope = resolver.create_scope(name, None).unwrap();
                    resolver.set_current_scope(scope).unwrap();
                    resolver
                        .register(&FORMAT, move |(n, _): (i32, String)| Ok(format!("{name}{n}")))
                        .unwrap();
                    resolver.resolve(&FORMAT, (1, String::new())).unwrap()
                })
            })
            .collect();

        let results: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results, vec!["alpha1", "beta1"]);
        assert!(resolver.resolve(&FORMAT, (1, String::new())).is_err());
    }

    #[test]
    fn guard_restores_previous_scope() {
        let (resolver, chain) = chain();
        let scope = resolver.create_scope("temporary", None).unwrap();
        {
            let _guard = resolver.enter(scope.clone()).unwrap();
            assert!(Arc::ptr_eq(&resolver.current_scope().unwrap(), &scope));
        }
        assert!(Arc::ptr_eq(&resolver.current_scope().unwrap(), &chain.root()));
    }

    #[test]
    fn update_strategy_stays_reachable_through_the_chain() {
        let (resolver, _chain) = chain();
        resolver
            .resolve(&UPDATE_STRATEGY, Box::new(|previous| previous))
            .unwrap();
        assert!(resolver.current_scope().is_ok());
    }

    #[test]
    fn global_setup_is_idempotent_across_threads() {
        let chains: Vec<_> = (0..8)
            .map(|_| thread::spawn(setup))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        for chain in &chains {
            assert_eq!(chain.id, chains[0].id);
        }
        assert!(Arc::ptr_eq(
            &Resolver::global().current_scope().unwrap(),
            &chains[0].root()
        ));
    }
}
