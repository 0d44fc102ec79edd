//! Dependency resolution.
//!
//! The [`Resolver`] delegates every lookup to its active [`Strategy`]. A fresh resolver
//! only understands [`UPDATE_STRATEGY`]; resolving that key yields a provider which
//! accepts a transformer `previous strategy -> new strategy` and installs the result.
//! This is how the scope chain in [`scope`] replaces the bare default without any
//! caller depending on a concrete resolver type.
//!
//! Identifiers are typed: a [`Dependency<A, T>`] names a provider taking `A` and
//! producing `T`, so a provider's signature is checked by the compiler when it is
//! registered. A provider fetched under a mismatching signature fails with
//! [`ResolveError::SignatureMismatch`] instead of misbehaving.

pub mod scope;

use crate::error::ResolveError;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::info;

/// String identifier of a dependency.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyKey(Cow<'static, str>);

impl DependencyKey {
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency identifier that also fixes the provider's argument and result types.
pub struct Dependency<A, T> {
    key: DependencyKey,
    _signature: PhantomData<fn(A) -> T>,
}

impl<A, T> Dependency<A, T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            key: DependencyKey::from_static(name),
            _signature: PhantomData,
        }
    }

    /// Builds an identifier computed at runtime, such as a per-operation handler name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            key: DependencyKey::new(name),
            _signature: PhantomData,
        }
    }

    pub fn key(&self) -> &DependencyKey {
        &self.key
    }
}

impl<A, T> Clone for Dependency<A, T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _signature: PhantomData,
        }
    }
}

impl<A, T> fmt::Debug for Dependency<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("key", &self.key)
            .field("signature", &type_name::<fn(A) -> T>())
            .finish()
    }
}

type ProviderFn<A, T> = dyn Fn(A) -> Result<T, ResolveError> + Send + Sync;

/// A type-erased provider: a callable that turns call-site arguments into a value.
#[derive(Clone)]
pub struct Provider {
    func: Arc<dyn Any + Send + Sync>,
    signature: &'static str,
}

impl Provider {
    pub fn new<A, T, F>(func: F) -> Self
    where
        A: 'static,
        T: 'static,
        F: Fn(A) -> Result<T, ResolveError> + Send + Sync + 'static,
    {
        let func: Box<ProviderFn<A, T>> = Box::new(func);
        Self {
            func: Arc::new(func),
            signature: type_name::<fn(A) -> T>(),
        }
    }

    /// Provider that hands out clones of a fixed value.
    pub fn value<T>(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::new(move |()| Ok(value.clone()))
    }

    pub fn signature(&self) -> &'static str {
        self.signature
    }

    pub fn invoke<A: 'static, T: 'static>(
        &self,
        key: &DependencyKey,
        args: A,
    ) -> Result<T, ResolveError> {
        let func = self
            .func
            .downcast_ref::<Box<ProviderFn<A, T>>>()
            .ok_or_else(|| ResolveError::SignatureMismatch {
                key: key.clone(),
                registered: self.signature,
                requested: type_name::<fn(A) -> T>(),
            })?;
        func(args)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("signature", &self.signature)
            .finish()
    }
}

/// Resolution strategy: maps an identifier to the provider that serves it.
pub type Strategy = Arc<dyn Fn(&DependencyKey) -> Result<Provider, ResolveError> + Send + Sync>;

/// Transformer handed to [`UPDATE_STRATEGY`]; receives the active strategy and returns
/// its replacement.
pub type StrategyUpdate = Box<dyn FnOnce(Strategy) -> Strategy + Send>;

/// Reserved identifier through which the active strategy is replaced.
pub const UPDATE_STRATEGY: Dependency<StrategyUpdate, ()> = Dependency::new("IoC.Strategy.Update");

static GLOBAL: Lazy<Arc<Resolver>> = Lazy::new(Resolver::new);

/// Holds the active resolution strategy.
///
/// Exactly one strategy is active at any instant. Installation happens under a lock
/// and is a single pointer swap, so readers never see a partially installed strategy.
pub struct Resolver {
    strategy: RwLock<Strategy>,
    install_lock: Mutex<()>,
}

impl Resolver {
    /// Creates an independent resolver running the bare default strategy.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|resolver| Self {
            strategy: RwLock::new(default_strategy(resolver.clone())),
            install_lock: Mutex::new(()),
        })
    }

    /// The process-wide resolver.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    pub fn resolve<A: 'static, T: 'static>(
        &self,
        dependency: &Dependency<A, T>,
        args: A,
    ) -> Result<T, ResolveError> {
        // The lock is released before the provider runs; UPDATE_STRATEGY re-enters it.
        let strategy = self.strategy.read().clone();
        let provider = strategy(dependency.key())?;
        provider.invoke(dependency.key(), args)
    }

    fn install(&self, update: StrategyUpdate) {
        let _installing = self.install_lock.lock();
        let previous = self.strategy.read().clone();
        let next = update(previous);
        *self.strategy.write() = next;
        info!("🔧 Installed new dependency resolution strategy");
    }
}

fn default_strategy(resolver: Weak<Resolver>) -> Strategy {
    Arc::new(move |key: &DependencyKey| {
        if key != UPDATE_STRATEGY.key() {
            return Err(ResolveError::NotFound {
                key: key.clone(),
                scope: None,
            });
        }
        let resolver = resolver.clone();
        Ok(Provider::new(move |update: StrategyUpdate| {
            let resolver = resolver.upgrade().ok_or_else(|| ResolveError::Unavailable {
                key: UPDATE_STRATEGY.key().clone(),
                reason: "resolver has been dropped".to_string(),
            })?;
            resolver.install(update);
            Ok(())
        }))
    })
}
