//! Observable objects, property accessors and event sources
//!
//! Triggers never look values up by name at runtime. Instead an automation
//! definition builds a [`PropertyAccessor`] (a getter plus optional setter
//! bound to an [`Observable`]) or hands over an [`EventSource`] once, and the
//! trigger samples through those closures on every change.

use crate::error::AutomationError;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Guard for a registered watcher or event handler.
///
/// Dropping the guard unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Create a guard that runs `release` when dropped
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Unsubscribe now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.release.is_some())
            .finish()
    }
}

/// Listener table shared by observables and event sources
struct Listeners<T> {
    next_id: AtomicU64,
    entries: DashMap<u64, Listener<T>>,
}

impl<T: 'static> Listeners<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            entries: DashMap::new(),
        })
    }

    fn add(self: &Arc<Self>, listener: Listener<T>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, listener);

        let listeners = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.entries.remove(&id);
            }
        })
    }

    /// Listeners in subscription order. The map is not held while they run,
    /// so a listener may subscribe or unsubscribe without deadlocking.
    fn snapshot(&self) -> Vec<Listener<T>> {
        let mut entries: Vec<(u64, Listener<T>)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, listener)| listener).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A domain object whose mutations are observed by triggers
///
/// Watchers run synchronously on the mutating thread while a read lock is
/// held. They may read the observable. A write from a watcher on the
/// notifying thread fails with [`AutomationError::ReentrantUpdate`].
pub struct Observable<O> {
    state: RwLock<O>,
    watchers: Arc<Listeners<O>>,
    /// Thread currently running the watchers, if any
    notifying: Mutex<Option<ThreadId>>,
}

/// Marks the current thread as notifying until dropped
struct Notifying<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> Notifying<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self { slot }
    }
}

impl Drop for Notifying<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

impl<O: Send + Sync + 'static> Observable<O> {
    /// Wrap a value
    pub fn new(value: O) -> Self {
        Self {
            state: RwLock::new(value),
            watchers: Listeners::new(),
            notifying: Mutex::new(None),
        }
    }

    /// Read the current value.
    ///
    /// Safe to call from a watcher while an update is being published.
    pub fn read<R>(&self, f: impl FnOnce(&O) -> R) -> R {
        f(&self.state.read_recursive())
    }

    /// Mutate the value, then notify every watcher with the new state
    pub fn update<R>(&self, f: impl FnOnce(&mut O) -> R) -> Result<R, AutomationError> {
        if *self.notifying.lock() == Some(thread::current().id()) {
            return Err(AutomationError::ReentrantUpdate(format!(
                "{} watcher(s) still running on this thread",
                self.watchers.len()
            )));
        }

        let mut guard = self.state.write();
        let out = f(&mut guard);
        let guard = RwLockWriteGuard::downgrade(guard);
        let _notifying = Notifying::enter(&self.notifying);
        for watcher in self.watchers.snapshot() {
            watcher(&guard);
        }
        Ok(out)
    }

    /// Register a watcher called after every update
    pub fn subscribe(&self, watcher: impl Fn(&O) + Send + Sync + 'static) -> Subscription {
        self.watchers.add(Arc::new(watcher))
    }

    /// Number of live watchers
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl<O: Clone + Send + Sync + 'static> Observable<O> {
    /// Clone the current value
    #[must_use]
    pub fn snapshot(&self) -> O {
        self.state.read_recursive().clone()
    }
}

/// A named value on an observable object, read and written through closures
pub struct PropertyAccessor<O, V> {
    name: String,
    source: Arc<Observable<O>>,
    getter: Arc<dyn Fn(&O) -> V + Send + Sync>,
    setter: Option<Arc<dyn Fn(&mut O, V) + Send + Sync>>,
}

impl<O, V> Clone for PropertyAccessor<O, V> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: Arc::clone(&self.source),
            getter: Arc::clone(&self.getter),
            setter: self.setter.clone(),
        }
    }
}

impl<O: Send + Sync + 'static, V> PropertyAccessor<O, V> {
    /// Create a read-only accessor
    pub fn new(
        source: Arc<Observable<O>>,
        name: impl Into<String>,
        getter: impl Fn(&O) -> V + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            getter: Arc::new(getter),
            setter: None,
        }
    }

    /// Attach a setter
    #[must_use]
    pub fn with_setter(mut self, setter: impl Fn(&mut O, V) + Send + Sync + 'static) -> Self {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The observed object
    pub fn source(&self) -> &Arc<Observable<O>> {
        &self.source
    }

    /// Whether a setter is attached
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.setter.is_some()
    }

    /// Read the current value from the source
    pub fn get(&self) -> V {
        self.source.read(|o| (self.getter)(o))
    }

    /// Read the value from an already borrowed object
    pub fn sample(&self, object: &O) -> V {
        (self.getter)(object)
    }

    /// Write through the setter, notifying the source's watchers
    pub fn set(&self, value: V) -> Result<(), AutomationError> {
        let setter = self
            .setter
            .as_ref()
            .ok_or_else(|| AutomationError::ReadOnlyProperty(self.name.clone()))?;
        self.source.update(|o| setter(o, value)).map_err(|e| {
            tracing::warn!("Write to '{}' rejected: {}", self.name, e);
            e
        })
    }
}

/// A source of events of type `T`
pub struct EventSource<T> {
    name: String,
    handlers: Arc<Listeners<T>>,
}

impl<T: Send + Sync + 'static> EventSource<T> {
    /// Create a named event source
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: Listeners::new(),
        }
    }

    /// Event source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver `payload` to every handler, returning how many ran
    pub fn raise(&self, payload: &T) -> usize {
        let handlers = self.handlers.snapshot();
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    /// Register a handler
    pub fn subscribe(&self, handler: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        self.handlers.add(Arc::new(handler))
    }

    /// Number of live handlers
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}
