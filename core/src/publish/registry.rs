//! Process-wide index of the publishing sinks that currently exist.
//!
//! The broker side enumerates the registry to attach observers to new sinks.
//! Sinks register on construction and leave when their [`Registration`] drops.

use crate::publish::sink::{ResultObserver, SinkDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

static GLOBAL_REGISTRY: OnceLock<SinkRegistry> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    TimeDomain,
    FrequencyDomain,
}

/// Stable identity of one registered sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// Shared part of a sink: its descriptor and the observers attached to it.
pub struct SinkHandle {
    id: SinkId,
    descriptor: SinkDescriptor,
    observers: Mutex<Vec<Arc<dyn ResultObserver>>>,
}

impl SinkHandle {
    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn descriptor(&self) -> &SinkDescriptor {
        &self.descriptor
    }

    /// Appends an observer; delivery follows subscription order.
    pub fn subscribe(&self, observer: Arc<dyn ResultObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Detaches the first subscription of exactly this observer.
    pub fn unsubscribe(&self, observer: &Arc<dyn ResultObserver>) -> bool {
        let mut observers = lock(&self.observers);
        match observers
            .iter()
            .position(|attached| Arc::ptr_eq(attached, observer))
        {
            Some(idx) => {
                observers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self) -> usize {
        lock(&self.observers).len()
    }

    /// Copy of the observer list taken under the lock, after dropping
    /// observers that reported themselves closed.
    pub(crate) fn observers(&self) -> Vec<Arc<dyn ResultObserver>> {
        let mut observers = lock(&self.observers);
        let before = observers.len();
        observers.retain(|observer| !observer.is_closed());
        if observers.len() < before {
            log::debug!(
                "sink {} dropped {} closed observers",
                self.id.value(),
                before - observers.len()
            );
        }
        observers.clone()
    }
}

#[derive(Default)]
struct RegistryState {
    next_id: u64,
    time_domain: Vec<Arc<SinkHandle>>,
    frequency_domain: Vec<Arc<SinkHandle>>,
}

impl RegistryState {
    fn slots(&mut self, kind: SinkKind) -> &mut Vec<Arc<SinkHandle>> {
        match kind {
            SinkKind::TimeDomain => &mut self.time_domain,
            SinkKind::FrequencyDomain => &mut self.frequency_domain,
        }
    }
}

/// Registry of live sinks per kind, in registration order.
///
/// Clones share the same state. All access goes through one mutex; callbacks
/// are never invoked while it is held.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process.
    pub fn global() -> &'static SinkRegistry {
        GLOBAL_REGISTRY.get_or_init(SinkRegistry::new)
    }

    pub fn register(&self, descriptor: SinkDescriptor) -> (Arc<SinkHandle>, Registration) {
        let kind = descriptor.kind;
        let mut state = lock(&self.state);
        let id = SinkId(state.next_id);
        state.next_id += 1;
        let handle = Arc::new(SinkHandle {
            id,
            descriptor,
            observers: Mutex::new(Vec::new()),
        });
        state.slots(kind).push(Arc::clone(&handle));
        log::debug!("registered {:?} sink {}", kind, id.0);

        let registration = Registration {
            registry: self.clone(),
            kind,
            id,
        };
        (handle, registration)
    }

    /// Snapshot of the sinks of one kind.
    pub fn sinks(&self, kind: SinkKind) -> Vec<Arc<SinkHandle>> {
        lock(&self.state).slots(kind).clone()
    }

    pub fn len(&self, kind: SinkKind) -> usize {
        lock(&self.state).slots(kind).len()
    }

    pub fn is_empty(&self, kind: SinkKind) -> bool {
        self.len(kind) == 0
    }

    fn deregister(&self, kind: SinkKind, id: SinkId) {
        let mut state = lock(&self.state);
        let slots = state.slots(kind);
        if let Some(idx) = slots.iter().position(|handle| handle.id == id) {
            slots.remove(idx);
            log::debug!("deregistered {:?} sink {}", kind, id.0);
        }
    }
}

/// Keeps a sink listed in its registry; dropping it removes the entry.
pub struct Registration {
    registry: SinkRegistry,
    kind: SinkKind,
    id: SinkId,
}

impl Registration {
    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn kind(&self) -> SinkKind {
        self.kind
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.kind, self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
