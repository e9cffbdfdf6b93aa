// src/core/cache/observer.rs

//! Weak-handle observer registry for variant-write notifications.

use crate::core::types::OperationList;
use parking_lot::Mutex;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use tracing::warn;

/// Receives a callback after a variant has been fully written and committed.
/// Implementations must not block: the callback runs on the writer's task.
pub trait CacheObserver: Send + Sync {
    fn on_variant_written(&self, ops: &OperationList);
}

/// Holds observers by weak reference, so callers never need to deregister:
/// dropping the observer's `Arc` is enough. Dead handles are pruned on each
/// notification pass.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<Weak<dyn CacheObserver>>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: &Arc<dyn CacheObserver>) {
        self.observers.lock().push(Arc::downgrade(observer));
    }

    /// Notifies every live observer that `ops` was committed. A snapshot of
    /// the registry is taken first; callbacks run outside the registry lock,
    /// and a panicking observer does not abort the enclosing close.
    pub fn notify_variant_written(&self, ops: &OperationList) {
        let snapshot: Vec<Arc<dyn CacheObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|w| w.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in snapshot {
            if catch_unwind(AssertUnwindSafe(|| observer.on_variant_written(ops))).is_err() {
                warn!("A cache observer panicked while handling a variant write");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
