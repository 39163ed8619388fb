//! Edge-triggered change notifications.
//!
//! Downstream reconciles depend only on whether a population of objects is empty. This handler
//! wakes its callback only when the (optionally class filtered) population transitions between
//! zero and one, so that N objects of the same kind do not cause N reconciles.

use std::sync::Arc;

use kube::Resource;

use crate::watchers::{EventHandler, Lister, ObjectKey};

/// A predicate reporting whether a candidate object shares the class of a changed object.
pub type ClassFilter<K> = Arc<dyn Fn(&K, &K) -> bool + Send + Sync>;
/// A callback waking the dependent control loop.
pub type WakeFn = Arc<dyn Fn() + Send + Sync>;

/// A change handler which wakes its callback only on population transitions.
pub struct EdgeTriggered<K> {
    lister: Arc<dyn Lister<K>>,
    filter: Option<ClassFilter<K>>,
    wake: WakeFn,
}

impl<K: Resource + Send + Sync + 'static> EdgeTriggered<K> {
    /// Create a new instance.
    pub fn new(lister: Arc<dyn Lister<K>>, filter: Option<ClassFilter<K>>, wake: WakeFn) -> Self {
        Self { lister, filter, wake }
    }

    /// Count the listed objects sharing the class of the given object.
    ///
    /// Returns `None` if listing failed.
    fn count_matching(&self, changed: &K) -> Option<usize> {
        match self.lister.list() {
            Ok(objs) => Some(
                objs.iter()
                    .filter(|candidate| self.filter.as_ref().map(|filter| filter(changed, candidate)).unwrap_or(true))
                    .count(),
            ),
            Err(err) => {
                tracing::warn!(error = ?err, object = %ObjectKey::of(changed), "error listing objects, skipping wake-up");
                None
            }
        }
    }
}

impl<K: Resource + Send + Sync + 'static> EventHandler<K> for EdgeTriggered<K> {
    fn on_add(&self, obj: &K) {
        if !self.lister.has_synced() {
            return;
        }
        if self.count_matching(obj) == Some(1) {
            tracing::debug!(object = %ObjectKey::of(obj), "first matching object added, waking");
            (self.wake)();
        }
    }

    fn on_update(&self, _old: &K, _new: &K) {}

    fn on_delete(&self, obj: &K) {
        if self.count_matching(obj) == Some(0) {
            tracing::debug!(object = %ObjectKey::of(obj), "last matching object deleted, waking");
            (self.wake)();
        }
    }
}
