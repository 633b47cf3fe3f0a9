// gpu/instance.rs — Reference-counted, lazily created shared graphics instance.
//
// A graphics instance is expensive to create and is meant to be shared by
// every device in the process. Each session that holds a device also holds
// one reference here. The instance is created on the first `acquire` and
// dropped when the last reference is released, so a later `acquire` builds
// a fresh one.
//
// The count and the instance slot change together under the slot lock,
// which serializes sessions initializing and finalizing on different
// threads. The count itself is atomic so it can be read without locking.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;

/// Shared instance slot plus its reference count.
#[derive(Debug)]
pub struct InstanceRegistry<I> {
    refs: AtomicUsize,
    slot: Mutex<Option<Arc<I>>>,
}

impl<I> Default for InstanceRegistry<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> InstanceRegistry<I> {
    pub fn new() -> Self {
        InstanceRegistry {
            refs: AtomicUsize::new(0),
            slot: Mutex::new(None),
        }
    }

    /// Take one reference, creating the instance with `create` if none is
    /// alive.
    pub fn acquire(&self, create: impl FnOnce() -> I) -> Arc<I> {
        let mut slot = self.slot.lock();
        let instance = Arc::clone(slot.get_or_insert_with(|| {
            debug!("creating shared graphics instance");
            Arc::new(create())
        }));
        let refs = self.refs.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("graphics instance acquired ({refs} live references)");
        instance
    }

    /// Give back one reference. The instance is dropped with the last one.
    pub fn release(&self) {
        let mut slot = self.slot.lock();
        let refs = self.refs.load(Ordering::Acquire);
        if refs == 0 {
            warn!("graphics instance released more times than acquired");
            return;
        }
        self.refs.store(refs - 1, Ordering::Release);
        if refs == 1 {
            *slot = None;
            debug!("last reference released, graphics instance dropped");
        } else {
            debug!("graphics instance released ({} live references)", refs - 1);
        }
    }

    /// Number of outstanding references.
    pub fn ref_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Whether an instance currently exists.
    pub fn is_live(&self) -> bool {
        self.slot.lock().is_some()
    }
}
