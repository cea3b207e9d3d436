//! Type modification watchers.
//!
//! Up to eight process-wide watcher callbacks. Each type carries a bitmask
//! of the watcher ids observing it; when the type is modified, every
//! registered callback whose bit is set fires once, before the version tag
//! is invalidated. Callback failures are logged and swallowed: a broken
//! observer must not abort a mutation already in progress.

use crate::object::runtime::TypeRuntime;
use crate::object::type_obj::TypeObject;
use parking_lot::Mutex;
use pyrite_core::ObjectError;
use std::sync::Arc;

/// Maximum number of concurrently registered watchers.
pub const MAX_WATCHERS: usize = 8;

/// Handle returned by registration; doubles as the bit position in each
/// type's watched mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(pub(crate) u8);

impl WatcherId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub(crate) fn bit(self) -> u8 {
        1 << self.0
    }
}

/// Callback invoked with the modified type.
pub type WatcherCallback =
    Arc<dyn Fn(&TypeRuntime, &Arc<TypeObject>) -> Result<(), ObjectError> + Send + Sync>;

/// Fixed slot table of registered watchers.
pub struct WatcherSet {
    slots: Mutex<[Option<WatcherCallback>; MAX_WATCHERS]>,
}

impl WatcherSet {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([const { None }; MAX_WATCHERS]),
        }
    }

    /// Claim the lowest free slot. `None` when all eight are taken.
    pub fn register(&self, callback: WatcherCallback) -> Option<WatcherId> {
        let mut slots = self.slots.lock();
        for (i, slot) in slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(callback);
                return Some(WatcherId(i as u8));
            }
        }
        None
    }

    /// Free a slot. Types still carrying the bit simply stop dispatching
    /// to it; the bit is harmless until reused.
    pub fn unregister(&self, id: WatcherId) {
        self.slots.lock()[id.index()] = None;
    }

    /// Fire every watcher whose bit is set on `ty`. Runs under the
    /// mutation lock, before invalidation.
    pub fn dispatch(&self, rt: &TypeRuntime, ty: &Arc<TypeObject>) {
        let bits = ty.watched_bits();
        if bits == 0 {
            return;
        }
        // Clone the callbacks out so re-entrant register/unregister from
        // within a callback cannot deadlock on the slot table.
        let active: Vec<(usize, WatcherCallback)> = {
            let slots = self.slots.lock();
            slots
                .iter()
                .enumerate()
                .filter(|(i, _)| bits & WatcherId(*i as u8).bit() != 0)
                .filter_map(|(i, slot)| slot.clone().map(|cb| (i, cb)))
                .collect()
        };
        for (index, callback) in active {
            if let Err(err) = callback(rt, ty) {
                tracing::warn!(
                    watcher = index,
                    type_name = %ty.name(),
                    error = %err,
                    "type watcher callback failed"
                );
            }
        }
    }
}

impl Default for WatcherSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> WatcherCallback {
        Arc::new(|_, _| Ok(()))
    }

    #[test]
    fn test_register_fills_lowest_slot() {
        let set = WatcherSet::new();
        let a = set.register(noop()).unwrap();
        let b = set.register(noop()).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);

        set.unregister(a);
        let c = set.register(noop()).unwrap();
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn test_register_exhaustion() {
        let set = WatcherSet::new();
        for _ in 0..MAX_WATCHERS {
            assert!(set.register(noop()).is_some());
        }
        assert!(set.register(noop()).is_none());
    }

    #[test]
    fn test_bit_positions() {
        assert_eq!(WatcherId(0).bit(), 0b0000_0001);
        assert_eq!(WatcherId(3).bit(), 0b0000_1000);
        assert_eq!(WatcherId(7).bit(), 0b1000_0000);
    }
}
