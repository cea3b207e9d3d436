//! The process-wide type-mutation lock.
//!
//! All mutation (namespace writes, bases reassignment, freezing, version
//! assignment) serializes on one reentrant lock. Coarse by design: a single
//! lock sidesteps lock-ordering hazards across the subclass graph, and
//! mutation is rare next to lookup. Lookups never take it on the cache fast
//! path.
//!
//! Releasing the lock publishes the new version/state with acquire/release
//! ordering; lookups that start afterwards observe the post-mutation state.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Reentrant process-wide mutation lock.
///
/// Reentrancy matters: slot updates and watcher callbacks run inside the
/// lock and may re-enter mutation or lookup paths on the same thread.
pub struct MutationLock {
    inner: ReentrantMutex<()>,
}

/// Guard proving the mutation lock is held.
pub type MutationGuard<'a> = ReentrantMutexGuard<'a, ()>;

impl MutationLock {
    pub fn new() -> Self {
        Self {
            inner: ReentrantMutex::new(()),
        }
    }

    /// Acquire the lock, blocking until available. Not cancellable: a
    /// mutation runs to completion or fails atomically.
    #[inline]
    pub fn lock(&self) -> MutationGuard<'_> {
        self.inner.lock()
    }
}

impl Default for MutationLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentrant_acquire() {
        let lock = MutationLock::new();
        let _outer = lock.lock();
        let _inner = lock.lock(); // must not deadlock
    }

    #[test]
    fn test_cross_thread_exclusion() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let lock = Arc::new(MutationLock::new());
        let counter = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _g = lock.lock();
                        let v = counter.load(Ordering::Relaxed);
                        counter.store(v + 1, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 400);
    }
}
