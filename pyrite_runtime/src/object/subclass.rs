//! Weak parent→children subclass index.
//!
//! Every type records its direct subclasses so invalidation and slot updates
//! can propagate downwards. Entries are weak and id-keyed: registering a
//! child never keeps it alive, dead entries are skipped on traversal and
//! compacted lazily on the next full scan.

use crate::object::type_obj::{TypeId, TypeObject};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};

/// Per-type set of direct children.
#[derive(Default)]
pub struct SubclassSet {
    entries: FxHashMap<TypeId, Weak<TypeObject>>,
}

impl SubclassSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a child. Idempotent; never takes a strong reference.
    pub fn insert(&mut self, child: &Arc<TypeObject>) {
        self.entries.insert(child.id(), Arc::downgrade(child));
    }

    /// Remove a child by id.
    pub fn remove(&mut self, id: TypeId) {
        self.entries.remove(&id);
    }

    /// All live children; compacts dead entries in the same pass.
    pub fn live(&mut self) -> Vec<Arc<TypeObject>> {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.entries.values().filter_map(Weak::upgrade).collect()
    }

    /// Number of entries including not-yet-compacted dead ones.
    pub fn raw_len(&self) -> usize {
        self.entries.len()
    }
}

/// Record `child` as a direct subclass of `base`.
pub fn register(base: &Arc<TypeObject>, child: &Arc<TypeObject>) {
    base.subclasses().lock().insert(child);
}

/// Remove `child_id` from `base`'s children.
pub fn unregister(base: &Arc<TypeObject>, child_id: TypeId) {
    base.subclasses().lock().remove(child_id);
}

/// Live direct children of `base`.
pub fn children_of(base: &Arc<TypeObject>) -> Vec<Arc<TypeObject>> {
    base.subclasses().lock().live()
}

/// `base` plus every live transitive subclass, deduplicated. No particular
/// order is guaranteed.
pub fn collect_subtree(base: &Arc<TypeObject>) -> Vec<Arc<TypeObject>> {
    let mut seen = FxHashMap::default();
    let mut queue = vec![base.clone()];
    let mut out = Vec::new();
    while let Some(ty) = queue.pop() {
        if seen.insert(ty.id(), ()).is_some() {
            continue;
        }
        queue.extend(children_of(&ty));
        out.push(ty);
    }
    out
}
