//! Id-keyed type registry.
//!
//! Maps `TypeId` to live type objects through weak references: the registry
//! never keeps a type alive. Dead entries are skipped on lookup and lazily
//! compacted on full scans.

use crate::object::type_obj::{TypeId, TypeObject};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

/// Registry of all types in one runtime.
pub struct TypeRegistry {
    types: RwLock<FxHashMap<TypeId, Weak<TypeObject>>>,
    next_id: AtomicU32,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: RwLock::new(FxHashMap::default()),
            next_id: AtomicU32::new(TypeId::FIRST_USER_TYPE),
        }
    }

    /// Allocate a fresh id for a user-defined type.
    pub fn allocate_id(&self) -> TypeId {
        TypeId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a type under its id. Idempotent.
    pub fn insert(&self, ty: &Arc<TypeObject>) {
        self.types.write().insert(ty.id(), Arc::downgrade(ty));
    }

    /// Remove a registration (rollback or teardown).
    pub fn remove(&self, id: TypeId) {
        self.types.write().remove(&id);
    }

    /// Resolve an id to a live type.
    #[inline]
    pub fn get(&self, id: TypeId) -> Option<Arc<TypeObject>> {
        self.types.read().get(&id).and_then(Weak::upgrade)
    }

    /// Number of live registrations; compacts dead entries as a side effect.
    pub fn len(&self) -> usize {
        let mut types = self.types.write();
        types.retain(|_, weak| weak.strong_count() > 0);
        types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All live types; compacts dead entries as a side effect.
    pub fn live_types(&self) -> Vec<Arc<TypeObject>> {
        let mut types = self.types.write();
        types.retain(|_, weak| weak.strong_count() > 0);
        types.values().filter_map(Weak::upgrade).collect()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
