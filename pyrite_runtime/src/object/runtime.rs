//! The runtime context: registry, attribute cache, mutation lock, version
//! allocator, watchers, and the bootstrapped builtin types.
//!
//! Everything is reachable through an explicit [`TypeRuntime`] handle; there
//! is no process-global runtime state. Two runtimes in one process never
//! share types, versions, or cache entries.
//!
//! # Lookup
//!
//! [`TypeRuntime::lookup`] is the central attribute resolution path:
//!
//! ```text
//! probe(version, name) ── hit ──► value (or definitive absence)
//!        │ miss
//!        ▼
//! mutation lock ─► walk MRO ─► assign version tag ─► fill cache
//! ```
//!
//! Misses are cached too: a lookup that walks the whole MRO and finds
//! nothing records that absence under the current version tag.

use crate::object::builder::{self, TypeSpec};
use crate::object::cache::{AttributeCache, CacheStats, MAX_VERSIONS_PER_CLASS};
use crate::object::mutation::MutationLock;
use crate::object::registry::TypeRegistry;
use crate::object::slots::{self, SlotId};
use crate::object::subclass;
use crate::object::type_obj::{
    solid_base, Bases, Layout, TypeFlags, TypeId, TypeObject,
};
use crate::object::value::{NativeFn, Value};
use crate::object::mro;
use crate::object::watch::{WatcherCallback, WatcherId, WatcherSet};
use pyrite_core::{intern, InternedString, ObjectError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Builtins
// =============================================================================

/// Strong handles to the bootstrapped builtin types.
pub struct Builtins {
    pub object_: Arc<TypeObject>,
    pub type_: Arc<TypeObject>,
    pub none_: Arc<TypeObject>,
    pub bool_: Arc<TypeObject>,
    pub int_: Arc<TypeObject>,
    pub float_: Arc<TypeObject>,
    pub str_: Arc<TypeObject>,
    pub tuple_: Arc<TypeObject>,
    pub function_: Arc<TypeObject>,
}

impl Builtins {
    fn all(&self) -> [&Arc<TypeObject>; 9] {
        [
            &self.object_,
            &self.type_,
            &self.none_,
            &self.int_,
            &self.bool_,
            &self.float_,
            &self.str_,
            &self.tuple_,
            &self.function_,
        ]
    }
}

// =============================================================================
// Runtime
// =============================================================================

/// One isolated type-system instance.
pub struct TypeRuntime {
    registry: TypeRegistry,
    cache: AttributeCache,
    mutation: MutationLock,
    /// Global version allocator; 0 is reserved for "unassigned".
    next_version: AtomicU32,
    watchers: WatcherSet,
    builtins: Builtins,
}

impl TypeRuntime {
    /// Create a runtime with the builtin hierarchy bootstrapped and ready.
    pub fn new() -> Self {
        let registry = TypeRegistry::new();

        let base_flags = TypeFlags::READY | TypeFlags::IMMUTABLE;
        let object_ = boot_type(
            "object",
            TypeId::OBJECT,
            Layout::OBJECT,
            base_flags | TypeFlags::BASETYPE,
            &[],
        );
        let type_ = boot_type(
            "type",
            TypeId::TYPE,
            Layout {
                basic_size: 80,
                ..Layout::OBJECT
            },
            base_flags | TypeFlags::BASETYPE,
            &[&object_],
        );
        let none_ = boot_type("NoneType", TypeId::NONE, Layout::OBJECT, base_flags, &[&object_]);
        let int_ = boot_type(
            "int",
            TypeId::INT,
            Layout {
                basic_size: 32,
                ..Layout::OBJECT
            },
            base_flags | TypeFlags::BASETYPE,
            &[&object_],
        );
        let bool_ = boot_type(
            "bool",
            TypeId::BOOL,
            Layout {
                basic_size: 32,
                ..Layout::OBJECT
            },
            base_flags,
            &[&int_],
        );
        let float_ = boot_type(
            "float",
            TypeId::FLOAT,
            Layout {
                basic_size: 24,
                ..Layout::OBJECT
            },
            base_flags | TypeFlags::BASETYPE,
            &[&object_],
        );
        let str_ = boot_type(
            "str",
            TypeId::STR,
            Layout {
                basic_size: 24,
                item_size: 1,
                ..Layout::OBJECT
            },
            base_flags | TypeFlags::BASETYPE,
            &[&object_],
        );
        let tuple_ = boot_type(
            "tuple",
            TypeId::TUPLE,
            Layout {
                basic_size: 24,
                item_size: 8,
                ..Layout::OBJECT
            },
            base_flags | TypeFlags::BASETYPE,
            &[&object_],
        );
        let function_ = boot_type(
            "function",
            TypeId::FUNCTION,
            Layout {
                basic_size: 56,
                ..Layout::OBJECT
            },
            base_flags,
            &[&object_],
        );

        let builtins = Builtins {
            object_,
            type_,
            none_,
            bool_,
            int_,
            float_,
            str_,
            tuple_,
            function_,
        };
        for ty in builtins.all() {
            registry.insert(ty);
            for base in ty.bases().iter() {
                subclass::register(base, ty);
            }
        }

        let rt = Self {
            registry,
            cache: AttributeCache::new(),
            mutation: MutationLock::new(),
            next_version: AtomicU32::new(1),
            watchers: WatcherSet::new(),
            builtins,
        };
        rt.install_builtin_slots();
        tracing::debug!(types = rt.registry.len(), "runtime bootstrapped");
        rt
    }

    /// Install native protocol implementations on the builtins, publish
    /// them as namespace wrappers, then resolve the full tables. Parents
    /// are processed before children so inherited resolution sees final
    /// ancestor namespaces.
    fn install_builtin_slots(&self) {
        use NativeFn::*;
        use SlotId::*;

        let b = &self.builtins;

        let object_slots: &[(SlotId, NativeFn)] = &[
            (Repr, Unary(slots::object_repr)),
            (Str, Unary(slots::object_str)),
            (SlotId::Hash, NativeFn::Hash(slots::object_hash)),
            (GetAttro, GetAttr(slots::object_getattro)),
            (SetAttro, SetAttr(slots::object_setattro)),
            (RichCompare, RichCmp(slots::object_richcompare)),
            (SlotId::Init, NativeFn::Init(slots::object_init)),
            (SlotId::New, NativeFn::New(slots::object_new)),
        ];
        let type_slots: &[(SlotId, NativeFn)] = &[
            (SlotId::Call, NativeFn::Call(slots::type_call)),
            (Repr, Unary(slots::type_repr)),
            (GetAttro, GetAttr(slots::type_getattro)),
            (SetAttro, SetAttr(slots::type_setattro)),
        ];
        let none_slots: &[(SlotId, NativeFn)] = &[
            (Repr, Unary(slots::none_repr)),
            (NbBool, Inquiry(slots::none_bool)),
        ];
        let int_slots: &[(SlotId, NativeFn)] = &[
            (NbAdd, Binary(slots::int_add)),
            (NbSubtract, Binary(slots::int_sub)),
            (NbMultiply, Binary(slots::int_mul)),
            (NbNegative, Unary(slots::int_neg)),
            (NbBool, Inquiry(slots::int_bool)),
            (Repr, Unary(slots::int_repr)),
            (SlotId::Hash, NativeFn::Hash(slots::int_hash)),
            (RichCompare, RichCmp(slots::int_richcompare)),
        ];
        let float_slots: &[(SlotId, NativeFn)] = &[
            (NbAdd, Binary(slots::float_add)),
            (NbSubtract, Binary(slots::float_sub)),
            (NbMultiply, Binary(slots::float_mul)),
            (NbNegative, Unary(slots::float_neg)),
            (NbBool, Inquiry(slots::float_bool)),
            (Repr, Unary(slots::float_repr)),
            (SlotId::Hash, NativeFn::Hash(slots::float_hash)),
            (RichCompare, RichCmp(slots::float_richcompare)),
        ];
        let str_slots: &[(SlotId, NativeFn)] = &[
            (NbAdd, Binary(slots::str_concat)),
            (SqLength, Len(slots::str_len)),
            // No dunder spelling; reachable only through the slot.
            (SqConcat, Binary(slots::str_concat)),
            (Repr, Unary(slots::str_repr)),
            (Str, Unary(slots::str_str)),
            (NbBool, Inquiry(slots::str_bool)),
            (SlotId::Hash, NativeFn::Hash(slots::str_hash)),
            (RichCompare, RichCmp(slots::str_richcompare)),
        ];
        let tuple_slots: &[(SlotId, NativeFn)] = &[
            (SqLength, Len(slots::tuple_len)),
            (SqItem, Binary(slots::tuple_item)),
            (NbBool, Inquiry(slots::tuple_bool)),
            (Repr, Unary(slots::tuple_repr)),
        ];
        let function_slots: &[(SlotId, NativeFn)] = &[
            (SlotId::Call, NativeFn::Call(slots::function_call)),
            (Repr, Unary(slots::function_repr)),
        ];

        let order: [(&Arc<TypeObject>, &[(SlotId, NativeFn)]); 9] = [
            (&b.object_, object_slots),
            (&b.type_, type_slots),
            (&b.none_, none_slots),
            (&b.int_, int_slots),
            (&b.bool_, &[]),
            (&b.float_, float_slots),
            (&b.str_, str_slots),
            (&b.tuple_, tuple_slots),
            (&b.function_, function_slots),
        ];
        for (ty, natives) in order {
            for (slot, func) in natives {
                ty.set_slot(*slot, crate::object::slots::SlotState::Native(*func));
            }
            slots::synthesize_wrappers(self, ty);
            slots::update_all_slots(self, ty);
            slots::inherit_special_slots(ty);
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    #[inline]
    pub(crate) fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    #[inline]
    pub(crate) fn mutation(&self) -> &MutationLock {
        &self.mutation
    }

    /// Resolve a type id to a live type.
    #[inline]
    pub fn get_type(&self, id: TypeId) -> Option<Arc<TypeObject>> {
        self.registry.get(id)
    }

    /// Attribute cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// The type of a value.
    pub fn type_of(&self, v: &Value) -> Arc<TypeObject> {
        let b = &self.builtins;
        match v {
            Value::None => b.none_.clone(),
            Value::Bool(_) => b.bool_.clone(),
            Value::Int(_) => b.int_.clone(),
            Value::Float(_) => b.float_.clone(),
            Value::Str(_) => b.str_.clone(),
            Value::Tuple(_) => b.tuple_.clone(),
            Value::Type(_) => b.type_.clone(),
            Value::Instance(inst) => inst.class(),
            Value::Function(_)
            | Value::Method(_)
            | Value::SlotWrapper(_)
            | Value::Bound(_) => b.function_.clone(),
            Value::Member(_) | Value::Property(_) => b.object_.clone(),
        }
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Uncached MRO walk: the first namespace entry for `name` in MRO
    /// order. Falls back to the type's own dict while its MRO is still
    /// being built.
    pub fn find_in_mro(&self, ty: &Arc<TypeObject>, name: &InternedString) -> Option<Value> {
        let mro = ty.mro();
        if mro.is_empty() {
            return ty.dict().get(name);
        }
        mro.iter().find_map(|member| member.dict().get(name))
    }

    /// Cached attribute resolution over the MRO.
    ///
    /// `None` is a definitive answer (and is itself cached): the attribute
    /// exists nowhere in the hierarchy.
    pub fn lookup(&self, ty: &Arc<TypeObject>, name: &InternedString) -> Option<Value> {
        let version = ty.version();
        if version != 0 {
            if let Some(cached) = self.cache.probe(version, name) {
                return cached;
            }
        }

        let _guard = self.mutation.lock();
        let result = self.find_in_mro(ty, name);
        if self.assign_version_tag(ty) {
            self.cache.store(ty.version(), name, result.clone());
        }
        result
    }

    /// Give `ty` a fresh version tag if it lacks one. Ancestors are tagged
    /// first so a tagged type always sits on a fully tagged MRO. Returns
    /// false when the type is (or has become) uncacheable.
    ///
    /// Caller holds the mutation lock.
    fn assign_version_tag(&self, ty: &Arc<TypeObject>) -> bool {
        if ty.version() != 0 {
            return true;
        }
        // Covers both an exhausted budget and the opt-out sentinel.
        if ty.versions_used() >= MAX_VERSIONS_PER_CLASS {
            return false;
        }
        for ancestor in ty.mro().iter().skip(1) {
            if !self.assign_version_tag(ancestor) {
                return false;
            }
        }
        let version = self.next_version.fetch_add(1, Ordering::Relaxed);
        if version == u32::MAX {
            // Allocator exhausted for the life of the process; pin it.
            self.next_version.store(u32::MAX, Ordering::Relaxed);
            return false;
        }
        ty.bump_versions_used();
        ty.set_version(version);
        true
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Invalidate `ty` and its entire subclass subtree after a change that
    /// can affect lookup results. Watchers observing `ty` fire first (for
    /// the directly modified type only), then every subtree member loses
    /// its version tag and its cache entries.
    pub fn mark_modified(&self, ty: &Arc<TypeObject>) {
        let _guard = self.mutation.lock();
        self.mark_modified_locked(ty);
    }

    pub(crate) fn mark_modified_locked(&self, ty: &Arc<TypeObject>) {
        if ty.version() == 0 {
            // Already invalid, and so is the whole subtree below it.
            return;
        }
        self.watchers.dispatch(self, ty);
        self.invalidate_subtree(ty);
    }

    fn invalidate_subtree(&self, ty: &Arc<TypeObject>) {
        let version = ty.version();
        if version == 0 {
            return;
        }
        for child in subclass::children_of(ty) {
            self.invalidate_subtree(&child);
        }
        self.cache.clear_version(version);
        ty.set_version(0);
    }

    // =========================================================================
    // Type namespace mutation
    // =========================================================================

    /// Set a type attribute: namespace write, invalidation, slot update.
    pub fn set_type_attr(
        &self,
        ty: &Arc<TypeObject>,
        name: &InternedString,
        value: Value,
    ) -> Result<(), ObjectError> {
        if ty.is_immutable() {
            return Err(ObjectError::ImmutableType(ty.name().to_string()));
        }
        let _guard = self.mutation.lock();
        ty.dict().set(name.clone(), value);
        self.mark_modified_locked(ty);
        slots::update_slot(self, ty, name);
        tracing::trace!(type_name = %ty.name(), attr = %name, "type attribute set");
        Ok(())
    }

    /// Delete a type attribute.
    pub fn del_type_attr(
        &self,
        ty: &Arc<TypeObject>,
        name: &InternedString,
    ) -> Result<(), ObjectError> {
        if ty.is_immutable() {
            return Err(ObjectError::ImmutableType(ty.name().to_string()));
        }
        let _guard = self.mutation.lock();
        ty.dict()
            .remove(name)
            .ok_or_else(|| ObjectError::AttributeNotFound {
                type_name: ty.name().to_string(),
                attribute: name.to_string(),
            })?;
        self.mark_modified_locked(ty);
        slots::update_slot(self, ty, name);
        Ok(())
    }

    /// Make a type permanently immutable. One-way.
    pub fn freeze(&self, ty: &Arc<TypeObject>) {
        let _guard = self.mutation.lock();
        ty.add_flags(TypeFlags::IMMUTABLE);
        tracing::debug!(type_name = %ty.name(), "type frozen");
    }

    // =========================================================================
    // Building and rebasing
    // =========================================================================

    /// Build a new type from a spec. See [`crate::object::builder`].
    pub fn build(&self, spec: TypeSpec) -> Result<Arc<TypeObject>, ObjectError> {
        builder::build_type(self, spec)
    }

    /// Reassign a live type's bases, transactionally.
    pub fn set_bases(
        &self,
        ty: &Arc<TypeObject>,
        new_bases: Vec<Arc<TypeObject>>,
    ) -> Result<(), ObjectError> {
        builder::rebase(self, ty, new_bases)
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn get_mro(&self, ty: &Arc<TypeObject>) -> Vec<Arc<TypeObject>> {
        ty.mro().iter().cloned().collect()
    }

    pub fn get_bases(&self, ty: &Arc<TypeObject>) -> Vec<Arc<TypeObject>> {
        ty.bases().to_vec()
    }

    pub fn dict_snapshot(&self, ty: &Arc<TypeObject>) -> Vec<(InternedString, Value)> {
        ty.dict().snapshot()
    }

    pub fn version_of(&self, ty: &Arc<TypeObject>) -> u32 {
        ty.version()
    }

    /// Move an instance to a new class. Both classes must be heap types
    /// whose solid bases have identical instance layouts.
    pub fn reclass_instance(
        &self,
        obj: &Value,
        new_class: &Arc<TypeObject>,
    ) -> Result<(), ObjectError> {
        let inst = match obj {
            Value::Instance(inst) => inst,
            _ => {
                return Err(ObjectError::UnsupportedOperation {
                    operation: "__class__ assignment".into(),
                    type_name: self.type_of(obj).name().to_string(),
                })
            }
        };
        let old_class = inst.class();
        if !old_class.is_heaptype() || !new_class.is_heaptype() {
            return Err(ObjectError::UnsupportedOperation {
                operation: "__class__ assignment".into(),
                type_name: old_class.name().to_string(),
            });
        }
        let old_solid = solid_base(&old_class);
        let new_solid = solid_base(new_class);
        if old_solid.layout() != new_solid.layout() {
            return Err(ObjectError::hierarchy(
                "instance layout differs",
                vec![old_class.name().to_string(), new_class.name().to_string()],
            ));
        }
        inst.set_class(new_class.clone());
        Ok(())
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    /// Register a watcher callback; at most eight may be live at once.
    pub fn register_watcher(&self, callback: WatcherCallback) -> Option<WatcherId> {
        self.watchers.register(callback)
    }

    pub fn unregister_watcher(&self, id: WatcherId) {
        self.watchers.unregister(id);
    }

    /// Mark `ty` as observed by watcher `id`.
    pub fn watch_type(&self, id: WatcherId, ty: &Arc<TypeObject>) {
        ty.set_watched_bit(id.index() as u8);
    }

    pub fn unwatch_type(&self, id: WatcherId, ty: &Arc<TypeObject>) {
        ty.clear_watched_bit(id.index() as u8);
    }

    /// Permanently opt `ty` out of attribute caching.
    pub fn disable_cache_for(&self, ty: &Arc<TypeObject>) {
        let _guard = self.mutation.lock();
        self.mark_modified_locked(ty);
        ty.disable_attribute_cache();
    }
}

impl Default for TypeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Construct one builtin: type object, MRO, strong base links.
fn boot_type(
    name: &str,
    id: TypeId,
    layout: Layout,
    flags: TypeFlags,
    bases: &[&Arc<TypeObject>],
) -> Arc<TypeObject> {
    let base_vec: Bases = bases.iter().map(|b| Arc::clone(b)).collect();
    let ty = Arc::new(TypeObject::new(
        intern(name),
        id,
        TypeId::TYPE,
        layout,
        flags,
        bases.first().map(|b| Arc::clone(b)),
        base_vec,
        None,
    ));
    // Builtins form a tree; the C3 merge cannot fail here.
    if let Ok(mro) = mro::compute_mro(&ty) {
        ty.set_mro(Arc::new(mro));
    }
    ty
}
