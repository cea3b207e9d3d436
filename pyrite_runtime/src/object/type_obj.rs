//! The type object: name, bases, MRO, namespace, version tag, flags,
//! instance layout, and the per-protocol dispatch slot table.
//!
//! # Architecture
//!
//! ```text
//! TypeObject
//! ├── name: InternedString
//! ├── id: TypeId (dense, builtins < 256)
//! ├── bases: SmallVec<Arc<TypeObject>; 2>   (strong, declaration order)
//! ├── mro: Arc<Mro>                         (strong, self first)
//! ├── dict: Namespace                       (name → descriptor)
//! ├── slots: TypeSlots                      (per-protocol dispatch table)
//! ├── version: AtomicU32                    (0 = unassigned cache epoch)
//! ├── subclasses: SubclassSet               (weak, id-keyed)
//! └── layout: Layout                        (basic/item size, dict/weak offsets)
//! ```
//!
//! The MRO intentionally holds strong references, including to the type
//! itself — the classic "a class appears in its own MRO" cycle. The cycle is
//! reported to the collector through [`TypeObject::traverse`] and broken by
//! [`TypeObject::clear`].

use crate::object::slots::{SlotId, SlotState, TypeSlots};
use crate::object::subclass::SubclassSet;
use crate::object::value::Value;
use parking_lot::{Mutex, RwLock};
use pyrite_core::InternedString;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

// =============================================================================
// Type Identity
// =============================================================================

/// Dense type identifier. Builtin types occupy ids below
/// [`TypeId::FIRST_USER_TYPE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub const OBJECT: TypeId = TypeId(1);
    pub const TYPE: TypeId = TypeId(2);
    pub const NONE: TypeId = TypeId(3);
    pub const BOOL: TypeId = TypeId(4);
    pub const INT: TypeId = TypeId(5);
    pub const FLOAT: TypeId = TypeId(6);
    pub const STR: TypeId = TypeId(7);
    pub const FUNCTION: TypeId = TypeId(8);
    pub const TUPLE: TypeId = TypeId(9);

    /// First id handed out to user-defined types.
    pub const FIRST_USER_TYPE: u32 = 256;

    /// Construct from a raw id.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        TypeId(raw)
    }

    /// The raw id.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for builtin (statically bootstrapped) types.
    #[inline]
    pub const fn is_builtin(self) -> bool {
        self.0 < Self::FIRST_USER_TYPE
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags::bitflags! {
    /// Type capability and state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Fully built and published.
        const READY = 1 << 0;
        /// Created at run time (as opposed to bootstrapped).
        const HEAPTYPE = 1 << 1;
        /// May be used as a base class.
        const BASETYPE = 1 << 2;
        /// Frozen: namespace and bases may not change.
        const IMMUTABLE = 1 << 3;
        /// Instances participate in cycle collection.
        const HAVE_GC = 1 << 4;
        /// Instances carry a managed attribute dictionary.
        const MANAGED_DICT = 1 << 5;
        /// Instances carry managed weak-reference storage.
        const MANAGED_WEAKREF = 1 << 6;
    }
}

impl TypeFlags {
    /// Flags a freshly built type inherits from its dominant base.
    pub const INHERITED: TypeFlags = TypeFlags::HAVE_GC
        .union(TypeFlags::MANAGED_DICT)
        .union(TypeFlags::MANAGED_WEAKREF);
}

// =============================================================================
// Instance Layout
// =============================================================================

/// Observable instance-layout description.
///
/// No native struct geometry is implied; the four numbers exist so layout
/// compatibility (solid bases, reclassing, rebasing) is decidable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    /// Fixed portion of an instance, in bytes.
    pub basic_size: u32,
    /// Per-item size for variable-length instances (0 = fixed length).
    pub item_size: u32,
    /// Offset of the managed dictionary (0 = none).
    pub dict_offset: u32,
    /// Offset of the weak-reference storage (0 = none).
    pub weaklist_offset: u32,
}

impl Layout {
    /// Layout of the root object type.
    pub const OBJECT: Layout = Layout {
        basic_size: 16,
        item_size: 0,
        dict_offset: 0,
        weaklist_offset: 0,
    };
}

// =============================================================================
// Storage Aliases
// =============================================================================

/// Direct bases in declaration order. Most types have one or two.
pub type Bases = SmallVec<[Arc<TypeObject>; 2]>;

/// Method resolution order: self first, every direct base present.
pub type Mro = SmallVec<[Arc<TypeObject>; 8]>;

// =============================================================================
// Namespace
// =============================================================================

/// The type's attribute namespace (methods, class variables, descriptors).
#[derive(Default)]
pub struct Namespace {
    attrs: RwLock<FxHashMap<InternedString, Value>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, name: &InternedString) -> Option<Value> {
        self.attrs.read().get(name).cloned()
    }

    #[inline]
    pub fn set(&self, name: InternedString, value: Value) {
        self.attrs.write().insert(name, value);
    }

    /// Insert only if absent; returns true when the insert happened.
    pub fn set_if_absent(&self, name: InternedString, value: Value) -> bool {
        let mut attrs = self.attrs.write();
        if attrs.contains_key(&name) {
            return false;
        }
        attrs.insert(name, value);
        true
    }

    #[inline]
    pub fn remove(&self, name: &InternedString) -> Option<Value> {
        self.attrs.write().remove(name)
    }

    #[inline]
    pub fn contains(&self, name: &InternedString) -> bool {
        self.attrs.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.attrs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.read().is_empty()
    }

    /// Copy the namespace out. Used wherever callbacks run while iterating,
    /// so no lock is held across managed code.
    pub fn snapshot(&self) -> Vec<(InternedString, Value)> {
        self.attrs
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&self) {
        self.attrs.write().clear();
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({} entries)", self.len())
    }
}

// =============================================================================
// Type Object
// =============================================================================

/// Outgoing edge reported to the collector by [`TypeObject::traverse`].
#[derive(Debug, Clone)]
pub enum Edge {
    Type(Arc<TypeObject>),
    Value(Value),
}

/// A type: the unit of dispatch, inheritance, and attribute lookup.
pub struct TypeObject {
    name: InternedString,
    id: TypeId,
    metaclass: TypeId,
    layout: Layout,
    flags: AtomicU32,
    /// Dominant ("best") base: the layout-determining ancestor chain.
    base: RwLock<Option<Arc<TypeObject>>>,
    bases: RwLock<Bases>,
    /// The MRO is swapped wholesale; `Arc` identity doubles as the
    /// preemption check for reentrant recomputation.
    mro: RwLock<Arc<Mro>>,
    dict: Namespace,
    slots: RwLock<TypeSlots>,
    /// Current cache epoch; 0 means unassigned.
    version: AtomicU32,
    /// Distinct versions consumed so far; caps cache churn per type.
    versions_used: AtomicU32,
    subclasses: Mutex<SubclassSet>,
    /// Bitset of watchers interested in this type.
    watched: AtomicU8,
    /// Declared extra instance slots, if any.
    extra_slot_names: Option<Vec<InternedString>>,
}

impl TypeObject {
    /// Construct a raw, unlinked type object. Callers (bootstrap and the
    /// builder) are responsible for MRO installation and registration.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: InternedString,
        id: TypeId,
        metaclass: TypeId,
        layout: Layout,
        flags: TypeFlags,
        base: Option<Arc<TypeObject>>,
        bases: Bases,
        extra_slot_names: Option<Vec<InternedString>>,
    ) -> Self {
        Self {
            name,
            id,
            metaclass,
            layout,
            flags: AtomicU32::new(flags.bits()),
            base: RwLock::new(base),
            bases: RwLock::new(bases),
            mro: RwLock::new(Arc::new(Mro::new())),
            dict: Namespace::new(),
            slots: RwLock::new(TypeSlots::new()),
            version: AtomicU32::new(0),
            versions_used: AtomicU32::new(0),
            subclasses: Mutex::new(SubclassSet::new()),
            watched: AtomicU8::new(0),
            extra_slot_names,
        }
    }

    // =========================================================================
    // Identity and flags
    // =========================================================================

    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn metaclass(&self) -> TypeId {
        self.metaclass
    }

    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    pub fn flags(&self) -> TypeFlags {
        TypeFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn add_flags(&self, flags: TypeFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn is_immutable(&self) -> bool {
        self.flags().contains(TypeFlags::IMMUTABLE)
    }

    #[inline]
    pub fn is_basetype(&self) -> bool {
        self.flags().contains(TypeFlags::BASETYPE)
    }

    #[inline]
    pub fn is_heaptype(&self) -> bool {
        self.flags().contains(TypeFlags::HEAPTYPE)
    }

    /// Declared extra instance slots.
    pub fn extra_slot_names(&self) -> Option<&[InternedString]> {
        self.extra_slot_names.as_deref()
    }

    // =========================================================================
    // Version tag
    // =========================================================================

    /// Current cache epoch (0 = unassigned).
    #[inline]
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn set_version(&self, version: u32) {
        self.version.store(version, Ordering::Release);
    }

    #[inline]
    pub fn versions_used(&self) -> u32 {
        self.versions_used.load(Ordering::Relaxed)
    }

    pub(crate) fn bump_versions_used(&self) {
        self.versions_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Permanently disable attribute caching for this type (custom MRO).
    pub(crate) fn disable_attribute_cache(&self) {
        self.versions_used
            .store(crate::object::cache::ATTR_CACHE_UNUSED, Ordering::Relaxed);
    }

    // =========================================================================
    // Bases and MRO
    // =========================================================================

    /// The dominant (layout-determining) base, if any.
    #[inline]
    pub fn base(&self) -> Option<Arc<TypeObject>> {
        self.base.read().clone()
    }

    pub(crate) fn set_base(&self, base: Option<Arc<TypeObject>>) {
        *self.base.write() = base;
    }

    /// Direct bases in declaration order.
    pub fn bases(&self) -> Bases {
        self.bases.read().clone()
    }

    pub(crate) fn set_bases(&self, bases: Bases) {
        *self.bases.write() = bases;
    }

    /// The current MRO. Shared; identity changes on every recomputation.
    #[inline]
    pub fn mro(&self) -> Arc<Mro> {
        pyrite_core::obj::retain(&*self.mro.read())
    }

    pub(crate) fn set_mro(&self, mro: Arc<Mro>) {
        *self.mro.write() = mro;
    }

    /// True if `self` is `other` or a subtype of it.
    pub fn is_subtype_of(&self, other: &TypeObject) -> bool {
        if self.id == other.id {
            return true;
        }
        self.mro().iter().any(|t| t.id() == other.id())
    }

    // =========================================================================
    // Namespace and slots
    // =========================================================================

    #[inline]
    pub fn dict(&self) -> &Namespace {
        &self.dict
    }

    /// Read one dispatch slot.
    #[inline]
    pub fn slot(&self, slot: SlotId) -> SlotState {
        self.slots.read().get(slot)
    }

    pub(crate) fn set_slot(&self, slot: SlotId, state: SlotState) {
        self.slots.write().set(slot, state);
    }

    /// Snapshot the whole slot table.
    pub fn slots_snapshot(&self) -> TypeSlots {
        self.slots.read().clone()
    }

    // =========================================================================
    // Subclasses and watchers
    // =========================================================================

    pub(crate) fn subclasses(&self) -> &Mutex<SubclassSet> {
        &self.subclasses
    }

    #[inline]
    pub(crate) fn watched_bits(&self) -> u8 {
        self.watched.load(Ordering::Relaxed)
    }

    pub(crate) fn set_watched_bit(&self, bit: u8) {
        self.watched.fetch_or(1 << bit, Ordering::Relaxed);
    }

    pub(crate) fn clear_watched_bit(&self, bit: u8) {
        self.watched.fetch_and(!(1 << bit), Ordering::Relaxed);
    }

    // =========================================================================
    // Collector hooks
    // =========================================================================

    /// Report every strong outgoing edge: bases, the cached MRO (including
    /// the self edge), and namespace values.
    pub fn traverse(&self, visit: &mut dyn FnMut(Edge)) {
        for base in self.bases.read().iter() {
            visit(Edge::Type(base.clone()));
        }
        for member in self.mro.read().iter() {
            visit(Edge::Type(member.clone()));
        }
        for (_, value) in self.dict.snapshot() {
            visit(Edge::Value(value));
        }
        if let Some(base) = self.base.read().clone() {
            visit(Edge::Type(base));
        }
    }

    /// Drop every strong edge so the collector can break cycles. The type
    /// becomes unusable afterwards; only doomed types are cleared.
    pub fn clear(&self) {
        self.dict.clear();
        *self.bases.write() = Bases::new();
        *self.mro.write() = Arc::new(Mro::new());
        *self.base.write() = None;
        *self.slots.write() = TypeSlots::new();
    }
}

impl fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeObject")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("version", &self.version())
            .field("flags", &self.flags())
            .finish()
    }
}

// =============================================================================
// Solid Bases
// =============================================================================

/// True if `ty` extends `base`'s instance storage beyond a managed dict
/// and/or weak-reference slot.
fn extra_ivars(ty: &TypeObject, base: &TypeObject) -> bool {
    let t = ty.layout();
    let b = base.layout();
    let mut expected = b.basic_size;
    if t.dict_offset != 0 && b.dict_offset == 0 {
        expected += 8;
    }
    if t.weaklist_offset != 0 && b.weaklist_offset == 0 {
        expected += 8;
    }
    t.basic_size != expected || t.item_size != b.item_size
}

/// The most-derived ancestor of `ty` with an extended fixed layout.
///
/// Two types can coexist as bases only if their solid bases are related by
/// subtyping; two instances can swap classes only if their solid bases have
/// identical layouts.
pub fn solid_base(ty: &Arc<TypeObject>) -> Arc<TypeObject> {
    match ty.base() {
        None => ty.clone(),
        Some(base) => {
            let solid = solid_base(&base);
            if extra_ivars(ty, &solid) {
                ty.clone()
            } else {
                solid
            }
        }
    }
}
