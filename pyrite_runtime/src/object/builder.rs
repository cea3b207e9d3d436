//! Type construction and bases reassignment.
//!
//! `build_type` runs the full pipeline: base resolution and validation,
//! metaclass selection, dominant-base and layout computation, namespace
//! population, MRO installation, slot synthesis, hierarchy registration,
//! and the user hooks (name binding, subclass initialization). The pipeline
//! is transactional: any failure after the type becomes visible unwinds the
//! registration and the subclass links, and the half-built type is dropped.
//!
//! `rebase` reassigns a live type's bases. Every type in the affected
//! subtree has its MRO recomputed; if any recomputation fails, all of them
//! are restored from a snapshot and the hierarchy is left exactly as it
//! was.

use crate::object::mro;
use crate::object::runtime::TypeRuntime;
use crate::object::slots;
use crate::object::subclass;
use crate::object::type_obj::{
    solid_base, Bases, Layout, Mro, TypeFlags, TypeId, TypeObject,
};
use crate::object::value::{
    ManagedFn, MemberDescr, MethodDescr, NativeMethod, PropertyDescr, Value,
};
use pyrite_core::{intern, InternedString, ObjectError};
use rustc_hash::FxHashSet;
use std::sync::Arc;

// =============================================================================
// Specs
// =============================================================================

/// A native method to install on the new type.
pub struct MethodDef {
    pub name: InternedString,
    pub func: NativeMethod,
}

impl MethodDef {
    pub fn new(name: &str, func: NativeMethod) -> Self {
        Self {
            name: intern(name),
            func,
        }
    }
}

/// A declared fixed instance attribute. Declaring members suppresses the
/// managed instance dictionary unless a base already provides one.
pub struct MemberDef {
    pub name: InternedString,
}

impl MemberDef {
    pub fn new(name: &str) -> Self {
        Self { name: intern(name) }
    }
}

/// A computed attribute with optional getter and setter.
pub struct GetSetDef {
    pub name: InternedString,
    pub getter: Option<Arc<ManagedFn>>,
    pub setter: Option<Arc<ManagedFn>>,
}

impl GetSetDef {
    pub fn new(name: &str, getter: Option<Arc<ManagedFn>>, setter: Option<Arc<ManagedFn>>) -> Self {
        Self {
            name: intern(name),
            getter,
            setter,
        }
    }
}

/// Pluggable base-entry substitution: a non-type base entry resolves itself
/// into the concrete types to inherit from.
pub trait BaseSubstitution: Send + Sync {
    fn resolve(&self, rt: &TypeRuntime) -> Result<Vec<Arc<TypeObject>>, ObjectError>;
}

/// One entry in a requested bases list.
pub enum BaseSpec {
    Type(Arc<TypeObject>),
    Substitute(Arc<dyn BaseSubstitution>),
}

/// Everything needed to build one type.
pub struct TypeSpec {
    pub name: String,
    pub bases: Vec<BaseSpec>,
    pub namespace: Vec<(InternedString, Value)>,
    pub methods: Vec<MethodDef>,
    pub members: Vec<MemberDef>,
    pub getsets: Vec<GetSetDef>,
    pub metaclass: Option<TypeId>,
    pub immutable: bool,
}

impl TypeSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bases: Vec::new(),
            namespace: Vec::new(),
            methods: Vec::new(),
            members: Vec::new(),
            getsets: Vec::new(),
            metaclass: None,
            immutable: false,
        }
    }
}

/// Fluent front end over [`TypeSpec`].
pub struct TypeBuilder {
    spec: TypeSpec,
}

impl TypeBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            spec: TypeSpec::new(name),
        }
    }

    pub fn base(mut self, base: Arc<TypeObject>) -> Self {
        self.spec.bases.push(BaseSpec::Type(base));
        self
    }

    pub fn base_spec(mut self, base: BaseSpec) -> Self {
        self.spec.bases.push(base);
        self
    }

    pub fn namespace(mut self, name: &str, value: Value) -> Self {
        self.spec.namespace.push((intern(name), value));
        self
    }

    pub fn method(mut self, name: &str, func: NativeMethod) -> Self {
        self.spec.methods.push(MethodDef::new(name, func));
        self
    }

    pub fn member(mut self, name: &str) -> Self {
        self.spec.members.push(MemberDef::new(name));
        self
    }

    pub fn getset(
        mut self,
        name: &str,
        getter: Option<Arc<ManagedFn>>,
        setter: Option<Arc<ManagedFn>>,
    ) -> Self {
        self.spec.getsets.push(GetSetDef::new(name, getter, setter));
        self
    }

    pub fn metaclass(mut self, metaclass: TypeId) -> Self {
        self.spec.metaclass = Some(metaclass);
        self
    }

    pub fn immutable(mut self) -> Self {
        self.spec.immutable = true;
        self
    }

    pub fn build(self, rt: &TypeRuntime) -> Result<Arc<TypeObject>, ObjectError> {
        build_type(rt, self.spec)
    }
}

// =============================================================================
// Build
// =============================================================================

/// Build a type from `spec`. See the module docs for the pipeline.
pub fn build_type(rt: &TypeRuntime, spec: TypeSpec) -> Result<Arc<TypeObject>, ObjectError> {
    let _guard = rt.mutation().lock();

    // Resolve base entries; substitutions may expand to several types.
    let mut resolved: Vec<Arc<TypeObject>> = Vec::new();
    for entry in &spec.bases {
        match entry {
            BaseSpec::Type(ty) => resolved.push(ty.clone()),
            BaseSpec::Substitute(sub) => resolved.extend(sub.resolve(rt)?),
        }
    }
    if resolved.is_empty() {
        resolved.push(rt.builtins().object_.clone());
    }
    validate_bases(&resolved)?;

    let metaclass = resolve_metaclass(rt, spec.metaclass, &resolved)?;
    let best = best_base(&resolved)?;

    // Layout: extend the dominant base with declared members, then a
    // managed dict (unless members were declared or a base has one) and
    // weak-reference storage.
    let base_layout = best.layout();
    let mut flags = TypeFlags::HEAPTYPE | TypeFlags::BASETYPE | TypeFlags::HAVE_GC;
    flags |= best.flags() & TypeFlags::INHERITED;
    let mut basic_size = base_layout.basic_size + 8 * spec.members.len() as u32;
    let mut dict_offset = base_layout.dict_offset;
    let mut weaklist_offset = base_layout.weaklist_offset;
    if dict_offset == 0 && spec.members.is_empty() {
        dict_offset = basic_size;
        basic_size += 8;
        flags |= TypeFlags::MANAGED_DICT;
    }
    if weaklist_offset == 0 {
        weaklist_offset = basic_size;
        basic_size += 8;
        flags |= TypeFlags::MANAGED_WEAKREF;
    }
    let layout = Layout {
        basic_size,
        item_size: base_layout.item_size,
        dict_offset,
        weaklist_offset,
    };

    let id = rt.registry().allocate_id();
    let extra_slot_names = if spec.members.is_empty() {
        None
    } else {
        Some(spec.members.iter().map(|m| m.name.clone()).collect())
    };
    let bases: Bases = resolved.iter().cloned().collect();
    let ty = Arc::new(TypeObject::new(
        intern(&spec.name),
        id,
        metaclass,
        layout,
        flags,
        Some(best.clone()),
        bases,
        extra_slot_names,
    ));

    // Populate the namespace before linking: hooks and slot resolution
    // must see the final contents.
    for (name, value) in &spec.namespace {
        ty.dict().set(name.clone(), value.clone());
    }
    for def in &spec.methods {
        ty.dict().set(
            def.name.clone(),
            Value::Method(Arc::new(MethodDescr {
                name: def.name.clone(),
                owner: id,
                func: def.func,
            })),
        );
    }
    for (offset, def) in spec.members.iter().enumerate() {
        ty.dict().set(
            def.name.clone(),
            Value::Member(Arc::new(MemberDescr {
                name: def.name.clone(),
                owner: id,
                offset: offset as u32,
            })),
        );
    }
    for def in &spec.getsets {
        ty.dict().set(
            def.name.clone(),
            Value::Property(Arc::new(PropertyDescr {
                name: def.name.clone(),
                getter: def.getter.clone(),
                setter: def.setter.clone(),
            })),
        );
    }

    // The type becomes visible here; everything after this point unwinds
    // on failure.
    rt.registry().insert(&ty);
    match link_type(rt, &ty, &resolved) {
        Ok(()) => {}
        Err(err) => {
            for base in &resolved {
                subclass::unregister(base, id);
            }
            rt.registry().remove(id);
            return Err(err);
        }
    }

    ty.add_flags(TypeFlags::READY);
    if spec.immutable {
        ty.add_flags(TypeFlags::IMMUTABLE);
    }
    tracing::debug!(type_name = %ty.name(), id = id.raw(), "type built");
    Ok(ty)
}

/// The fallible tail of the build: MRO, slots, hierarchy links, hooks.
fn link_type(
    rt: &TypeRuntime,
    ty: &Arc<TypeObject>,
    bases: &[Arc<TypeObject>],
) -> Result<(), ObjectError> {
    mro::mro_internal(rt, ty)?;

    slots::update_all_slots(rt, ty);
    slots::inherit_special_slots(ty);
    slots::synthesize_wrappers(rt, ty);

    for base in bases {
        subclass::register(base, ty);
    }

    // Name-binding hooks on namespace callables.
    for (name, value) in ty.dict().snapshot() {
        if let Value::Function(f) = &value {
            if let Some(hook) = f.bind_hook() {
                hook(rt, ty.id(), &name)?;
            }
        }
    }

    // Subclass-initialization hook, looked up starting at the first base.
    let init_subclass = intern("__init_subclass__");
    let hook = ty
        .mro()
        .iter()
        .skip(1)
        .find_map(|ancestor| ancestor.dict().get(&init_subclass));
    if let Some(Value::Function(f)) = hook {
        f.call(rt, &[Value::Type(ty.id())])?;
    }

    Ok(())
}

fn validate_bases(bases: &[Arc<TypeObject>]) -> Result<(), ObjectError> {
    let mut seen = FxHashSet::default();
    for base in bases {
        if !seen.insert(base.id()) {
            return Err(ObjectError::InvalidBasesSpec(format!(
                "duplicate base class '{}'",
                base.name()
            )));
        }
        if !base.is_basetype() {
            return Err(ObjectError::InvalidBasesSpec(format!(
                "type '{}' is not an acceptable base type",
                base.name()
            )));
        }
    }
    Ok(())
}

/// Most-derived metaclass among the explicit request and the bases'
/// metaclasses; unrelated metaclasses are a conflict.
fn resolve_metaclass(
    rt: &TypeRuntime,
    explicit: Option<TypeId>,
    bases: &[Arc<TypeObject>],
) -> Result<TypeId, ObjectError> {
    let mut winner_id = explicit.unwrap_or(TypeId::TYPE);
    let mut winner = rt
        .get_type(winner_id)
        .ok_or_else(|| ObjectError::InvalidBasesSpec("unknown metaclass".into()))?;
    for base in bases {
        let meta_id = base.metaclass();
        let meta = match rt.get_type(meta_id) {
            Some(meta) => meta,
            None => continue,
        };
        if winner.is_subtype_of(&meta) {
            continue;
        }
        if meta.is_subtype_of(&winner) {
            winner = meta;
            winner_id = meta_id;
            continue;
        }
        return Err(ObjectError::InvalidBasesSpec(format!(
            "metaclass conflict: '{}' and '{}' are unrelated",
            winner.name(),
            meta.name()
        )));
    }
    Ok(winner_id)
}

/// The layout-dominant base: the one whose solid base is most derived.
/// Unrelated solid bases cannot share a subclass.
pub(crate) fn best_base(bases: &[Arc<TypeObject>]) -> Result<Arc<TypeObject>, ObjectError> {
    let mut best: Option<(Arc<TypeObject>, Arc<TypeObject>)> = None;
    for base in bases {
        let solid = solid_base(base);
        match &mut best {
            None => best = Some((base.clone(), solid)),
            Some((best_base, best_solid)) => {
                if solid.is_subtype_of(best_solid) {
                    if !best_solid.is_subtype_of(&solid) {
                        *best_base = base.clone();
                        *best_solid = solid;
                    }
                } else if !best_solid.is_subtype_of(&solid) {
                    return Err(ObjectError::hierarchy(
                        "multiple bases have instance layout conflict",
                        vec![best_base.name().to_string(), base.name().to_string()],
                    ));
                }
            }
        }
    }
    best.map(|(base, _)| base)
        .ok_or_else(|| ObjectError::InvalidBasesSpec("a type needs at least one base".into()))
}

// =============================================================================
// Rebase
// =============================================================================

struct HierarchySnapshot {
    ty: Arc<TypeObject>,
    bases: Bases,
    base: Option<Arc<TypeObject>>,
    mro: Arc<Mro>,
}

/// Reassign `ty`'s bases. Transactional across the whole subtree: either
/// every affected type ends up on a consistent new MRO, or nothing
/// changes.
pub fn rebase(
    rt: &TypeRuntime,
    ty: &Arc<TypeObject>,
    new_bases: Vec<Arc<TypeObject>>,
) -> Result<(), ObjectError> {
    if ty.is_immutable() || !ty.is_heaptype() {
        return Err(ObjectError::ImmutableType(ty.name().to_string()));
    }
    if new_bases.is_empty() {
        return Err(ObjectError::InvalidBasesSpec(
            "a type must keep at least one base".into(),
        ));
    }

    let _guard = rt.mutation().lock();

    validate_bases(&new_bases)?;
    for base in &new_bases {
        if base.is_subtype_of(ty) {
            return Err(ObjectError::InvalidBasesSpec(format!(
                "a bases item causes an inheritance cycle through '{}'",
                base.name()
            )));
        }
    }

    let new_best = best_base(&new_bases)?;
    if let Some(old_best) = ty.base() {
        if solid_base(&new_best).layout() != solid_base(&old_best).layout() {
            return Err(ObjectError::hierarchy(
                "bases assignment changes the instance layout",
                vec![old_best.name().to_string(), new_best.name().to_string()],
            ));
        }
    }

    // Snapshot everything the rewrite can touch.
    let subtree = subclass::collect_subtree(ty);
    let snapshots: Vec<HierarchySnapshot> = subtree
        .iter()
        .map(|member| HierarchySnapshot {
            ty: member.clone(),
            bases: member.bases(),
            base: member.base(),
            mro: member.mro(),
        })
        .collect();
    let old_bases = ty.bases();

    for base in old_bases.iter() {
        subclass::unregister(base, ty.id());
    }
    ty.set_bases(new_bases.iter().cloned().collect());
    ty.set_base(Some(new_best));

    // Recompute the subtree top-down; children may be visited through
    // multiple paths in a diamond, which is harmless (recomputation is
    // idempotent on an unchanged parent MRO).
    match recompute_subtree(rt, ty) {
        Ok(()) => {}
        Err(err) => {
            for snap in &snapshots {
                snap.ty.set_bases(snap.bases.clone());
                snap.ty.set_base(snap.base.clone());
                snap.ty.set_mro(snap.mro.clone());
            }
            for base in old_bases.iter() {
                subclass::register(base, ty);
            }
            return Err(err);
        }
    }

    for base in &new_bases {
        subclass::register(base, ty);
    }

    rt.mark_modified_locked(ty);
    for member in &subtree {
        slots::update_all_slots(rt, member);
        slots::inherit_special_slots(member);
    }
    tracing::debug!(type_name = %ty.name(), "bases reassigned");
    Ok(())
}

fn recompute_subtree(rt: &TypeRuntime, ty: &Arc<TypeObject>) -> Result<(), ObjectError> {
    mro::mro_internal(rt, ty)?;
    for child in subclass::children_of(ty) {
        recompute_subtree(rt, &child)?;
    }
    Ok(())
}
