//! Dispatch slots: the per-type table of protocol entry points and the
//! machinery keeping it synchronized with namespace contents.
//!
//! # Architecture
//!
//! ```text
//! namespace write ("__add__" = ...)
//!        │
//!        ▼
//! update_slot ── resolve through MRO ──► SlotState
//!        │                                 ├── Empty    protocol unsupported
//!        │                                 ├── Native   direct fn-pointer call
//!        ▼                                 └── Generic  name lookup + call
//! propagate to subclasses
//! (pruned where the child's own dict defines the name)
//! ```
//!
//! A slot goes `Native` only when every dunder feeding it resolves to the
//! same slot-wrapper descriptor with a matching calling convention, owned by
//! a type in the MRO. Anything else (managed override, conflicting wrappers
//! across a shared slot, shape mismatch) demotes the slot to `Generic`,
//! which dispatches by name through the attribute cache. Correctness never
//! depends on `Native`: it is a strict fast path.
//!
//! Some slots have no dunder spelling (`SqConcat`, `SqRepeat`, the inplace
//! sequence pair, `AmSend`, the buffer pair). They are installed natively at
//! bootstrap or inherited from the dominant base, and namespace-driven
//! resolution skips them.

use crate::object::runtime::TypeRuntime;
use crate::object::subclass;
use crate::object::type_obj::TypeObject;
use crate::object::value::{
    BoundMethod, Instance, NativeFn, SlotWrapperDescr, Value,
};
use pyrite_core::{intern, InternedString, ObjectError};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::{Arc, OnceLock};

// =============================================================================
// Slot Identity
// =============================================================================

/// One dispatch slot. Grouped the way the protocol families group:
/// type-level protocols, numeric, sequence, mapping, async, buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotId {
    // Type protocols
    Repr,
    Str,
    Hash,
    Call,
    GetAttro,
    SetAttro,
    RichCompare,
    Iter,
    IterNext,
    DescrGet,
    DescrSet,
    Init,
    New,
    // Number protocols
    NbAdd,
    NbSubtract,
    NbMultiply,
    NbRemainder,
    NbDivmod,
    NbPower,
    NbNegative,
    NbPositive,
    NbAbsolute,
    NbBool,
    NbInvert,
    NbLshift,
    NbRshift,
    NbAnd,
    NbXor,
    NbOr,
    NbInt,
    NbFloat,
    NbFloorDivide,
    NbTrueDivide,
    NbIndex,
    NbMatrixMultiply,
    NbInplaceAdd,
    NbInplaceSubtract,
    NbInplaceMultiply,
    NbInplaceRemainder,
    NbInplacePower,
    NbInplaceLshift,
    NbInplaceRshift,
    NbInplaceAnd,
    NbInplaceXor,
    NbInplaceOr,
    NbInplaceFloorDivide,
    NbInplaceTrueDivide,
    NbInplaceMatrixMultiply,
    // Sequence protocols
    SqLength,
    SqConcat,
    SqRepeat,
    SqItem,
    SqAssItem,
    SqContains,
    SqInplaceConcat,
    SqInplaceRepeat,
    // Mapping protocols
    MpLength,
    MpSubscript,
    MpAssSubscript,
    // Async protocols
    AmAwait,
    AmAiter,
    AmAnext,
    AmSend,
    // Buffer protocols
    BfGetBuffer,
    BfReleaseBuffer,
}

/// Total number of slots.
pub const SLOT_COUNT: usize = 65;

impl SlotId {
    /// Dense table index.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// All slots, in table order.
    pub const ALL: [SlotId; SLOT_COUNT] = [
        SlotId::Repr,
        SlotId::Str,
        SlotId::Hash,
        SlotId::Call,
        SlotId::GetAttro,
        SlotId::SetAttro,
        SlotId::RichCompare,
        SlotId::Iter,
        SlotId::IterNext,
        SlotId::DescrGet,
        SlotId::DescrSet,
        SlotId::Init,
        SlotId::New,
        SlotId::NbAdd,
        SlotId::NbSubtract,
        SlotId::NbMultiply,
        SlotId::NbRemainder,
        SlotId::NbDivmod,
        SlotId::NbPower,
        SlotId::NbNegative,
        SlotId::NbPositive,
        SlotId::NbAbsolute,
        SlotId::NbBool,
        SlotId::NbInvert,
        SlotId::NbLshift,
        SlotId::NbRshift,
        SlotId::NbAnd,
        SlotId::NbXor,
        SlotId::NbOr,
        SlotId::NbInt,
        SlotId::NbFloat,
        SlotId::NbFloorDivide,
        SlotId::NbTrueDivide,
        SlotId::NbIndex,
        SlotId::NbMatrixMultiply,
        SlotId::NbInplaceAdd,
        SlotId::NbInplaceSubtract,
        SlotId::NbInplaceMultiply,
        SlotId::NbInplaceRemainder,
        SlotId::NbInplacePower,
        SlotId::NbInplaceLshift,
        SlotId::NbInplaceRshift,
        SlotId::NbInplaceAnd,
        SlotId::NbInplaceXor,
        SlotId::NbInplaceOr,
        SlotId::NbInplaceFloorDivide,
        SlotId::NbInplaceTrueDivide,
        SlotId::NbInplaceMatrixMultiply,
        SlotId::SqLength,
        SlotId::SqConcat,
        SlotId::SqRepeat,
        SlotId::SqItem,
        SlotId::SqAssItem,
        SlotId::SqContains,
        SlotId::SqInplaceConcat,
        SlotId::SqInplaceRepeat,
        SlotId::MpLength,
        SlotId::MpSubscript,
        SlotId::MpAssSubscript,
        SlotId::AmAwait,
        SlotId::AmAiter,
        SlotId::AmAnext,
        SlotId::AmSend,
        SlotId::BfGetBuffer,
        SlotId::BfReleaseBuffer,
    ];

    /// Expected native calling convention for this slot.
    pub fn family(self) -> SlotFamily {
        use SlotId::*;
        match self {
            Repr | Str | Iter | IterNext | NbNegative | NbPositive | NbAbsolute | NbInvert
            | NbInt | NbFloat | NbIndex | AmAwait | AmAiter | AmAnext | BfReleaseBuffer => {
                SlotFamily::Unary
            }
            NbAdd | NbSubtract | NbMultiply | NbRemainder | NbDivmod | NbLshift | NbRshift
            | NbAnd | NbXor | NbOr | NbFloorDivide | NbTrueDivide | NbMatrixMultiply
            | NbInplaceAdd | NbInplaceSubtract | NbInplaceMultiply | NbInplaceRemainder
            | NbInplaceLshift | NbInplaceRshift | NbInplaceAnd | NbInplaceXor | NbInplaceOr
            | NbInplaceFloorDivide | NbInplaceTrueDivide | NbInplaceMatrixMultiply | SqConcat
            | SqRepeat | SqItem | SqContains | SqInplaceConcat | SqInplaceRepeat
            | MpSubscript | BfGetBuffer => SlotFamily::Binary,
            NbPower | NbInplacePower | SqAssItem | MpAssSubscript => SlotFamily::Ternary,
            SqLength | MpLength => SlotFamily::Len,
            NbBool => SlotFamily::Inquiry,
            RichCompare => SlotFamily::RichCmp,
            Hash => SlotFamily::Hash,
            Call => SlotFamily::Call,
            GetAttro => SlotFamily::GetAttr,
            SetAttro => SlotFamily::SetAttr,
            DescrGet => SlotFamily::DescrGet,
            DescrSet => SlotFamily::DescrSet,
            Init => SlotFamily::Init,
            New => SlotFamily::New,
            AmSend => SlotFamily::Send,
        }
    }

    /// Protocol group the slot belongs to.
    pub fn group(self) -> SlotGroup {
        use SlotId::*;
        match self {
            Repr | Str | Hash | Call | GetAttro | SetAttro | RichCompare | Iter | IterNext
            | DescrGet | DescrSet | Init | New => SlotGroup::Type,
            SqLength | SqConcat | SqRepeat | SqItem | SqAssItem | SqContains
            | SqInplaceConcat | SqInplaceRepeat => SlotGroup::Sequence,
            MpLength | MpSubscript | MpAssSubscript => SlotGroup::Mapping,
            AmAwait | AmAiter | AmAnext | AmSend => SlotGroup::Async,
            BfGetBuffer | BfReleaseBuffer => SlotGroup::Buffer,
            _ => SlotGroup::Number,
        }
    }
}

/// Native calling-convention shapes; mirrors the `NativeFn` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFamily {
    Unary,
    Binary,
    Ternary,
    Len,
    Inquiry,
    RichCmp,
    Hash,
    Call,
    GetAttr,
    SetAttr,
    DescrGet,
    DescrSet,
    Init,
    New,
    Send,
}

impl SlotFamily {
    fn shape(self) -> u8 {
        match self {
            SlotFamily::Unary => 0,
            SlotFamily::Binary => 1,
            SlotFamily::Ternary => 2,
            SlotFamily::Len => 3,
            SlotFamily::Inquiry => 4,
            SlotFamily::RichCmp => 5,
            SlotFamily::Hash => 6,
            SlotFamily::Call => 7,
            SlotFamily::GetAttr => 8,
            SlotFamily::SetAttr => 9,
            SlotFamily::DescrGet => 10,
            SlotFamily::DescrSet => 11,
            SlotFamily::Init => 12,
            SlotFamily::New => 13,
            SlotFamily::Send => 14,
        }
    }

    /// True when `func`'s signature matches this family.
    #[inline]
    pub fn matches(self, func: &NativeFn) -> bool {
        self.shape() == func.shape()
    }
}

/// Comparison operator routed through the `RichCompare` slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Le,
    Eq,
    Ne,
    Gt,
    Ge,
}

impl CmpOp {
    /// Operator seen by the right operand when the comparison is reflected.
    pub fn swap(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
        }
    }

    /// Special-method spelling.
    pub fn dunder(self) -> &'static str {
        match self {
            CmpOp::Lt => "__lt__",
            CmpOp::Le => "__le__",
            CmpOp::Eq => "__eq__",
            CmpOp::Ne => "__ne__",
            CmpOp::Gt => "__gt__",
            CmpOp::Ge => "__ge__",
        }
    }
}

/// Protocol group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGroup {
    Type,
    Number,
    Sequence,
    Mapping,
    Async,
    Buffer,
}

// =============================================================================
// Slot State and Table
// =============================================================================

/// Current synthesis decision for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    /// Protocol unsupported by this type.
    #[default]
    Empty,
    /// Monomorphic: exactly one native implementation, called directly.
    Native(NativeFn),
    /// Dispatch by dunder name through the attribute cache.
    Generic,
}

/// Per-type dispatch table. Plain `Copy` array; swapped under the mutation
/// lock, read without one (stale reads are corrected by version checks at
/// the caller).
#[derive(Clone)]
pub struct TypeSlots {
    table: [SlotState; SLOT_COUNT],
}

impl TypeSlots {
    pub fn new() -> Self {
        Self {
            table: [SlotState::Empty; SLOT_COUNT],
        }
    }

    #[inline]
    pub fn get(&self, slot: SlotId) -> SlotState {
        self.table[slot.index()]
    }

    #[inline]
    pub fn set(&mut self, slot: SlotId, state: SlotState) {
        self.table[slot.index()] = state;
    }
}

impl Default for TypeSlots {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Slot Definitions (dunder name ↔ slot)
// =============================================================================

/// The dunder-to-slot table. Order matters for shared slots: the forward
/// binary name precedes its reflected twin, so dispatch can pick names by
/// position.
static SLOTDEFS: &[(&str, SlotId)] = &[
    ("__repr__", SlotId::Repr),
    ("__str__", SlotId::Str),
    ("__hash__", SlotId::Hash),
    ("__call__", SlotId::Call),
    ("__getattribute__", SlotId::GetAttro),
    ("__setattr__", SlotId::SetAttro),
    ("__delattr__", SlotId::SetAttro),
    ("__lt__", SlotId::RichCompare),
    ("__le__", SlotId::RichCompare),
    ("__eq__", SlotId::RichCompare),
    ("__ne__", SlotId::RichCompare),
    ("__gt__", SlotId::RichCompare),
    ("__ge__", SlotId::RichCompare),
    ("__iter__", SlotId::Iter),
    ("__next__", SlotId::IterNext),
    ("__get__", SlotId::DescrGet),
    ("__set__", SlotId::DescrSet),
    ("__delete__", SlotId::DescrSet),
    ("__init__", SlotId::Init),
    ("__new__", SlotId::New),
    ("__add__", SlotId::NbAdd),
    ("__radd__", SlotId::NbAdd),
    ("__sub__", SlotId::NbSubtract),
    ("__rsub__", SlotId::NbSubtract),
    ("__mul__", SlotId::NbMultiply),
    ("__rmul__", SlotId::NbMultiply),
    ("__mod__", SlotId::NbRemainder),
    ("__rmod__", SlotId::NbRemainder),
    ("__divmod__", SlotId::NbDivmod),
    ("__rdivmod__", SlotId::NbDivmod),
    ("__pow__", SlotId::NbPower),
    ("__rpow__", SlotId::NbPower),
    ("__neg__", SlotId::NbNegative),
    ("__pos__", SlotId::NbPositive),
    ("__abs__", SlotId::NbAbsolute),
    ("__bool__", SlotId::NbBool),
    ("__invert__", SlotId::NbInvert),
    ("__lshift__", SlotId::NbLshift),
    ("__rlshift__", SlotId::NbLshift),
    ("__rshift__", SlotId::NbRshift),
    ("__rrshift__", SlotId::NbRshift),
    ("__and__", SlotId::NbAnd),
    ("__rand__", SlotId::NbAnd),
    ("__xor__", SlotId::NbXor),
    ("__rxor__", SlotId::NbXor),
    ("__or__", SlotId::NbOr),
    ("__ror__", SlotId::NbOr),
    ("__int__", SlotId::NbInt),
    ("__float__", SlotId::NbFloat),
    ("__floordiv__", SlotId::NbFloorDivide),
    ("__rfloordiv__", SlotId::NbFloorDivide),
    ("__truediv__", SlotId::NbTrueDivide),
    ("__rtruediv__", SlotId::NbTrueDivide),
    ("__index__", SlotId::NbIndex),
    ("__matmul__", SlotId::NbMatrixMultiply),
    ("__rmatmul__", SlotId::NbMatrixMultiply),
    ("__iadd__", SlotId::NbInplaceAdd),
    ("__isub__", SlotId::NbInplaceSubtract),
    ("__imul__", SlotId::NbInplaceMultiply),
    ("__imod__", SlotId::NbInplaceRemainder),
    ("__ipow__", SlotId::NbInplacePower),
    ("__ilshift__", SlotId::NbInplaceLshift),
    ("__irshift__", SlotId::NbInplaceRshift),
    ("__iand__", SlotId::NbInplaceAnd),
    ("__ixor__", SlotId::NbInplaceXor),
    ("__ior__", SlotId::NbInplaceOr),
    ("__ifloordiv__", SlotId::NbInplaceFloorDivide),
    ("__itruediv__", SlotId::NbInplaceTrueDivide),
    ("__imatmul__", SlotId::NbInplaceMatrixMultiply),
    ("__len__", SlotId::SqLength),
    ("__len__", SlotId::MpLength),
    ("__getitem__", SlotId::SqItem),
    ("__getitem__", SlotId::MpSubscript),
    ("__setitem__", SlotId::SqAssItem),
    ("__setitem__", SlotId::MpAssSubscript),
    ("__delitem__", SlotId::SqAssItem),
    ("__delitem__", SlotId::MpAssSubscript),
    ("__contains__", SlotId::SqContains),
    ("__await__", SlotId::AmAwait),
    ("__aiter__", SlotId::AmAiter),
    ("__anext__", SlotId::AmAnext),
];

/// Slots affected by a write to `name`. Empty for non-special names.
pub fn slots_for_name(name: &str) -> &'static [SlotId] {
    static MAP: OnceLock<FxHashMap<&'static str, Vec<SlotId>>> = OnceLock::new();
    let map = MAP.get_or_init(|| {
        let mut map: FxHashMap<&'static str, Vec<SlotId>> = FxHashMap::default();
        for (name, slot) in SLOTDEFS {
            map.entry(name).or_default().push(*slot);
        }
        map
    });
    map.get(name).map(|v| v.as_slice()).unwrap_or(&[])
}

/// Dunder spellings feeding `slot`, forward name first. Empty for
/// dunder-less (inherit-only) slots.
pub fn names_for_slot(slot: SlotId) -> SmallVec<[&'static str; 6]> {
    SLOTDEFS
        .iter()
        .filter(|(_, s)| *s == slot)
        .map(|(name, _)| *name)
        .collect()
}

// =============================================================================
// Resolution and Propagation
// =============================================================================

/// Decide the state of one slot from the current MRO contents.
///
/// `Native` requires every feeding dunder that resolves to resolve to the
/// same slot-wrapper (same native pointer, matching convention, owner in the
/// MRO). `Str` and `Repr` fall back to each other when their own dunder is
/// absent.
pub fn resolve_slot(rt: &TypeRuntime, ty: &Arc<TypeObject>, slot: SlotId) -> SlotState {
    let state = resolve_one(rt, ty, slot);
    if state != SlotState::Empty {
        return state;
    }
    match slot {
        SlotId::Str => resolve_one(rt, ty, SlotId::Repr),
        SlotId::Repr => resolve_one(rt, ty, SlotId::Str),
        _ => SlotState::Empty,
    }
}

fn resolve_one(rt: &TypeRuntime, ty: &Arc<TypeObject>, slot: SlotId) -> SlotState {
    let family = slot.family();
    let mro = ty.mro();
    let mut chosen: Option<NativeFn> = None;

    for name in names_for_slot(slot) {
        let resolved = match rt.find_in_mro(ty, &intern(name)) {
            Some(v) => v,
            None => continue,
        };
        match resolved {
            Value::SlotWrapper(w)
                if w.slot == slot
                    && family.matches(&w.func)
                    && mro.iter().any(|t| t.id() == w.owner) =>
            {
                match chosen {
                    None => chosen = Some(w.func),
                    Some(f) if f == w.func => {}
                    Some(_) => return SlotState::Generic,
                }
            }
            // Managed override, foreign wrapper, or shape mismatch.
            _ => return SlotState::Generic,
        }
    }

    match chosen {
        Some(func) => SlotState::Native(func),
        None => SlotState::Empty,
    }
}

/// Re-synthesize the slots affected by a write to `name` on `ty`, then
/// propagate down the subclass graph. Propagation into a child stops when
/// the child's own namespace defines `name`: its resolution cannot change.
///
/// Runs under the mutation lock.
pub fn update_slot(rt: &TypeRuntime, ty: &Arc<TypeObject>, name: &InternedString) {
    let direct = slots_for_name(name.as_str());
    if direct.is_empty() {
        return;
    }
    let mut affected: SmallVec<[SlotId; 4]> = direct.iter().copied().collect();
    // str/repr are coupled through the fallback in resolve_slot.
    match name.as_str() {
        "__str__" => affected.push(SlotId::Repr),
        "__repr__" => affected.push(SlotId::Str),
        _ => {}
    }
    update_subtree(rt, ty, name, &affected);
}

fn update_subtree(
    rt: &TypeRuntime,
    ty: &Arc<TypeObject>,
    name: &InternedString,
    affected: &[SlotId],
) {
    for &slot in affected {
        ty.set_slot(slot, resolve_slot(rt, ty, slot));
    }
    for child in subclass::children_of(ty) {
        if child.dict().contains(name) {
            continue;
        }
        update_subtree(rt, &child, name, affected);
    }
}

/// Re-synthesize every namespace-driven slot of `ty`. Used after MRO
/// changes (build, rebase). Dunder-less slots are left untouched: they were
/// installed natively or inherited and no namespace entry can affect them.
pub fn update_all_slots(rt: &TypeRuntime, ty: &Arc<TypeObject>) {
    for slot in SlotId::ALL {
        if names_for_slot(slot).is_empty() {
            continue;
        }
        ty.set_slot(slot, resolve_slot(rt, ty, slot));
    }
}

/// Inherit dunder-less slot implementations from the MRO tail. The first
/// non-empty provider wins, matching attribute resolution order.
pub fn inherit_special_slots(ty: &Arc<TypeObject>) {
    const SPECIAL: [SlotId; 7] = [
        SlotId::SqConcat,
        SlotId::SqRepeat,
        SlotId::SqInplaceConcat,
        SlotId::SqInplaceRepeat,
        SlotId::AmSend,
        SlotId::BfGetBuffer,
        SlotId::BfReleaseBuffer,
    ];
    let mro = ty.mro();
    for slot in SPECIAL {
        if ty.slot(slot) != SlotState::Empty {
            continue;
        }
        for ancestor in mro.iter().skip(1) {
            let state = ancestor.slot(slot);
            if state != SlotState::Empty {
                ty.set_slot(slot, state);
                break;
            }
        }
    }
}

/// Publish native slot implementations as namespace wrappers so managed
/// code can see and call them by name.
///
/// A wrapper is added only where attribute resolution does not already
/// produce this exact implementation: an inherited wrapper is left where it
/// is, a managed override is never shadowed, and a type whose own native
/// differs from its ancestors' gets its own wrapper.
pub fn synthesize_wrappers(rt: &TypeRuntime, ty: &Arc<TypeObject>) {
    for slot in SlotId::ALL {
        let func = match ty.slot(slot) {
            SlotState::Native(func) => func,
            _ => continue,
        };
        for name in names_for_slot(slot) {
            let key = intern(name);
            match rt.find_in_mro(ty, &key) {
                Some(Value::SlotWrapper(w)) if w.func == func => continue,
                Some(v) if !matches!(v, Value::SlotWrapper(_)) => continue,
                _ => {}
            }
            ty.dict().set(
                key.clone(),
                Value::SlotWrapper(Arc::new(SlotWrapperDescr {
                    name: key,
                    slot,
                    func,
                    owner: ty.id(),
                })),
            );
        }
    }
}

// =============================================================================
// Typed Dispatch
// =============================================================================

impl TypeRuntime {
    /// Call a managed or bound callable value.
    pub fn call_value(&self, callee: &Value, args: &[Value]) -> Result<Value, ObjectError> {
        match callee {
            Value::Function(f) => f.call(self, args),
            Value::Method(m) => match args.split_first() {
                Some((recv, rest)) => (m.func)(self, recv, rest),
                None => Err(ObjectError::CallFailed(format!(
                    "method '{}' needs a receiver",
                    m.name
                ))),
            },
            Value::Bound(b) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(b.recv.clone());
                full.extend_from_slice(args);
                match &b.callee {
                    Value::Function(f) => f.call(self, &full),
                    Value::Method(m) => (m.func)(self, &b.recv, args),
                    Value::SlotWrapper(w) => self.call_wrapper(w, &b.recv, args),
                    other => self.call_value(other, &full),
                }
            }
            Value::SlotWrapper(w) => match args.split_first() {
                Some((recv, rest)) => self.call_wrapper(w, recv, rest),
                None => Err(ObjectError::CallFailed(format!(
                    "slot wrapper '{}' needs a receiver",
                    w.name
                ))),
            },
            Value::Type(id) => {
                let ty = self
                    .get_type(*id)
                    .ok_or_else(|| ObjectError::CallFailed("dead type in call".into()))?;
                self.new_instance(&ty, args)
            }
            Value::Instance(_) => {
                let ty = self.type_of(callee);
                match ty.slot(SlotId::Call) {
                    SlotState::Native(NativeFn::Call(f)) => f(self, callee, args),
                    SlotState::Generic => self.generic_call(callee, "__call__", args),
                    _ => Err(ObjectError::UnsupportedOperation {
                        operation: "__call__".into(),
                        type_name: ty.name().to_string(),
                    }),
                }
            }
            other => {
                let ty = self.type_of(other);
                Err(ObjectError::UnsupportedOperation {
                    operation: "__call__".into(),
                    type_name: ty.name().to_string(),
                })
            }
        }
    }

    /// Invoke a slot wrapper explicitly (fetched as an attribute and then
    /// called). Arity is checked against the wrapped convention.
    fn call_wrapper(
        &self,
        w: &SlotWrapperDescr,
        recv: &Value,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        let bad_arity = || {
            ObjectError::CallFailed(format!("wrong number of arguments for '{}'", w.name))
        };
        match w.func {
            NativeFn::Unary(f) => {
                if !args.is_empty() {
                    return Err(bad_arity());
                }
                f(self, recv)
            }
            NativeFn::Binary(f) => match args {
                [other] => f(self, recv, other),
                _ => Err(bad_arity()),
            },
            NativeFn::Ternary(f) => match args {
                [b, c] => f(self, recv, b, c),
                _ => Err(bad_arity()),
            },
            NativeFn::Len(f) => {
                if !args.is_empty() {
                    return Err(bad_arity());
                }
                f(self, recv).map(|n| Value::Int(n as i64))
            }
            NativeFn::Inquiry(f) => {
                if !args.is_empty() {
                    return Err(bad_arity());
                }
                f(self, recv).map(Value::Bool)
            }
            NativeFn::RichCmp(f) => match args {
                [other] => {
                    let op = cmp_op_for_name(w.name.as_str()).ok_or_else(bad_arity)?;
                    f(self, recv, other, op)
                }
                _ => Err(bad_arity()),
            },
            NativeFn::Hash(f) => {
                if !args.is_empty() {
                    return Err(bad_arity());
                }
                f(self, recv).map(|h| Value::Int(h as i64))
            }
            NativeFn::Call(f) => f(self, recv, args),
            NativeFn::GetAttr(f) => match args {
                [Value::Str(name)] => f(self, recv, name),
                _ => Err(bad_arity()),
            },
            NativeFn::SetAttr(f) => match args {
                [Value::Str(name)] => f(self, recv, name, None).map(|_| Value::None),
                [Value::Str(name), value] => {
                    f(self, recv, name, Some(value)).map(|_| Value::None)
                }
                _ => Err(bad_arity()),
            },
            NativeFn::DescrGet(f) => match args {
                [inst, Value::Type(owner)] => {
                    let owner = self.get_type(*owner).ok_or_else(bad_arity)?;
                    let inst = (*inst != Value::None).then_some(inst);
                    f(self, recv, inst, &owner)
                }
                _ => Err(bad_arity()),
            },
            NativeFn::DescrSet(f) => match args {
                [inst] => f(self, recv, inst, None).map(|_| Value::None),
                [inst, value] => f(self, recv, inst, Some(value)).map(|_| Value::None),
                _ => Err(bad_arity()),
            },
            NativeFn::Init(f) => f(self, recv, args).map(|_| Value::None),
            NativeFn::New(f) => match recv {
                Value::Type(id) => {
                    let ty = self.get_type(*id).ok_or_else(bad_arity)?;
                    f(self, &ty, args)
                }
                _ => Err(bad_arity()),
            },
            NativeFn::Send(f) => match args {
                [value] => f(self, recv, value),
                _ => Err(bad_arity()),
            },
        }
    }

    /// Look a dunder up through the cache, bind it, and call it.
    fn generic_call(
        &self,
        recv: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, ObjectError> {
        let ty = self.type_of(recv);
        let key = intern(name);
        match self.lookup(&ty, &key) {
            Some(descr) => {
                let bound = self.bind_descriptor(&descr, Some(recv), &ty)?;
                self.call_value(&bound, args)
            }
            None => Err(ObjectError::UnsupportedOperation {
                operation: name.into(),
                type_name: ty.name().to_string(),
            }),
        }
    }

    /// Unary protocol dispatch.
    pub fn unary(&self, slot: SlotId, v: &Value) -> Result<Value, ObjectError> {
        let ty = self.type_of(v);
        match ty.slot(slot) {
            SlotState::Native(NativeFn::Unary(f)) => f(self, v),
            SlotState::Generic | SlotState::Native(_) => {
                let names = names_for_slot(slot);
                match names.first() {
                    Some(name) => self.generic_call(v, name, &[]),
                    None => Err(ObjectError::UnsupportedOperation {
                        operation: format!("{:?}", slot),
                        type_name: ty.name().to_string(),
                    }),
                }
            }
            SlotState::Empty => Err(ObjectError::UnsupportedOperation {
                operation: names_for_slot(slot)
                    .first()
                    .copied()
                    .unwrap_or("unary")
                    .into(),
                type_name: ty.name().to_string(),
            }),
        }
    }

    /// Binary protocol dispatch with the reflected-operand rules: the right
    /// operand goes first when its type is a proper subtype of the left's.
    pub fn binary(&self, slot: SlotId, lhs: &Value, rhs: &Value) -> Result<Value, ObjectError> {
        let names = names_for_slot(slot);
        let forward = names.first().copied();
        let reflected = names.get(1).copied();

        let lty = self.type_of(lhs);
        let rty = self.type_of(rhs);
        let rhs_first =
            reflected.is_some() && rty.id() != lty.id() && rty.is_subtype_of(&lty);

        let attempts: [(bool, Option<&'static str>); 2] = if rhs_first {
            [(false, reflected), (true, forward)]
        } else {
            [(true, forward), (false, reflected)]
        };

        for (is_forward, name) in attempts {
            let (ty, recv, other) = if is_forward {
                (&lty, lhs, rhs)
            } else {
                // Reflected attempts are skipped for same-typed operands:
                // the forward call already saw the only implementation.
                if rty.id() == lty.id() {
                    continue;
                }
                (&rty, rhs, lhs)
            };
            let result = match ty.slot(slot) {
                // The native implementation sees operands in expression
                // order regardless of which side supplied it.
                SlotState::Native(NativeFn::Binary(f)) => f(self, lhs, rhs),
                SlotState::Generic => match name {
                    Some(name) => self.generic_call(recv, name, &[other.clone()]),
                    None => continue,
                },
                _ => continue,
            };
            match result {
                Err(ObjectError::UnsupportedOperation { .. }) => continue,
                other => return other,
            }
        }

        Err(ObjectError::UnsupportedOperation {
            operation: forward.unwrap_or("binary").into(),
            type_name: lty.name().to_string(),
        })
    }

    /// Rich comparison with reflection and the identity fallback for
    /// equality.
    pub fn richcompare(
        &self,
        lhs: &Value,
        rhs: &Value,
        op: CmpOp,
    ) -> Result<Value, ObjectError> {
        let lty = self.type_of(lhs);
        let rty = self.type_of(rhs);
        let rhs_first = rty.id() != lty.id() && rty.is_subtype_of(&lty);

        let order: [bool; 2] = if rhs_first { [false, true] } else { [true, false] };
        for is_forward in order {
            let (ty, a, b, side_op) = if is_forward {
                (&lty, lhs, rhs, op)
            } else {
                if rty.id() == lty.id() {
                    continue;
                }
                (&rty, rhs, lhs, op.swap())
            };
            let result = match ty.slot(SlotId::RichCompare) {
                SlotState::Native(NativeFn::RichCmp(f)) => f(self, a, b, side_op),
                SlotState::Generic => self.generic_call(a, side_op.dunder(), &[b.clone()]),
                _ => continue,
            };
            match result {
                Err(ObjectError::UnsupportedOperation { .. }) => continue,
                other => return other,
            }
        }

        match op {
            CmpOp::Eq => Ok(Value::Bool(lhs == rhs)),
            CmpOp::Ne => Ok(Value::Bool(lhs != rhs)),
            _ => Err(ObjectError::UnsupportedOperation {
                operation: op.dunder().into(),
                type_name: lty.name().to_string(),
            }),
        }
    }

    /// Length protocol: sequence slot first, then mapping.
    pub fn len_of(&self, v: &Value) -> Result<usize, ObjectError> {
        let ty = self.type_of(v);
        for slot in [SlotId::SqLength, SlotId::MpLength] {
            match ty.slot(slot) {
                SlotState::Native(NativeFn::Len(f)) => return f(self, v),
                SlotState::Generic => {
                    let result = self.generic_call(v, "__len__", &[])?;
                    return match result {
                        Value::Int(n) if n >= 0 => Ok(n as usize),
                        Value::Int(_) => {
                            Err(ObjectError::CallFailed("__len__ returned a negative length".into()))
                        }
                        _ => Err(ObjectError::CallFailed("__len__ returned a non-integer".into())),
                    };
                }
                _ => continue,
            }
        }
        Err(ObjectError::UnsupportedOperation {
            operation: "__len__".into(),
            type_name: ty.name().to_string(),
        })
    }

    /// Subscript read: mapping slot first, then sequence.
    pub fn subscript(&self, obj: &Value, key: &Value) -> Result<Value, ObjectError> {
        let ty = self.type_of(obj);
        for slot in [SlotId::MpSubscript, SlotId::SqItem] {
            match ty.slot(slot) {
                SlotState::Native(NativeFn::Binary(f)) => return f(self, obj, key),
                SlotState::Generic => {
                    return self.generic_call(obj, "__getitem__", &[key.clone()])
                }
                _ => continue,
            }
        }
        Err(ObjectError::UnsupportedOperation {
            operation: "__getitem__".into(),
            type_name: ty.name().to_string(),
        })
    }

    /// Subscript write.
    pub fn set_subscript(
        &self,
        obj: &Value,
        key: &Value,
        value: &Value,
    ) -> Result<(), ObjectError> {
        let ty = self.type_of(obj);
        for slot in [SlotId::MpAssSubscript, SlotId::SqAssItem] {
            match ty.slot(slot) {
                SlotState::Native(NativeFn::Ternary(f)) => {
                    return f(self, obj, key, value).map(|_| ())
                }
                SlotState::Generic => {
                    return self
                        .generic_call(obj, "__setitem__", &[key.clone(), value.clone()])
                        .map(|_| ())
                }
                _ => continue,
            }
        }
        Err(ObjectError::UnsupportedOperation {
            operation: "__setitem__".into(),
            type_name: ty.name().to_string(),
        })
    }

    /// Membership test.
    pub fn contains(&self, obj: &Value, item: &Value) -> Result<bool, ObjectError> {
        let ty = self.type_of(obj);
        match ty.slot(SlotId::SqContains) {
            SlotState::Native(NativeFn::Binary(f)) => {
                f(self, obj, item).map(|v| self.is_truthy(&v))
            }
            SlotState::Generic => self
                .generic_call(obj, "__contains__", &[item.clone()])
                .map(|v| self.is_truthy(&v)),
            _ => Err(ObjectError::UnsupportedOperation {
                operation: "__contains__".into(),
                type_name: ty.name().to_string(),
            }),
        }
    }

    /// `str()` protocol; falls back to the repr.
    pub fn str_of(&self, v: &Value) -> Result<Value, ObjectError> {
        let ty = self.type_of(v);
        match ty.slot(SlotId::Str) {
            SlotState::Native(NativeFn::Unary(f)) => f(self, v),
            SlotState::Generic => self.generic_call(v, "__str__", &[]),
            _ => self.repr_of(v),
        }
    }

    /// `repr()` protocol; the last resort is a plain type-name form.
    pub fn repr_of(&self, v: &Value) -> Result<Value, ObjectError> {
        let ty = self.type_of(v);
        match ty.slot(SlotId::Repr) {
            SlotState::Native(NativeFn::Unary(f)) => f(self, v),
            SlotState::Generic => self.generic_call(v, "__repr__", &[]),
            _ => Ok(Value::str(&format!("<{} object>", ty.name()))),
        }
    }

    /// Hash protocol.
    pub fn hash_of(&self, v: &Value) -> Result<u64, ObjectError> {
        let ty = self.type_of(v);
        match ty.slot(SlotId::Hash) {
            SlotState::Native(NativeFn::Hash(f)) => f(self, v),
            SlotState::Generic => match self.generic_call(v, "__hash__", &[])? {
                Value::Int(n) => Ok(n as u64),
                _ => Err(ObjectError::CallFailed("__hash__ returned a non-integer".into())),
            },
            _ => Err(ObjectError::UnsupportedOperation {
                operation: "__hash__".into(),
                type_name: ty.name().to_string(),
            }),
        }
    }

    /// Truthiness: `__bool__`, then non-zero length, then true.
    pub fn truthy(&self, v: &Value) -> Result<bool, ObjectError> {
        let ty = self.type_of(v);
        match ty.slot(SlotId::NbBool) {
            SlotState::Native(NativeFn::Inquiry(f)) => return f(self, v),
            SlotState::Generic => {
                return self
                    .generic_call(v, "__bool__", &[])
                    .map(|r| self.is_truthy(&r))
            }
            _ => {}
        }
        match self.len_of(v) {
            Ok(n) => Ok(n != 0),
            Err(ObjectError::UnsupportedOperation { .. }) => Ok(true),
            Err(err) => Err(err),
        }
    }

    #[inline]
    fn is_truthy(&self, v: &Value) -> bool {
        !matches!(v, Value::Bool(false) | Value::None | Value::Int(0))
    }

    /// Iterator protocol.
    pub fn iterate(&self, v: &Value) -> Result<Value, ObjectError> {
        self.unary(SlotId::Iter, v)
    }

    pub fn iter_next(&self, v: &Value) -> Result<Value, ObjectError> {
        self.unary(SlotId::IterNext, v)
    }

    /// Attribute read through the `GetAttro` slot. A generic
    /// `__getattribute__` that raises "not found" falls back to
    /// `__getattr__` when the type defines one.
    pub fn get_attr(&self, obj: &Value, name: &InternedString) -> Result<Value, ObjectError> {
        let ty = self.type_of(obj);
        let primary = match ty.slot(SlotId::GetAttro) {
            SlotState::Native(NativeFn::GetAttr(f)) => f(self, obj, name),
            SlotState::Generic => {
                self.generic_call(obj, "__getattribute__", &[Value::Str(name.clone())])
            }
            _ => self.generic_getattr(obj, name),
        };
        match primary {
            Err(ObjectError::AttributeNotFound { .. }) => {
                match self.lookup(&ty, &intern("__getattr__")) {
                    Some(hook) => {
                        let bound = self.bind_descriptor(&hook, Some(obj), &ty)?;
                        self.call_value(&bound, &[Value::Str(name.clone())])
                    }
                    None => primary,
                }
            }
            other => other,
        }
    }

    /// Attribute write (or delete, when `value` is `None`).
    pub fn set_attr(
        &self,
        obj: &Value,
        name: &InternedString,
        value: Option<&Value>,
    ) -> Result<(), ObjectError> {
        let ty = self.type_of(obj);
        match ty.slot(SlotId::SetAttro) {
            SlotState::Native(NativeFn::SetAttr(f)) => f(self, obj, name, value),
            SlotState::Generic => {
                let result = match value {
                    Some(v) => self.generic_call(
                        obj,
                        "__setattr__",
                        &[Value::Str(name.clone()), v.clone()],
                    ),
                    None => {
                        self.generic_call(obj, "__delattr__", &[Value::Str(name.clone())])
                    }
                };
                result.map(|_| ())
            }
            _ => self.generic_setattr(obj, name, value),
        }
    }

    /// Allocate and initialize an instance of `ty`.
    pub fn new_instance(&self, ty: &Arc<TypeObject>, args: &[Value]) -> Result<Value, ObjectError> {
        let instance = match ty.slot(SlotId::New) {
            SlotState::Native(NativeFn::New(f)) => f(self, ty, args)?,
            // Resolution only installs `New`-shaped natives here; any other
            // shape is treated as absent.
            SlotState::Native(_) => Value::Instance(Instance::new(ty.clone())),
            SlotState::Generic => {
                let new = self
                    .lookup(ty, &intern("__new__"))
                    .ok_or_else(|| ObjectError::UnsupportedOperation {
                        operation: "__new__".into(),
                        type_name: ty.name().to_string(),
                    })?;
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(Value::Type(ty.id()));
                full.extend_from_slice(args);
                self.call_value(&new, &full)?
            }
            SlotState::Empty => Value::Instance(Instance::new(ty.clone())),
        };
        // Only initialize results that are actually instances of `ty`;
        // __new__ may legitimately return something else.
        if self.type_of(&instance).is_subtype_of(ty) {
            match ty.slot(SlotId::Init) {
                SlotState::Native(NativeFn::Init(f)) => f(self, &instance, args)?,
                SlotState::Generic => {
                    self.generic_call(&instance, "__init__", args)?;
                }
                SlotState::Native(_) | SlotState::Empty => {}
            }
        }
        Ok(instance)
    }

    // =========================================================================
    // Descriptor protocol and the generic attribute paths
    // =========================================================================

    /// Bind `descr` for access from `instance` (or from the type when
    /// `instance` is `None`).
    pub fn bind_descriptor(
        &self,
        descr: &Value,
        instance: Option<&Value>,
        owner: &Arc<TypeObject>,
    ) -> Result<Value, ObjectError> {
        match (descr, instance) {
            (Value::Property(p), Some(inst)) => match &p.getter {
                Some(getter) => getter.call(self, &[inst.clone()]),
                None => Err(ObjectError::UnsupportedOperation {
                    operation: format!("read property '{}'", p.name),
                    type_name: owner.name().to_string(),
                }),
            },
            (Value::Member(m), Some(inst)) => match inst {
                Value::Instance(i) => i.get(&m.name).ok_or_else(|| {
                    ObjectError::AttributeNotFound {
                        type_name: owner.name().to_string(),
                        attribute: m.name.to_string(),
                    }
                }),
                _ => Err(ObjectError::AttributeNotFound {
                    type_name: owner.name().to_string(),
                    attribute: m.name.to_string(),
                }),
            },
            (d, Some(inst)) if d.is_callable_descriptor() => {
                Ok(Value::Bound(Arc::new(BoundMethod {
                    callee: d.clone(),
                    recv: inst.clone(),
                })))
            }
            // Class access (or a plain value): the descriptor itself.
            _ => Ok(descr.clone()),
        }
    }

    /// Default attribute read: data descriptors, then the instance
    /// dictionary, then non-data descriptors, then "not found".
    pub fn generic_getattr(
        &self,
        obj: &Value,
        name: &InternedString,
    ) -> Result<Value, ObjectError> {
        let ty = self.type_of(obj);
        let from_type = self.lookup(&ty, name);

        if let Some(descr) = &from_type {
            if descr.is_data_descriptor() {
                return self.bind_descriptor(descr, Some(obj), &ty);
            }
        }
        if let Value::Instance(inst) = obj {
            if let Some(value) = inst.get(name) {
                return Ok(value);
            }
        }
        match from_type {
            Some(descr) => self.bind_descriptor(&descr, Some(obj), &ty),
            None => Err(ObjectError::AttributeNotFound {
                type_name: ty.name().to_string(),
                attribute: name.to_string(),
            }),
        }
    }

    /// Default attribute write: data descriptors win, otherwise the
    /// instance dictionary.
    pub fn generic_setattr(
        &self,
        obj: &Value,
        name: &InternedString,
        value: Option<&Value>,
    ) -> Result<(), ObjectError> {
        let ty = self.type_of(obj);
        if let Some(descr) = self.lookup(&ty, name) {
            match &descr {
                Value::Property(p) => {
                    return match (&p.setter, value) {
                        (Some(setter), Some(v)) => setter
                            .call(self, &[obj.clone(), v.clone()])
                            .map(|_| ()),
                        _ => Err(ObjectError::UnsupportedOperation {
                            operation: format!("write property '{}'", p.name),
                            type_name: ty.name().to_string(),
                        }),
                    };
                }
                Value::Member(m) => {
                    return match obj {
                        Value::Instance(inst) => {
                            match value {
                                Some(v) => inst.set(m.name.clone(), v.clone()),
                                None => {
                                    inst.remove(&m.name).ok_or_else(|| {
                                        ObjectError::AttributeNotFound {
                                            type_name: ty.name().to_string(),
                                            attribute: m.name.to_string(),
                                        }
                                    })?;
                                }
                            }
                            Ok(())
                        }
                        _ => Err(ObjectError::UnsupportedOperation {
                            operation: format!("write member '{}'", m.name),
                            type_name: ty.name().to_string(),
                        }),
                    };
                }
                _ => {}
            }
        }
        match obj {
            Value::Instance(inst) => {
                match value {
                    Some(v) => inst.set(name.clone(), v.clone()),
                    None => {
                        inst.remove(name)
                            .ok_or_else(|| ObjectError::AttributeNotFound {
                                type_name: ty.name().to_string(),
                                attribute: name.to_string(),
                            })?;
                    }
                }
                Ok(())
            }
            _ => Err(ObjectError::UnsupportedOperation {
                operation: "__setattr__".into(),
                type_name: ty.name().to_string(),
            }),
        }
    }
}

fn cmp_op_for_name(name: &str) -> Option<CmpOp> {
    match name {
        "__lt__" => Some(CmpOp::Lt),
        "__le__" => Some(CmpOp::Le),
        "__eq__" => Some(CmpOp::Eq),
        "__ne__" => Some(CmpOp::Ne),
        "__gt__" => Some(CmpOp::Gt),
        "__ge__" => Some(CmpOp::Ge),
        _ => None,
    }
}

// =============================================================================
// Builtin Native Implementations
// =============================================================================
//
// Installed at bootstrap, before any user type exists. Binary operators
// signal a type mismatch with `UnsupportedOperation`, which drives the
// reflected-operand retry in `TypeRuntime::binary`.

fn int_value(v: &Value) -> Option<i64> {
    match v {
        Value::Int(n) => Some(*n),
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

fn float_value(v: &Value) -> Option<f64> {
    match v {
        Value::Float(x) => Some(*x),
        Value::Int(n) => Some(*n as f64),
        Value::Bool(b) => Some(*b as i64 as f64),
        _ => None,
    }
}

fn unsupported(op: &str, rt: &TypeRuntime, v: &Value) -> ObjectError {
    ObjectError::UnsupportedOperation {
        operation: op.into(),
        type_name: rt.type_of(v).name().to_string(),
    }
}

// ---- object ----------------------------------------------------------------

pub(crate) fn object_new(
    _rt: &TypeRuntime,
    ty: &Arc<TypeObject>,
    _args: &[Value],
) -> Result<Value, ObjectError> {
    Ok(Value::Instance(Instance::new(ty.clone())))
}

pub(crate) fn object_init(
    _rt: &TypeRuntime,
    _recv: &Value,
    args: &[Value],
) -> Result<(), ObjectError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(ObjectError::CallFailed(
            "object.__init__ takes no arguments".into(),
        ))
    }
}

pub(crate) fn object_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    Ok(Value::str(&format!("<{} object>", rt.type_of(v).name())))
}

pub(crate) fn object_str(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    rt.repr_of(v)
}

pub(crate) fn object_hash(_rt: &TypeRuntime, v: &Value) -> Result<u64, ObjectError> {
    Ok(match v {
        Value::Instance(i) => Arc::as_ptr(i) as u64,
        Value::Function(f) => Arc::as_ptr(f) as u64,
        Value::Type(id) => id.raw() as u64,
        Value::None => 0xD1B5_4A32,
        Value::Bool(b) => *b as u64,
        Value::Int(n) => *n as u64,
        Value::Float(x) => x.to_bits(),
        Value::Str(s) => s.hash_value(),
        Value::Tuple(t) => Arc::as_ptr(t) as u64,
        Value::Method(m) => Arc::as_ptr(m) as u64,
        Value::Member(m) => Arc::as_ptr(m) as u64,
        Value::Property(p) => Arc::as_ptr(p) as u64,
        Value::SlotWrapper(w) => Arc::as_ptr(w) as u64,
        Value::Bound(b) => Arc::as_ptr(b) as u64,
    })
}

pub(crate) fn object_getattro(
    rt: &TypeRuntime,
    v: &Value,
    name: &InternedString,
) -> Result<Value, ObjectError> {
    rt.generic_getattr(v, name)
}

pub(crate) fn object_setattro(
    rt: &TypeRuntime,
    v: &Value,
    name: &InternedString,
    value: Option<&Value>,
) -> Result<(), ObjectError> {
    rt.generic_setattr(v, name, value)
}

pub(crate) fn object_richcompare(
    rt: &TypeRuntime,
    a: &Value,
    b: &Value,
    op: CmpOp,
) -> Result<Value, ObjectError> {
    match op {
        CmpOp::Eq => Ok(Value::Bool(a == b)),
        CmpOp::Ne => Ok(Value::Bool(a != b)),
        _ => Err(unsupported(op.dunder(), rt, a)),
    }
}

// ---- type ------------------------------------------------------------------

pub(crate) fn type_call(
    rt: &TypeRuntime,
    callee: &Value,
    args: &[Value],
) -> Result<Value, ObjectError> {
    match callee {
        Value::Type(id) => {
            let ty = rt
                .get_type(*id)
                .ok_or_else(|| ObjectError::CallFailed("dead type in call".into()))?;
            rt.new_instance(&ty, args)
        }
        _ => Err(unsupported("__call__", rt, callee)),
    }
}

pub(crate) fn type_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Type(id) => {
            let ty = rt
                .get_type(*id)
                .ok_or_else(|| ObjectError::CallFailed("dead type in repr".into()))?;
            Ok(Value::str(&format!("<class '{}'>", ty.name())))
        }
        _ => Err(unsupported("__repr__", rt, v)),
    }
}

pub(crate) fn type_getattro(
    rt: &TypeRuntime,
    v: &Value,
    name: &InternedString,
) -> Result<Value, ObjectError> {
    match v {
        Value::Type(id) => {
            let ty = rt
                .get_type(*id)
                .ok_or_else(|| ObjectError::AttributeNotFound {
                    type_name: "type".into(),
                    attribute: name.to_string(),
                })?;
            match rt.lookup(&ty, name) {
                // Class access: descriptors are returned unbound.
                Some(descr) => rt.bind_descriptor(&descr, None, &ty),
                None => Err(ObjectError::AttributeNotFound {
                    type_name: ty.name().to_string(),
                    attribute: name.to_string(),
                }),
            }
        }
        _ => Err(unsupported("__getattribute__", rt, v)),
    }
}

pub(crate) fn type_setattro(
    rt: &TypeRuntime,
    v: &Value,
    name: &InternedString,
    value: Option<&Value>,
) -> Result<(), ObjectError> {
    match v {
        Value::Type(id) => {
            let ty = rt
                .get_type(*id)
                .ok_or_else(|| ObjectError::CallFailed("dead type in setattr".into()))?;
            match value {
                Some(value) => rt.set_type_attr(&ty, name, value.clone()),
                None => rt.del_type_attr(&ty, name),
            }
        }
        _ => Err(unsupported("__setattr__", rt, v)),
    }
}

// ---- int -------------------------------------------------------------------

macro_rules! int_binop {
    ($name:ident, $op:literal, $method:ident) => {
        pub(crate) fn $name(
            rt: &TypeRuntime,
            a: &Value,
            b: &Value,
        ) -> Result<Value, ObjectError> {
            match (int_value(a), int_value(b)) {
                (Some(x), Some(y)) => x
                    .$method(y)
                    .map(Value::Int)
                    .ok_or_else(|| ObjectError::CallFailed("integer overflow".into())),
                _ => Err(unsupported($op, rt, a)),
            }
        }
    };
}

int_binop!(int_add, "__add__", checked_add);
int_binop!(int_sub, "__sub__", checked_sub);
int_binop!(int_mul, "__mul__", checked_mul);

pub(crate) fn int_neg(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match int_value(v) {
        Some(n) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ObjectError::CallFailed("integer overflow".into())),
        None => Err(unsupported("__neg__", rt, v)),
    }
}

pub(crate) fn int_bool(rt: &TypeRuntime, v: &Value) -> Result<bool, ObjectError> {
    int_value(v)
        .map(|n| n != 0)
        .ok_or_else(|| unsupported("__bool__", rt, v))
}

pub(crate) fn int_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Bool(b) => Ok(Value::str(if *b { "True" } else { "False" })),
        _ => match int_value(v) {
            Some(n) => Ok(Value::str(&n.to_string())),
            None => Err(unsupported("__repr__", rt, v)),
        },
    }
}

pub(crate) fn int_hash(rt: &TypeRuntime, v: &Value) -> Result<u64, ObjectError> {
    int_value(v)
        .map(|n| n as u64)
        .ok_or_else(|| unsupported("__hash__", rt, v))
}

pub(crate) fn int_richcompare(
    rt: &TypeRuntime,
    a: &Value,
    b: &Value,
    op: CmpOp,
) -> Result<Value, ObjectError> {
    match (int_value(a), int_value(b)) {
        (Some(x), Some(y)) => Ok(Value::Bool(match op {
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        })),
        _ => Err(unsupported(op.dunder(), rt, a)),
    }
}

// ---- float -----------------------------------------------------------------

macro_rules! float_binop {
    ($name:ident, $op:literal, $expr:expr) => {
        pub(crate) fn $name(
            rt: &TypeRuntime,
            a: &Value,
            b: &Value,
        ) -> Result<Value, ObjectError> {
            match (float_value(a), float_value(b)) {
                (Some(x), Some(y)) => {
                    let f: fn(f64, f64) -> f64 = $expr;
                    Ok(Value::Float(f(x, y)))
                }
                _ => Err(unsupported($op, rt, a)),
            }
        }
    };
}

float_binop!(float_add, "__add__", |x, y| x + y);
float_binop!(float_sub, "__sub__", |x, y| x - y);
float_binop!(float_mul, "__mul__", |x, y| x * y);

pub(crate) fn float_neg(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Float(x) => Ok(Value::Float(-x)),
        _ => Err(unsupported("__neg__", rt, v)),
    }
}

pub(crate) fn float_bool(rt: &TypeRuntime, v: &Value) -> Result<bool, ObjectError> {
    match v {
        Value::Float(x) => Ok(*x != 0.0),
        _ => Err(unsupported("__bool__", rt, v)),
    }
}

pub(crate) fn float_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Float(x) => Ok(Value::str(&x.to_string())),
        _ => Err(unsupported("__repr__", rt, v)),
    }
}

pub(crate) fn float_hash(rt: &TypeRuntime, v: &Value) -> Result<u64, ObjectError> {
    match v {
        Value::Float(x) => Ok(x.to_bits()),
        _ => Err(unsupported("__hash__", rt, v)),
    }
}

pub(crate) fn float_richcompare(
    rt: &TypeRuntime,
    a: &Value,
    b: &Value,
    op: CmpOp,
) -> Result<Value, ObjectError> {
    match (float_value(a), float_value(b)) {
        (Some(x), Some(y)) => Ok(Value::Bool(match op {
            CmpOp::Lt => x < y,
            CmpOp::Le => x <= y,
            CmpOp::Eq => x == y,
            CmpOp::Ne => x != y,
            CmpOp::Gt => x > y,
            CmpOp::Ge => x >= y,
        })),
        _ => Err(unsupported(op.dunder(), rt, a)),
    }
}

// ---- str -------------------------------------------------------------------

pub(crate) fn str_len(rt: &TypeRuntime, v: &Value) -> Result<usize, ObjectError> {
    match v {
        Value::Str(s) => Ok(s.as_str().chars().count()),
        _ => Err(unsupported("__len__", rt, v)),
    }
}

pub(crate) fn str_concat(rt: &TypeRuntime, a: &Value, b: &Value) -> Result<Value, ObjectError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let mut joined = String::with_capacity(x.as_str().len() + y.as_str().len());
            joined.push_str(x.as_str());
            joined.push_str(y.as_str());
            Ok(Value::str(&joined))
        }
        _ => Err(unsupported("__add__", rt, a)),
    }
}

pub(crate) fn str_str(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Str(_) => Ok(v.clone()),
        _ => Err(unsupported("__str__", rt, v)),
    }
}

pub(crate) fn str_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Str(s) => Ok(Value::str(&format!("{:?}", s.as_str()))),
        _ => Err(unsupported("__repr__", rt, v)),
    }
}

pub(crate) fn str_hash(rt: &TypeRuntime, v: &Value) -> Result<u64, ObjectError> {
    match v {
        Value::Str(s) => Ok(s.hash_value()),
        _ => Err(unsupported("__hash__", rt, v)),
    }
}

pub(crate) fn str_bool(rt: &TypeRuntime, v: &Value) -> Result<bool, ObjectError> {
    match v {
        Value::Str(s) => Ok(!s.as_str().is_empty()),
        _ => Err(unsupported("__bool__", rt, v)),
    }
}

pub(crate) fn str_richcompare(
    rt: &TypeRuntime,
    a: &Value,
    b: &Value,
    op: CmpOp,
) -> Result<Value, ObjectError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => {
            let (x, y) = (x.as_str(), y.as_str());
            Ok(Value::Bool(match op {
                CmpOp::Lt => x < y,
                CmpOp::Le => x <= y,
                CmpOp::Eq => x == y,
                CmpOp::Ne => x != y,
                CmpOp::Gt => x > y,
                CmpOp::Ge => x >= y,
            }))
        }
        _ => Err(unsupported(op.dunder(), rt, a)),
    }
}

// ---- none ------------------------------------------------------------------

pub(crate) fn none_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::None => Ok(Value::str("None")),
        _ => Err(unsupported("__repr__", rt, v)),
    }
}

pub(crate) fn none_bool(rt: &TypeRuntime, v: &Value) -> Result<bool, ObjectError> {
    match v {
        Value::None => Ok(false),
        _ => Err(unsupported("__bool__", rt, v)),
    }
}

// ---- tuple -----------------------------------------------------------------

pub(crate) fn tuple_len(rt: &TypeRuntime, v: &Value) -> Result<usize, ObjectError> {
    match v {
        Value::Tuple(items) => Ok(items.len()),
        _ => Err(unsupported("__len__", rt, v)),
    }
}

pub(crate) fn tuple_item(rt: &TypeRuntime, v: &Value, key: &Value) -> Result<Value, ObjectError> {
    match (v, key) {
        (Value::Tuple(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let index = if *i < 0 { i + len } else { *i };
            if index < 0 || index >= len {
                return Err(ObjectError::CallFailed("tuple index out of range".into()));
            }
            Ok(items[index as usize].clone())
        }
        (Value::Tuple(_), _) => Err(ObjectError::CallFailed(
            "tuple indices must be integers".into(),
        )),
        _ => Err(unsupported("__getitem__", rt, v)),
    }
}

pub(crate) fn tuple_bool(rt: &TypeRuntime, v: &Value) -> Result<bool, ObjectError> {
    match v {
        Value::Tuple(items) => Ok(!items.is_empty()),
        _ => Err(unsupported("__bool__", rt, v)),
    }
}

pub(crate) fn tuple_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Tuple(items) => {
            let mut out = String::from("(");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match rt.repr_of(item)? {
                    Value::Str(s) => out.push_str(s.as_str()),
                    other => out.push_str(&format!("{:?}", other)),
                }
            }
            if items.len() == 1 {
                out.push(',');
            }
            out.push(')');
            Ok(Value::str(&out))
        }
        _ => Err(unsupported("__repr__", rt, v)),
    }
}

// ---- function --------------------------------------------------------------

pub(crate) fn function_call(
    rt: &TypeRuntime,
    callee: &Value,
    args: &[Value],
) -> Result<Value, ObjectError> {
    match callee {
        Value::Function(f) => f.call(rt, args),
        _ => Err(unsupported("__call__", rt, callee)),
    }
}

pub(crate) fn function_repr(rt: &TypeRuntime, v: &Value) -> Result<Value, ObjectError> {
    match v {
        Value::Function(f) => Ok(Value::str(&format!("<function {}>", f.name()))),
        _ => Err(unsupported("__repr__", rt, v)),
    }
}
