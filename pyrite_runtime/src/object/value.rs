//! Tagged runtime values and descriptor objects.
//!
//! `Value` is the unit of storage for type namespaces, instance dictionaries,
//! and the attribute cache. It is cheap to clone: every heap-backed variant
//! is an `Arc`.
//!
//! Descriptor variants:
//! - `Function` — a managed callable (user-defined method)
//! - `Method` — a native method with a fixed calling convention
//! - `Member` — fixed-storage instance attribute (declared slot)
//! - `Property` — computed attribute with optional getter/setter
//! - `SlotWrapper` — calling-convention-correct wrapper over a native
//!   dispatch slot, synthesized by the slot table
//! - `BoundMethod` — a callable paired with its receiver

use crate::object::runtime::TypeRuntime;
use crate::object::slots::{CmpOp, SlotId};
use crate::object::type_obj::{TypeId, TypeObject};
use parking_lot::RwLock;
use pyrite_core::{InternedString, ObjectError};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

// =============================================================================
// Native Calling Conventions
// =============================================================================

/// One-operand native slot function.
pub type UnaryFunc = fn(&TypeRuntime, &Value) -> Result<Value, ObjectError>;
/// Two-operand native slot function. Returns `UnsupportedOperation` when the
/// operand types do not match, which triggers the reflected path.
pub type BinaryFunc = fn(&TypeRuntime, &Value, &Value) -> Result<Value, ObjectError>;
/// Three-operand native slot function (e.g. the power protocol, item store).
pub type TernaryFunc = fn(&TypeRuntime, &Value, &Value, &Value) -> Result<Value, ObjectError>;
/// Length protocol.
pub type LenFunc = fn(&TypeRuntime, &Value) -> Result<usize, ObjectError>;
/// Truthiness protocol.
pub type InquiryFunc = fn(&TypeRuntime, &Value) -> Result<bool, ObjectError>;
/// Rich comparison: one slot serves all six comparison operators.
pub type RichCmpFunc = fn(&TypeRuntime, &Value, &Value, CmpOp) -> Result<Value, ObjectError>;
/// Hash protocol.
pub type HashFunc = fn(&TypeRuntime, &Value) -> Result<u64, ObjectError>;
/// Call protocol: receiver plus positional arguments.
pub type CallFunc = fn(&TypeRuntime, &Value, &[Value]) -> Result<Value, ObjectError>;
/// Attribute read.
pub type GetAttrFunc = fn(&TypeRuntime, &Value, &InternedString) -> Result<Value, ObjectError>;
/// Attribute write (`None` value means delete).
pub type SetAttrFunc =
    fn(&TypeRuntime, &Value, &InternedString, Option<&Value>) -> Result<(), ObjectError>;
/// Descriptor `__get__`: (descriptor, instance, owner).
pub type DescrGetFunc =
    fn(&TypeRuntime, &Value, Option<&Value>, &Arc<TypeObject>) -> Result<Value, ObjectError>;
/// Descriptor `__set__`/`__delete__` (`None` value means delete).
pub type DescrSetFunc =
    fn(&TypeRuntime, &Value, &Value, Option<&Value>) -> Result<(), ObjectError>;
/// Instance initialization.
pub type InitFunc = fn(&TypeRuntime, &Value, &[Value]) -> Result<(), ObjectError>;
/// Instance allocation for a given type.
pub type NewFunc = fn(&TypeRuntime, &Arc<TypeObject>, &[Value]) -> Result<Value, ObjectError>;
/// Coroutine send protocol.
pub type SendFunc = fn(&TypeRuntime, &Value, &Value) -> Result<Value, ObjectError>;

/// Native method calling convention: explicit receiver plus arguments.
pub type NativeMethod = fn(&TypeRuntime, &Value, &[Value]) -> Result<Value, ObjectError>;

/// A native slot implementation, tagged by call-signature shape.
///
/// Dispatch through a `NativeFn` is a table lookup and a direct call; there
/// is no virtual dispatch involved.
#[derive(Clone, Copy)]
pub enum NativeFn {
    Unary(UnaryFunc),
    Binary(BinaryFunc),
    Ternary(TernaryFunc),
    Len(LenFunc),
    Inquiry(InquiryFunc),
    RichCmp(RichCmpFunc),
    Hash(HashFunc),
    Call(CallFunc),
    GetAttr(GetAttrFunc),
    SetAttr(SetAttrFunc),
    DescrGet(DescrGetFunc),
    DescrSet(DescrSetFunc),
    Init(InitFunc),
    New(NewFunc),
    Send(SendFunc),
}

impl NativeFn {
    /// Raw address of the wrapped function, used for identity comparison.
    pub fn addr(&self) -> usize {
        match *self {
            NativeFn::Unary(f) => f as usize,
            NativeFn::Binary(f) => f as usize,
            NativeFn::Ternary(f) => f as usize,
            NativeFn::Len(f) => f as usize,
            NativeFn::Inquiry(f) => f as usize,
            NativeFn::RichCmp(f) => f as usize,
            NativeFn::Hash(f) => f as usize,
            NativeFn::Call(f) => f as usize,
            NativeFn::GetAttr(f) => f as usize,
            NativeFn::SetAttr(f) => f as usize,
            NativeFn::DescrGet(f) => f as usize,
            NativeFn::DescrSet(f) => f as usize,
            NativeFn::Init(f) => f as usize,
            NativeFn::New(f) => f as usize,
            NativeFn::Send(f) => f as usize,
        }
    }

    /// Discriminant index, used to compare call-signature shapes.
    pub fn shape(&self) -> u8 {
        match self {
            NativeFn::Unary(_) => 0,
            NativeFn::Binary(_) => 1,
            NativeFn::Ternary(_) => 2,
            NativeFn::Len(_) => 3,
            NativeFn::Inquiry(_) => 4,
            NativeFn::RichCmp(_) => 5,
            NativeFn::Hash(_) => 6,
            NativeFn::Call(_) => 7,
            NativeFn::GetAttr(_) => 8,
            NativeFn::SetAttr(_) => 9,
            NativeFn::DescrGet(_) => 10,
            NativeFn::DescrSet(_) => 11,
            NativeFn::Init(_) => 12,
            NativeFn::New(_) => 13,
            NativeFn::Send(_) => 14,
        }
    }
}

impl PartialEq for NativeFn {
    fn eq(&self, other: &Self) -> bool {
        self.shape() == other.shape() && self.addr() == other.addr()
    }
}

impl Eq for NativeFn {}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn(shape={}, addr={:#x})", self.shape(), self.addr())
    }
}

// =============================================================================
// Managed Callables
// =============================================================================

/// Hook invoked when a namespace entry is bound to a freshly built type:
/// receives the owning type id and the attribute name.
pub type BindHook =
    Arc<dyn Fn(&TypeRuntime, TypeId, &InternedString) -> Result<(), ObjectError> + Send + Sync>;

/// A managed (non-native) callable: a user-defined method body.
pub struct ManagedFn {
    name: InternedString,
    body: Box<dyn Fn(&TypeRuntime, &[Value]) -> Result<Value, ObjectError> + Send + Sync>,
    bind_hook: Option<BindHook>,
}

impl ManagedFn {
    /// Create a managed callable from a closure.
    pub fn new<F>(name: &str, body: F) -> Arc<Self>
    where
        F: Fn(&TypeRuntime, &[Value]) -> Result<Value, ObjectError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: pyrite_core::intern(name),
            body: Box::new(body),
            bind_hook: None,
        })
    }

    /// Create a managed callable with a name-binding hook; the hook runs
    /// during type creation, and its failure rolls the build back.
    pub fn with_bind_hook<F, H>(name: &str, body: F, hook: H) -> Arc<Self>
    where
        F: Fn(&TypeRuntime, &[Value]) -> Result<Value, ObjectError> + Send + Sync + 'static,
        H: Fn(&TypeRuntime, TypeId, &InternedString) -> Result<(), ObjectError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            name: pyrite_core::intern(name),
            body: Box::new(body),
            bind_hook: Some(Arc::new(hook)),
        })
    }

    /// The callable's name.
    #[inline]
    pub fn name(&self) -> &InternedString {
        &self.name
    }

    /// Invoke the callable.
    #[inline]
    pub fn call(&self, rt: &TypeRuntime, args: &[Value]) -> Result<Value, ObjectError> {
        (self.body)(rt, args)
    }

    /// The name-binding hook, if any.
    pub fn bind_hook(&self) -> Option<&BindHook> {
        self.bind_hook.as_ref()
    }
}

impl fmt::Debug for ManagedFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedFn({})", self.name)
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Native method descriptor: a fixed-convention function owned by a type.
pub struct MethodDescr {
    pub name: InternedString,
    pub owner: TypeId,
    pub func: NativeMethod,
}

impl fmt::Debug for MethodDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodDescr({} of type#{})", self.name, self.owner.raw())
    }
}

/// Member descriptor: fixed instance storage declared by the type.
///
/// Storage is keyed by name in the instance dictionary; `offset` records the
/// position inside the type's declared extra-slot area for layout sizing.
#[derive(Debug)]
pub struct MemberDescr {
    pub name: InternedString,
    pub owner: TypeId,
    pub offset: u32,
}

/// Property descriptor with optional getter and setter.
pub struct PropertyDescr {
    pub name: InternedString,
    pub getter: Option<Arc<ManagedFn>>,
    pub setter: Option<Arc<ManagedFn>>,
}

impl fmt::Debug for PropertyDescr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyDescr({})", self.name)
    }
}

/// Wrapper descriptor synthesized over a native slot function.
///
/// A wrapper records which slot it wraps, the native implementation, and the
/// type that owns the implementation; the slot table uses the triple to
/// decide whether a monomorphic native install is safe.
#[derive(Debug)]
pub struct SlotWrapperDescr {
    pub name: InternedString,
    pub slot: SlotId,
    pub func: NativeFn,
    pub owner: TypeId,
}

/// A callable bound to its receiver.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    pub callee: Value,
    pub recv: Value,
}

// =============================================================================
// Instances
// =============================================================================

/// A heap instance of a (usually heap) type.
///
/// The class pointer is lifetime-stable and mutable only through explicit
/// reclassing, which the runtime gates on layout compatibility.
#[derive(Debug)]
pub struct Instance {
    class: RwLock<Arc<TypeObject>>,
    dict: RwLock<FxHashMap<InternedString, Value>>,
}

impl Instance {
    /// Allocate an instance of `class` with an empty dictionary.
    pub fn new(class: Arc<TypeObject>) -> Arc<Self> {
        Arc::new(Self {
            class: RwLock::new(class),
            dict: RwLock::new(FxHashMap::default()),
        })
    }

    /// The instance's current class.
    #[inline]
    pub fn class(&self) -> Arc<TypeObject> {
        pyrite_core::obj::retain(&*self.class.read())
    }

    /// Replace the class pointer. Only the runtime calls this, after the
    /// layout compatibility check.
    pub(crate) fn set_class(&self, class: Arc<TypeObject>) {
        *self.class.write() = class;
    }

    /// Read an attribute from the instance dictionary.
    #[inline]
    pub fn get(&self, name: &InternedString) -> Option<Value> {
        self.dict.read().get(name).cloned()
    }

    /// Write an attribute into the instance dictionary.
    #[inline]
    pub fn set(&self, name: InternedString, value: Value) {
        self.dict.write().insert(name, value);
    }

    /// Remove an attribute, returning the previous value.
    #[inline]
    pub fn remove(&self, name: &InternedString) -> Option<Value> {
        self.dict.write().remove(name)
    }
}

// =============================================================================
// Value
// =============================================================================

/// A runtime value. Cloning is cheap; heap variants share via `Arc`.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(InternedString),
    Tuple(Arc<Vec<Value>>),
    /// A type object, referenced by id through the registry.
    Type(TypeId),
    Instance(Arc<Instance>),
    Function(Arc<ManagedFn>),
    Method(Arc<MethodDescr>),
    Member(Arc<MemberDescr>),
    Property(Arc<PropertyDescr>),
    SlotWrapper(Arc<SlotWrapperDescr>),
    Bound(Arc<BoundMethod>),
}

impl Value {
    /// Build a tuple value.
    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Arc::new(items))
    }

    /// Build an interned string value.
    pub fn str(text: &str) -> Value {
        Value::Str(pyrite_core::intern(text))
    }

    /// True if this value is a descriptor whose presence on a type shadows
    /// the instance dictionary (a "data" descriptor).
    pub fn is_data_descriptor(&self) -> bool {
        matches!(self, Value::Property(_) | Value::Member(_))
    }

    /// True if this value participates in descriptor binding on attribute
    /// access (methods bind their receiver).
    pub fn is_callable_descriptor(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Method(_) | Value::SlotWrapper(_)
        )
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Instance(a), Value::Instance(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Method(a), Value::Method(b)) => Arc::ptr_eq(a, b),
            (Value::Member(a), Value::Member(b)) => Arc::ptr_eq(a, b),
            (Value::Property(a), Value::Property(b)) => Arc::ptr_eq(a, b),
            (Value::SlotWrapper(a), Value::SlotWrapper(b)) => Arc::ptr_eq(a, b),
            (Value::Bound(a), Value::Bound(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s.as_str()),
            Value::Tuple(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Type(id) => write!(f, "<type#{}>", id.raw()),
            Value::Instance(inst) => write!(f, "<{} instance>", inst.class().name()),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Method(m) => write!(f, "<method {}>", m.name),
            Value::Member(m) => write!(f, "<member {}>", m.name),
            Value::Property(p) => write!(f, "<property {}>", p.name),
            Value::SlotWrapper(w) => write!(f, "<slot wrapper {}>", w.name),
            Value::Bound(b) => write!(f, "<bound {:?}>", b.callee),
        }
    }
}
