//! Dynamic type system core for a Python-like runtime.
//!
//! This crate provides:
//! - Type construction with metaclass and layout resolution (`object::builder`)
//! - C3 multiple-inheritance linearization (`object::mro`)
//! - Slot-based dynamic dispatch with two-directional wrapper synthesis
//!   (`object::slots`)
//! - A versioned, mostly-lock-free attribute cache (`object::cache`)
//! - The weak subclass graph driving invalidation (`object::subclass`)
//!
//! All entry points go through an explicit [`TypeRuntime`] context handle;
//! there are no ambient singletons besides the string interner.
//!
//! # Concurrency
//!
//! Mutation (namespace writes, bases reassignment, freezing) serializes on a
//! process-wide reentrant lock. Attribute lookups are lock-free on the cache
//! fast path; a miss takes the mutation lock to walk the MRO and assign
//! version tags.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod object;

pub use object::builder::{BaseSpec, BaseSubstitution, GetSetDef, MemberDef, MethodDef, TypeBuilder, TypeSpec};
pub use object::cache::{AttributeCache, CacheStats, ATTR_CACHE_UNUSED, MAX_VERSIONS_PER_CLASS};
pub use object::mro::compute_mro;
pub use object::runtime::{Builtins, TypeRuntime};
pub use object::slots::{CmpOp, SlotId, SlotState, TypeSlots};
pub use object::type_obj::{Layout, Mro, TypeFlags, TypeId, TypeObject};
pub use object::value::{Instance, ManagedFn, Value};
pub use object::watch::WatcherId;
