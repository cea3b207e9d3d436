//! The object model: types, values, dispatch, and the caches that keep
//! lookup fast under live mutation.
//!
//! Component map (leaf-first):
//! - [`value`] — tagged runtime values and descriptor objects
//! - [`type_obj`] — `TypeObject` itself: name, bases, MRO, namespace,
//!   version tag, flags, layout, slot table
//! - [`registry`] — id-keyed liveness table mapping `TypeId` to types
//! - [`subclass`] — weak parent→children index
//! - [`mutation`] — the process-wide reentrant type-mutation lock
//! - [`mro`] — C3 linearization
//! - [`cache`] — versioned attribute cache with seqlock-validated entries
//! - [`slots`] — slotdef registry, dispatch synthesis, typed entry points
//! - [`watch`] — type watchers
//! - [`builder`] — type creation and transactional rebasing
//! - [`runtime`] — the `TypeRuntime` context handle tying it all together

pub mod builder;
pub mod cache;
pub mod mro;
pub mod mutation;
pub mod registry;
pub mod runtime;
pub mod slots;
pub mod subclass;
pub mod type_obj;
pub mod value;
pub mod watch;
