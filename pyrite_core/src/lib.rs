//! Shared primitives for the pyrite runtime.
//!
//! This crate provides:
//! - Process-wide string interning (`intern`)
//! - The error taxonomy shared across the type system (`ObjectError`)
//! - The opaque object-runtime shim (`obj`): retain/release/uniqueness,
//!   consumed by the type system but owned by the host runtime

pub mod error;
pub mod intern;
pub mod obj;

pub use error::ObjectError;
pub use intern::{InternedString, intern};
