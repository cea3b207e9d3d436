//! Opaque object-runtime shim.
//!
//! The type system consumes the host runtime's reference-counting discipline
//! through these three operations only; the actual discipline (deferred or
//! biased refcounting, etc.) is the host's concern. Here they are expressed
//! over `Arc`, which is what the in-process object model uses.

use std::sync::Arc;

/// Take a new strong reference to `obj`.
#[inline]
pub fn retain<T: ?Sized>(obj: &Arc<T>) -> Arc<T> {
    Arc::clone(obj)
}

/// Drop a strong reference to `obj`.
#[inline]
pub fn release<T: ?Sized>(obj: Arc<T>) {
    drop(obj);
}

/// True if `obj` is the only strong reference to its object.
///
/// Callers may use this to elide copy-on-write; a `false` answer is always
/// safe, a `true` answer is only meaningful while the caller holds `obj`.
#[inline]
pub fn is_uniquely_referenced<T: ?Sized>(obj: &Arc<T>) -> bool {
    Arc::strong_count(obj) == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_release_uniqueness() {
        let a = Arc::new(42u32);
        assert!(is_uniquely_referenced(&a));

        let b = retain(&a);
        assert!(!is_uniquely_referenced(&a));

        release(b);
        assert!(is_uniquely_referenced(&a));
    }
}
