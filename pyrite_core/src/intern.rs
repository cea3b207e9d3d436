//! Process-wide string interning.
//!
//! Attribute and special-method names are interned once and compared by
//! pointer afterwards. The intern table is append-only for the lifetime of
//! the process: entries are never removed, so an `InternedString` handle is
//! always valid and its cached hash never changes.

use dashmap::DashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};

/// An interned, immutable string with a precomputed hash.
///
/// Two `InternedString`s produced by [`intern`] are pointer-equal iff their
/// contents are equal, which makes equality and hashing O(1).
#[derive(Clone)]
pub struct InternedString(Arc<Entry>);

struct Entry {
    text: Box<str>,
    hash: u64,
}

impl InternedString {
    /// The string contents.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0.text
    }

    /// The precomputed FNV-1a hash of the contents.
    #[inline]
    pub fn hash_value(&self) -> u64 {
        self.0.hash
    }

    /// Fast pointer identity check.
    #[inline]
    pub fn ptr_eq(a: &InternedString, b: &InternedString) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl Deref for InternedString {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq for InternedString {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other) || self.as_str() == other.as_str()
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.0.hash);
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FNV-1a, 64-bit. Stable across runs; used as the cache hash key.
fn fnv1a(text: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in text.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Global intern table.
static TABLE: OnceLock<DashMap<Box<str>, InternedString>> = OnceLock::new();

fn table() -> &'static DashMap<Box<str>, InternedString> {
    TABLE.get_or_init(DashMap::new)
}

/// Intern a string, returning the canonical handle for its contents.
pub fn intern(text: &str) -> InternedString {
    if let Some(existing) = table().get(text) {
        return existing.clone();
    }
    let entry = InternedString(Arc::new(Entry {
        text: text.into(),
        hash: fnv1a(text),
    }));
    // Racing interners may both miss; entry() keeps the first insertion.
    table()
        .entry(text.into())
        .or_insert(entry)
        .value()
        .clone()
}
