//! Hashing behind [`Key::of`](crate::Key::of). Both hashers start from fixed
//! keys, so equal values map to equal keys for the life of the process.

use std::hash::{Hash, Hasher};

#[cfg(feature = "std-hash")]
type KeyHasher = std::collections::hash_map::DefaultHasher;

#[cfg(not(feature = "std-hash"))]
type KeyHasher = ahash::AHasher;

/// Hash a single value into a 64-bit key.
#[inline]
pub(crate) fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = KeyHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
