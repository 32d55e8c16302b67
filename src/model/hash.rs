use std::hash::{Hash, Hasher};

use twox_hash::XxHash64;

/// Structural 64-bit hash of a value.
///
/// Callers pass a view of the target which borrows only its semantic fields,
/// so identity and bookkeeping fields never change the fingerprint.
pub fn calc_hash<T: Hash + ?Sized>(view: &T) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    view.hash(&mut hasher);
    hasher.finish()
}
