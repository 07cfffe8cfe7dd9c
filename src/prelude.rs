//! Shared collection aliases.
//!
//! This module re-exports the FxHash-keyed map types used across the crate,
//! so the rest of the codebase has one import path for them.

// ═══════════════════════════════════════════════════════════════════════════════
// Hash maps
// ═══════════════════════════════════════════════════════════════════════════════

pub use rustc_hash::FxHashMap;

// ═══════════════════════════════════════════════════════════════════════════════
// Insertion-ordered maps (guest dicts, module and type namespaces)
// ═══════════════════════════════════════════════════════════════════════════════

pub type IndexMap<K, V> =
    indexmap::IndexMap<K, V, core::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Create an empty IndexMap
#[inline]
pub fn index_map_new<K, V>() -> IndexMap<K, V>
where
    K: core::hash::Hash + Eq,
{
    indexmap::IndexMap::with_hasher(Default::default())
}
