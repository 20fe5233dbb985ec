//! Core types shared by the shade crates.
//!
//! This crate contains the building blocks that do not depend on the runtime:
//! - `Name` - Shared attribute/global name with a precomputed hash
//! - `FastHashMap` / `FastHashSet` - Deterministically seeded hash containers

pub mod name;

pub use name::Name;

use ahash::RandomState;
use hashbrown::{HashMap, HashSet};
use std::hash::Hash;

pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;
pub type FastHashSet<K> = HashSet<K, RandomState>;

pub fn fast_hasher() -> RandomState {
    RandomState::with_seeds(0, 0, 0, 0)
}

pub fn fast_map_new<K: Eq + Hash, V>() -> FastHashMap<K, V> {
    HashMap::with_hasher(fast_hasher())
}

pub fn fast_set_new<K: Eq + Hash>() -> FastHashSet<K> {
    HashSet::with_hasher(fast_hasher())
}
