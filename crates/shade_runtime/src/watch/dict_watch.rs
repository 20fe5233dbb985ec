//! Which global caches watch which `(dictionary, name)` pairs.

use std::collections::BTreeSet;

use shade_core::{FastHashMap, Name, fast_map_new};

use super::global_cache::GlobalCacheId;
use crate::core::DictId;

pub struct DictKeyWatchRegistry {
    watchers: FastHashMap<DictId, FastHashMap<Name, BTreeSet<GlobalCacheId>>>,
}

impl DictKeyWatchRegistry {
    pub fn new() -> Self {
        Self {
            watchers: fast_map_new(),
        }
    }

    pub fn is_watched(&self, dict: DictId, name: &Name, cache: GlobalCacheId) -> bool {
        self.watchers
            .get(&dict)
            .and_then(|keys| keys.get(name))
            .is_some_and(|set| set.contains(&cache))
    }

    /// Returns true if `dict` had no watched keys before this call.
    pub fn watch(&mut self, dict: DictId, name: &Name, cache: GlobalCacheId) -> bool {
        let first = !self.watchers.contains_key(&dict);
        self.watchers
            .entry(dict)
            .or_insert_with(fast_map_new)
            .entry(name.clone())
            .or_default()
            .insert(cache);
        first
    }

    /// Returns true if `dict` has no watched keys left. Unknown pairs are ignored.
    pub fn unwatch(&mut self, dict: DictId, name: &Name, cache: GlobalCacheId) -> bool {
        let Some(keys) = self.watchers.get_mut(&dict) else {
            return false;
        };
        if let Some(set) = keys.get_mut(name) {
            set.remove(&cache);
            if set.is_empty() {
                keys.remove(name);
            }
        }
        if keys.is_empty() {
            self.watchers.remove(&dict);
            return true;
        }
        false
    }

    pub fn watchers_of(&self, dict: DictId, name: &Name) -> Vec<GlobalCacheId> {
        self.watchers
            .get(&dict)
            .and_then(|keys| keys.get(name))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every watched key of `dict` with its watchers.
    pub fn keys_of(&self, dict: DictId) -> Vec<(Name, Vec<GlobalCacheId>)> {
        self.watchers
            .get(&dict)
            .map(|keys| {
                keys.iter()
                    .map(|(name, set)| (name.clone(), set.iter().copied().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn remove_dict(&mut self, dict: DictId) -> Vec<(Name, Vec<GlobalCacheId>)> {
        self.watchers
            .remove(&dict)
            .map(|keys| {
                keys.into_iter()
                    .map(|(name, set)| (name, set.into_iter().collect()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dicts(&self) -> Vec<DictId> {
        self.watchers.keys().copied().collect()
    }

    /// Number of watched dictionaries.
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

impl Default for DictKeyWatchRegistry {
    fn default() -> Self {
        Self::new()
    }
}
