//! Dictionaries.
//!
//! A dictionary is either combined (its own ordered key/value table) or
//! split: keys live in a [`SharedKeys`] table owned by a type and every
//! instance dictionary stores only a value vector indexed by key position.
//! Shared key tables are append-only, so a key's index never changes once
//! assigned. Inserting a non-name key, or exceeding the shared key limit,
//! converts the dictionary to combined form.

use std::cell::RefCell;
use std::fmt;

use ahash::RandomState;
use indexmap::{IndexMap, IndexSet};
use shade_core::{Name, fast_hasher};

use super::heap::TypeId;
use super::value::Value;

pub const SHARED_KEYS_LIMIT: usize = 30;

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Name(Name),
    Int(i64),
}

impl DictKey {
    #[inline]
    pub fn as_name(&self) -> Option<&Name> {
        match self {
            DictKey::Name(n) => Some(n),
            DictKey::Int(_) => None,
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        DictKey::Name(Name::new(s))
    }
}

impl From<Name> for DictKey {
    fn from(n: Name) -> Self {
        DictKey::Name(n)
    }
}

impl From<&Name> for DictKey {
    fn from(n: &Name) -> Self {
        DictKey::Name(n.clone())
    }
}

impl From<i64> for DictKey {
    fn from(i: i64) -> Self {
        DictKey::Int(i)
    }
}

impl fmt::Debug for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Name(n) => write!(f, "{n:?}"),
            DictKey::Int(i) => write!(f, "{i}"),
        }
    }
}

pub struct SharedKeys {
    id: u64,
    keys: RefCell<IndexSet<Name, RandomState>>,
}

impl SharedKeys {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            keys: RefCell::new(IndexSet::with_hasher(fast_hasher())),
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn index_of(&self, name: &Name) -> Option<usize> {
        self.keys.borrow().get_index_of(name)
    }

    pub fn len(&self) -> usize {
        self.keys.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.borrow().is_empty()
    }

    fn intern(&self, name: &Name) -> Option<usize> {
        let mut keys = self.keys.borrow_mut();
        if let Some(i) = keys.get_index_of(name) {
            return Some(i);
        }
        if keys.len() >= SHARED_KEYS_LIMIT {
            return None;
        }
        keys.insert(name.clone());
        Some(keys.len() - 1)
    }

    fn key_at(&self, index: usize) -> Option<Name> {
        self.keys.borrow().get_index(index).cloned()
    }
}

pub(crate) enum Storage {
    Combined(IndexMap<DictKey, Value, RandomState>),
    Split {
        keys: std::rc::Rc<SharedKeys>,
        values: Vec<Option<Value>>,
    },
}

pub struct Dict {
    pub(crate) storage: Storage,
    /// Bumped on every mutation.
    pub(crate) version: u64,
    /// Set while at least one key of this dictionary is watched.
    pub(crate) watched: bool,
    /// Sticky: set once a non-name key was inserted.
    pub(crate) has_non_name_keys: bool,
    /// Type whose namespace this dictionary is.
    pub(crate) owner: Option<TypeId>,
}

impl Dict {
    pub fn new() -> Self {
        Self {
            storage: Storage::Combined(IndexMap::with_hasher(fast_hasher())),
            version: 0,
            watched: false,
            has_non_name_keys: false,
            owner: None,
        }
    }

    pub fn new_split(keys: std::rc::Rc<SharedKeys>) -> Self {
        Self {
            storage: Storage::Split {
                keys,
                values: Vec::new(),
            },
            ..Self::new()
        }
    }

    /// True while only name keys were ever stored.
    #[inline]
    pub fn is_watchable(&self) -> bool {
        !self.has_non_name_keys
    }

    #[inline]
    pub fn is_watched(&self) -> bool {
        self.watched
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, key: &DictKey) -> Option<&Value> {
        match &self.storage {
            Storage::Combined(map) => map.get(key),
            Storage::Split { keys, values } => {
                let name = key.as_name()?;
                let i = keys.index_of(name)?;
                values.get(i)?.as_ref()
            }
        }
    }

    pub fn contains(&self, key: &DictKey) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: DictKey, value: Value) -> Option<Value> {
        self.version += 1;
        if matches!(key, DictKey::Int(_)) {
            self.has_non_name_keys = true;
        }
        if let Storage::Split { keys, values } = &mut self.storage {
            if let Some(i) = key.as_name().and_then(|n| keys.intern(n)) {
                if values.len() <= i {
                    values.resize(i + 1, None);
                }
                return values[i].replace(value);
            }
            self.make_combined();
        }
        match &mut self.storage {
            Storage::Combined(map) => map.insert(key, value),
            Storage::Split { .. } => None,
        }
    }

    pub fn remove(&mut self, key: &DictKey) -> Option<Value> {
        let old = match &mut self.storage {
            Storage::Combined(map) => map.shift_remove(key),
            Storage::Split { keys, values } => {
                let i = key.as_name().and_then(|n| keys.index_of(n));
                i.and_then(|i| values.get_mut(i)).and_then(Option::take)
            }
        };
        if old.is_some() {
            self.version += 1;
        }
        old
    }

    /// Removes every item and returns the keys that were present.
    pub fn clear(&mut self) -> Vec<DictKey> {
        self.version += 1;
        let keys = self.keys();
        match &mut self.storage {
            Storage::Combined(map) => map.clear(),
            Storage::Split { values, .. } => values.clear(),
        }
        keys
    }

    pub fn keys(&self) -> Vec<DictKey> {
        match &self.storage {
            Storage::Combined(map) => map.keys().cloned().collect(),
            Storage::Split { keys, values } => values
                .iter()
                .enumerate()
                .filter(|(_, v)| v.is_some())
                .filter_map(|(i, _)| keys.key_at(i).map(DictKey::Name))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.storage {
            Storage::Combined(map) => map.len(),
            Storage::Split { values, .. } => values.iter().filter(|v| v.is_some()).count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the shared key table while the dictionary is split.
    #[inline]
    pub fn split_keys_id(&self) -> Option<u64> {
        match &self.storage {
            Storage::Split { keys, .. } => Some(keys.id()),
            Storage::Combined(_) => None,
        }
    }

    /// Value at a shared key index; only meaningful for split dictionaries.
    #[inline]
    pub fn split_value(&self, index: usize) -> Option<&Value> {
        match &self.storage {
            Storage::Split { values, .. } => values.get(index)?.as_ref(),
            Storage::Combined(_) => None,
        }
    }

    pub fn split_index(&self, name: &Name) -> Option<usize> {
        match &self.storage {
            Storage::Split { keys, .. } => keys.index_of(name),
            Storage::Combined(_) => None,
        }
    }

    fn make_combined(&mut self) {
        let Storage::Split { keys, values } = &mut self.storage else {
            return;
        };
        let mut map = IndexMap::with_capacity_and_hasher(values.len(), fast_hasher());
        for (i, v) in values.drain(..).enumerate() {
            if let (Some(v), Some(name)) = (v, keys.key_at(i)) {
                map.insert(DictKey::Name(name), v);
            }
        }
        self.storage = Storage::Combined(map);
    }
}

impl Default for Dict {
    fn default() -> Self {
        Self::new()
    }
}
