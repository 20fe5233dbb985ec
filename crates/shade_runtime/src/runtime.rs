//! The runtime: object heap, cache registries and compiled code units.
//!
//! Every mutation that can change what a cached lookup would return goes
//! through a method here so the matching notification is delivered:
//! - dictionary writes notify watched global caches
//! - writes to a type's namespace invalidate the type and its subclasses
//! - base, metaclass and destruction changes do the same

mod generic;
mod units;

use std::rc::Rc;

use log::debug;
use slotmap::SlotMap;

use crate::cache::EntryTable;
use crate::config::CacheConfig;
use crate::core::dict::SharedKeys;
use crate::core::{Dict, DictId, DictKey, Heap, Instance, InstanceDict, Layout, ObjectId, TypeId, TypeObject, TypeSpec, Value};
use crate::errors::{AttrError, AttrResult, messages};
use crate::stats::CacheStats;
use crate::watch::{GlobalCacheManager, TypeWatchRegistry};

pub use units::{CacheSite, CompiledUnit, UnitId};

pub struct Runtime {
    pub(crate) heap: Heap,
    pub(crate) entries: EntryTable,
    pub(crate) type_watch: TypeWatchRegistry,
    pub(crate) globals: GlobalCacheManager,
    pub(crate) units: SlotMap<UnitId, CompiledUnit>,
    pub(crate) config: CacheConfig,
    pub(crate) stats: CacheStats,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            heap: Heap::new(),
            entries: EntryTable::new(),
            type_watch: TypeWatchRegistry::new(config.type_invalidate_limit),
            globals: GlobalCacheManager::new(),
            units: SlotMap::with_key(),
            config,
            stats: CacheStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[inline]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn type_watch(&self) -> &TypeWatchRegistry {
        &self.type_watch
    }

    pub fn cache_entries(&self) -> &EntryTable {
        &self.entries
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Drops every shadow stream, cache entry and global cache. Units
    /// specialize again from scratch.
    pub fn clear_caches(&mut self) {
        debug!("clearing all attribute and global caches");
        self.reset_shadows();
        self.type_watch.clear(&mut self.entries);
        self.clear_global_caches();
    }

    // ---------------------------------------------------------------------
    // Dictionaries
    // ---------------------------------------------------------------------

    pub fn new_dict(&mut self) -> DictId {
        self.heap.dicts.insert(Dict::new())
    }

    #[inline]
    pub(crate) fn dict_ref(&self, dict: DictId) -> AttrResult<&Dict> {
        self.heap
            .dicts
            .get(dict)
            .ok_or(AttrError::StaleHandle(messages::STALE_DICT))
    }

    pub fn dict_is_watchable(&self, dict: DictId) -> bool {
        self.heap.dicts.get(dict).is_some_and(Dict::is_watchable)
    }

    pub fn dict_is_watched(&self, dict: DictId) -> bool {
        self.heap.dicts.get(dict).is_some_and(Dict::is_watched)
    }

    #[inline]
    pub(crate) fn dict_version(&self, dict: DictId) -> Option<u64> {
        self.heap.dicts.get(dict).map(Dict::version)
    }

    /// Raw read; lazy bindings are returned unresolved.
    pub fn dict_get_raw(&self, dict: DictId, key: &DictKey) -> Option<Value> {
        self.heap.dicts.get(dict)?.get(key).cloned()
    }

    pub fn dict_set(&mut self, dict: DictId, key: impl Into<DictKey>, value: Value) -> AttrResult<()> {
        let key = key.into();
        let d = self
            .heap
            .dicts
            .get_mut(dict)
            .ok_or(AttrError::StaleHandle(messages::STALE_DICT))?;
        let was_watchable = d.is_watchable();
        d.insert(key.clone(), value.clone());
        let watched = d.watched;
        let owner = d.owner;
        if watched {
            match &key {
                DictKey::Int(_) if was_watchable => self.notify_dict_unwatch(dict),
                DictKey::Name(name) => self.notify_dict_key(dict, name, Some(value)),
                DictKey::Int(_) => {}
            }
        }
        if let Some(owner) = owner {
            self.type_modified(owner);
        }
        Ok(())
    }

    /// Removes `key`; returns whether it was present.
    pub fn dict_del(&mut self, dict: DictId, key: impl Into<DictKey>) -> AttrResult<bool> {
        let key = key.into();
        let d = self
            .heap
            .dicts
            .get_mut(dict)
            .ok_or(AttrError::StaleHandle(messages::STALE_DICT))?;
        if d.remove(&key).is_none() {
            return Ok(false);
        }
        let watched = d.watched;
        let owner = d.owner;
        if watched {
            if let DictKey::Name(name) = &key {
                self.notify_dict_key(dict, name, None);
            }
        }
        if let Some(owner) = owner {
            self.type_modified(owner);
        }
        Ok(true)
    }

    pub fn dict_clear(&mut self, dict: DictId) -> AttrResult<()> {
        let d = self
            .heap
            .dicts
            .get_mut(dict)
            .ok_or(AttrError::StaleHandle(messages::STALE_DICT))?;
        d.clear();
        let watched = d.watched;
        let owner = d.owner;
        if watched {
            self.notify_dict_clear(dict);
        }
        if let Some(owner) = owner {
            self.type_modified(owner);
        }
        Ok(())
    }

    /// Frees a dictionary. Global caches watching it are disabled first.
    pub fn destroy_dict(&mut self, dict: DictId) {
        if self.dict_is_watched(dict) {
            self.notify_dict_unwatch(dict);
        }
        self.heap.dicts.remove(dict);
    }

    // ---------------------------------------------------------------------
    // Types
    // ---------------------------------------------------------------------

    pub fn new_type(&mut self, spec: TypeSpec) -> AttrResult<TypeId> {
        for base in &spec.bases {
            if !self.heap.types.contains_key(*base) {
                return Err(AttrError::StaleHandle(messages::STALE_TYPE));
            }
        }
        let dict = self.new_dict();
        for (name, value) in spec.attrs {
            if let Some(d) = self.heap.dicts.get_mut(dict) {
                d.insert(DictKey::Name(name), value);
            }
        }
        let inherited_slots = spec
            .bases
            .iter()
            .filter_map(|b| self.heap.types.get(*b))
            .map(|b| b.layout.slot_count)
            .max()
            .unwrap_or(0);
        let shared_keys = match spec.instance_dict {
            InstanceDict::Split => Some(Rc::new(SharedKeys::new(self.heap.next_keys_id()))),
            _ => None,
        };
        let layout = Layout {
            has_dict: spec.instance_dict != InstanceDict::None,
            shared_keys,
            slot_count: spec.slots.max(inherited_slots),
        };
        let version_tag = if spec.versioned {
            Some(self.heap.next_version_tag())
        } else {
            None
        };
        let ty = self.heap.types.insert(TypeObject {
            name: spec.name,
            bases: spec.bases.clone(),
            mro: Vec::new(),
            metaclass: spec.metaclass,
            dict,
            layout,
            version_tag,
            versioned: spec.versioned,
            subclasses: Vec::new(),
            getattr_hook: spec.getattr_hook,
            setattr_hook: spec.setattr_hook,
            no_shadowing_instances: true,
        });
        let mro = self.compute_mro(ty);
        if let Some(t) = self.heap.types.get_mut(ty) {
            t.mro = mro;
        }
        if let Some(d) = self.heap.dicts.get_mut(dict) {
            d.owner = Some(ty);
        }
        for base in spec.bases {
            if let Some(b) = self.heap.types.get_mut(base) {
                b.subclasses.push(ty);
            }
        }
        Ok(ty)
    }

    #[inline]
    pub(crate) fn type_ref(&self, ty: TypeId) -> AttrResult<&TypeObject> {
        self.heap
            .types
            .get(ty)
            .ok_or(AttrError::StaleHandle(messages::STALE_TYPE))
    }

    pub fn type_dict(&self, ty: TypeId) -> AttrResult<DictId> {
        Ok(self.type_ref(ty)?.dict)
    }

    pub fn set_type_attr(&mut self, ty: TypeId, name: &str, value: Value) -> AttrResult<()> {
        let dict = self.type_dict(ty)?;
        self.dict_set(dict, name, value)
    }

    pub fn del_type_attr(&mut self, ty: TypeId, name: &str) -> AttrResult<bool> {
        let dict = self.type_dict(ty)?;
        self.dict_del(dict, name)
    }

    /// Left-to-right, depth-first linearization with duplicates removed.
    fn compute_mro(&self, ty: TypeId) -> Vec<TypeId> {
        let mut mro = vec![ty];
        if let Some(t) = self.heap.types.get(ty) {
            for base in &t.bases {
                if let Some(b) = self.heap.types.get(*base) {
                    for id in &b.mro {
                        if !mro.contains(id) {
                            mro.push(*id);
                        }
                    }
                }
            }
        }
        mro
    }

    /// `ty` and every type that transitively inherits from it.
    fn type_and_subclasses(&self, ty: TypeId) -> Vec<TypeId> {
        let mut out = vec![ty];
        let mut i = 0;
        while i < out.len() {
            if let Some(t) = self.heap.types.get(out[i]) {
                for sub in &t.subclasses {
                    if !out.contains(sub) {
                        out.push(*sub);
                    }
                }
            }
            i += 1;
        }
        out
    }

    /// Notifies the cache layer that `ty` changed in a way that may alter
    /// attribute resolution. Subclasses are notified too.
    pub fn type_modified(&mut self, ty: TypeId) {
        for t in self.type_and_subclasses(ty) {
            let versioned = match self.heap.types.get(t) {
                Some(tobj) => tobj.versioned,
                None => continue,
            };
            let tag = versioned.then(|| self.heap.next_version_tag());
            if let Some(tobj) = self.heap.types.get_mut(t) {
                tobj.version_tag = tag;
            }
            if self
                .type_watch
                .type_modified(&mut self.entries, t, &mut self.stats)
            {
                debug!("invalidated caches for type {}", self.heap.type_name(t));
            }
        }
    }

    pub fn set_bases(&mut self, ty: TypeId, bases: Vec<TypeId>) -> AttrResult<()> {
        let old = self.type_ref(ty)?.bases.clone();
        for base in &bases {
            if !self.heap.types.contains_key(*base) {
                return Err(AttrError::StaleHandle(messages::STALE_TYPE));
            }
        }
        for base in old {
            if let Some(b) = self.heap.types.get_mut(base) {
                b.subclasses.retain(|s| *s != ty);
            }
        }
        for base in &bases {
            if let Some(b) = self.heap.types.get_mut(*base) {
                b.subclasses.push(ty);
            }
        }
        if let Some(t) = self.heap.types.get_mut(ty) {
            t.bases = bases;
        }
        for t in self.type_and_subclasses(ty) {
            let mro = self.compute_mro(t);
            if let Some(tobj) = self.heap.types.get_mut(t) {
                tobj.mro = mro;
            }
        }
        self.type_modified(ty);
        Ok(())
    }

    pub fn set_metaclass(&mut self, ty: TypeId, meta: Option<TypeId>) -> AttrResult<()> {
        if let Some(m) = meta {
            self.type_ref(m)?;
        }
        let t = self
            .heap
            .types
            .get_mut(ty)
            .ok_or(AttrError::StaleHandle(messages::STALE_TYPE))?;
        t.metaclass = meta;
        self.type_modified(ty);
        Ok(())
    }

    pub fn set_getattr_hook(&mut self, ty: TypeId, hook: Option<crate::core::GetAttrHook>) -> AttrResult<()> {
        let t = self
            .heap
            .types
            .get_mut(ty)
            .ok_or(AttrError::StaleHandle(messages::STALE_TYPE))?;
        t.getattr_hook = hook;
        self.type_modified(ty);
        Ok(())
    }

    /// Destroys a type. Its cache entries are invalidated and its identity
    /// is never reused.
    pub fn destroy_type(&mut self, ty: TypeId) -> AttrResult<()> {
        let (bases, dict) = {
            let t = self.type_ref(ty)?;
            (t.bases.clone(), t.dict)
        };
        let subclasses = self.type_and_subclasses(ty);
        for t in subclasses.iter().skip(1) {
            self.type_modified(*t);
        }
        self.type_watch
            .type_destroyed(&mut self.entries, ty, &mut self.stats);
        for base in bases {
            if let Some(b) = self.heap.types.get_mut(base) {
                b.subclasses.retain(|s| *s != ty);
            }
        }
        self.heap.types.remove(ty);
        self.destroy_dict(dict);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Instances
    // ---------------------------------------------------------------------

    pub fn new_object(&mut self, ty: TypeId) -> AttrResult<ObjectId> {
        let layout = self.type_ref(ty)?.layout.clone();
        let dict = if layout.has_dict {
            Some(match layout.shared_keys {
                Some(keys) => self.heap.dicts.insert(Dict::new_split(keys)),
                None => self.new_dict(),
            })
        } else {
            None
        };
        Ok(self.heap.objects.insert(Instance {
            ty,
            dict,
            slots: vec![None; layout.slot_count],
        }))
    }

    pub fn free_object(&mut self, obj: ObjectId) {
        if let Some(inst) = self.heap.objects.remove(obj) {
            if let Some(dict) = inst.dict {
                self.destroy_dict(dict);
            }
        }
    }

    pub fn type_of(&self, value: &Value) -> Option<TypeId> {
        match value {
            Value::Object(id) => self.heap.type_of(*id),
            _ => None,
        }
    }

    pub fn object_dict(&self, obj: ObjectId) -> Option<DictId> {
        self.heap.objects.get(obj)?.dict
    }

    pub(crate) fn instance_ref(&self, obj: ObjectId) -> AttrResult<&Instance> {
        self.heap
            .objects
            .get(obj)
            .ok_or(AttrError::StaleHandle(messages::STALE_OBJECT))
    }

    pub(crate) fn clear_no_shadowing(&mut self, ty: TypeId) {
        if let Some(t) = self.heap.types.get_mut(ty) {
            t.no_shadowing_instances = false;
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
