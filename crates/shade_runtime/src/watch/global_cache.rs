//! Global-name caches.
//!
//! A global cache holds the current value of `name` as seen from a
//! `(globals, builtins)` pair. It watches `name` in globals and, while
//! globals lacks it, in builtins too. Every change to a watched key is
//! pushed into the cache, so a cached load never needs to consult either
//! dictionary. A cache whose value is `None` means "look the name up
//! normally". Anything the cache cannot track (lazy bindings, a builtins
//! dictionary that gains non-name keys, destruction of a watched
//! dictionary) disables it permanently.

use log::debug;
use shade_core::{FastHashMap, Name, fast_map_new};
use shade_ir::Opcode;
use slotmap::{SlotMap, new_key_type};

use super::dict_watch::DictKeyWatchRegistry;
use crate::core::{DictId, DictKey, Value};
use crate::errors::{AttrError, AttrResult, messages};
use crate::runtime::{CacheSite, Runtime};

new_key_type! {
    pub struct GlobalCacheId;
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GlobalCacheKey {
    pub builtins: DictId,
    pub globals: DictId,
    pub name: Name,
}

#[derive(Debug)]
pub struct GlobalCache {
    key: GlobalCacheKey,
    value: Option<Value>,
    /// Set once builtins is watched for `name`; never cleared.
    watching_builtins: bool,
    disabled: bool,
    /// Shadow-stream slots referencing this cache.
    users: u32,
}

impl GlobalCache {
    #[inline]
    pub fn key(&self) -> &GlobalCacheKey {
        &self.key
    }

    #[inline]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    #[inline]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    #[inline]
    pub fn watching_builtins(&self) -> bool {
        self.watching_builtins
    }
}

pub struct GlobalCacheManager {
    caches: SlotMap<GlobalCacheId, GlobalCache>,
    active: FastHashMap<GlobalCacheKey, GlobalCacheId>,
    pub(crate) watchers: DictKeyWatchRegistry,
}

impl GlobalCacheManager {
    pub fn new() -> Self {
        Self {
            caches: SlotMap::with_key(),
            active: fast_map_new(),
            watchers: DictKeyWatchRegistry::new(),
        }
    }

    #[inline]
    pub fn get(&self, id: GlobalCacheId) -> Option<&GlobalCache> {
        self.caches.get(id)
    }

    pub fn lookup(&self, key: &GlobalCacheKey) -> Option<GlobalCacheId> {
        self.active.get(key).copied()
    }

    /// The cached value, or `None` when the dictionaries must be consulted.
    #[inline]
    pub fn value(&self, id: GlobalCacheId) -> Option<Value> {
        self.caches.get(id)?.value.clone()
    }

    fn is_live(&self, id: GlobalCacheId) -> bool {
        self.caches.get(id).is_some_and(|c| !c.disabled)
    }

    fn create(&mut self, key: GlobalCacheKey) -> GlobalCacheId {
        let id = self.caches.insert(GlobalCache {
            key: key.clone(),
            value: None,
            watching_builtins: false,
            disabled: false,
            users: 0,
        });
        self.active.insert(key, id);
        id
    }

    fn set_value(&mut self, id: GlobalCacheId, value: Option<Value>) {
        if let Some(c) = self.caches.get_mut(id) {
            c.value = value;
        }
    }

    pub(crate) fn retain(&mut self, id: GlobalCacheId) {
        if let Some(c) = self.caches.get_mut(id) {
            c.users += 1;
        }
    }

    /// Number of caches currently serving lookups.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of caches still allocated, disabled ones included.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn watchers(&self) -> &DictKeyWatchRegistry {
        &self.watchers
    }
}

impl Default for GlobalCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw read with lazy bindings treated as absent.
fn plain_value(v: Option<Value>) -> Option<Value> {
    match v {
        Some(Value::Lazy(_)) => None,
        other => other,
    }
}

impl Runtime {
    pub fn global_caches(&self) -> &GlobalCacheManager {
        &self.globals
    }

    fn watch_dict_key(&mut self, dict: DictId, name: &Name, id: GlobalCacheId) {
        if self.globals.watchers.watch(dict, name, id) {
            if let Some(d) = self.heap.dicts.get_mut(dict) {
                d.watched = true;
            }
        }
    }

    fn unwatch_dict_key(&mut self, dict: DictId, name: &Name, id: GlobalCacheId) {
        if self.globals.watchers.unwatch(dict, name, id) {
            if let Some(d) = self.heap.dicts.get_mut(dict) {
                d.watched = false;
            }
        }
    }

    /// Returns the active cache for the triple, creating and filling one if
    /// needed. `None` if the dictionaries cannot be watched or the cache was
    /// disabled while being filled.
    pub fn find_global_cache(
        &mut self,
        builtins: DictId,
        globals: DictId,
        name: &Name,
    ) -> AttrResult<Option<GlobalCacheId>> {
        if !self.dict_is_watchable(globals) || !self.dict_is_watchable(builtins) {
            return Ok(None);
        }
        let key = GlobalCacheKey {
            builtins,
            globals,
            name: name.clone(),
        };
        if let Some(id) = self.globals.lookup(&key) {
            return Ok(Some(id));
        }
        let id = self.globals.create(key);
        if let Err(e) = self.init_global_cache(id) {
            self.disable_global_cache(id);
            return Err(e);
        }
        Ok(self.globals.is_live(id).then_some(id))
    }

    /// Fills a new cache. Keys are watched before they are read, so a
    /// callout that rebinds them has already updated the cache through its
    /// notification; a read whose dictionaries moved meanwhile is dropped.
    fn init_global_cache(&mut self, id: GlobalCacheId) -> AttrResult<()> {
        let key = match self.globals.get(id) {
            Some(c) => c.key.clone(),
            None => return Ok(()),
        };
        let dict_key = DictKey::Name(key.name.clone());
        self.watch_dict_key(key.globals, &key.name, id);
        let snapshot = self.dict_version(key.globals);
        let value = self.dict_get(key.globals, &dict_key)?;
        if !self.global_fill_current(id, &[(key.globals, snapshot)]) {
            return Ok(());
        }
        if value.is_some() {
            self.globals.set_value(id, value);
            return Ok(());
        }
        if key.builtins == key.globals || !self.dict_is_watchable(key.builtins) {
            return Ok(());
        }
        self.watch_dict_key(key.builtins, &key.name, id);
        if let Some(c) = self.globals.caches.get_mut(id) {
            c.watching_builtins = true;
        }
        let snapshots = [
            (key.globals, self.dict_version(key.globals)),
            (key.builtins, self.dict_version(key.builtins)),
        ];
        let value = self.dict_get(key.builtins, &dict_key)?;
        if self.global_fill_current(id, &snapshots) {
            self.globals.set_value(id, value);
        }
        Ok(())
    }

    /// True while the cache is live and none of the dictionaries changed
    /// since their version was taken. Otherwise counts a discarded fill.
    fn global_fill_current(&mut self, id: GlobalCacheId, snapshots: &[(DictId, Option<u64>)]) -> bool {
        let current = self.globals.is_live(id)
            && snapshots
                .iter()
                .all(|(dict, version)| self.dict_version(*dict) == *version);
        if !current {
            self.stats.discarded_fills += 1;
            debug!("global cache fill discarded");
        }
        current
    }

    /// Applies a change of `name` in `dict` to the cache. Returns true when
    /// the cache can no longer track the name and must be disabled.
    fn update_global_cache(&mut self, id: GlobalCacheId, dict: DictId, new_value: Option<Value>) -> bool {
        let key = match self.globals.get(id) {
            Some(c) if !c.disabled => c.key.clone(),
            _ => return false,
        };
        if matches!(new_value, Some(Value::Lazy(_))) {
            return true;
        }
        let dict_key = DictKey::Name(key.name.clone());
        if dict == key.globals {
            if new_value.is_none() && key.globals != key.builtins {
                if !self.dict_is_watchable(key.builtins) {
                    return true;
                }
                let fallback = plain_value(self.dict_get_raw(key.builtins, &dict_key));
                self.globals.set_value(id, fallback);
                if !self.globals.watchers.is_watched(key.builtins, &key.name, id) {
                    self.watch_dict_key(key.builtins, &key.name, id);
                    if let Some(c) = self.globals.caches.get_mut(id) {
                        c.watching_builtins = true;
                    }
                }
            } else {
                self.globals.set_value(id, new_value);
            }
        } else {
            debug_assert_eq!(dict, key.builtins);
            if self.dict_get_raw(key.globals, &dict_key).is_none() {
                self.globals.set_value(id, new_value);
            }
        }
        false
    }

    fn disable_global_caches(&mut self, ids: Vec<GlobalCacheId>) {
        for id in ids {
            self.disable_global_cache(id);
        }
    }

    /// Permanently disables a cache: clears its value, withdraws it from
    /// the active set and unsubscribes it from every dictionary.
    pub(crate) fn disable_global_cache(&mut self, id: GlobalCacheId) {
        let (key, unused) = match self.globals.caches.get_mut(id) {
            Some(c) if !c.disabled => {
                c.disabled = true;
                c.value = None;
                (c.key.clone(), c.users == 0)
            }
            _ => return,
        };
        if self.globals.active.get(&key) == Some(&id) {
            self.globals.active.remove(&key);
        }
        self.unwatch_dict_key(key.globals, &key.name, id);
        self.unwatch_dict_key(key.builtins, &key.name, id);
        if unused {
            self.globals.caches.remove(id);
        }
        self.stats.global_caches_disabled += 1;
        debug!("global cache for '{}' disabled", key.name);
    }

    /// Drops one shadow-stream reference; the last one frees the cache.
    pub(crate) fn release_global_cache(&mut self, id: GlobalCacheId) {
        let Some(c) = self.globals.caches.get_mut(id) else {
            return;
        };
        c.users = c.users.saturating_sub(1);
        if c.users > 0 {
            return;
        }
        if c.disabled {
            self.globals.caches.remove(id);
            return;
        }
        let key = c.key.clone();
        self.globals.active.remove(&key);
        self.unwatch_dict_key(key.globals, &key.name, id);
        self.unwatch_dict_key(key.builtins, &key.name, id);
        self.globals.caches.remove(id);
    }

    pub(crate) fn notify_dict_key(&mut self, dict: DictId, name: &Name, new_value: Option<Value>) {
        let mut to_disable = Vec::new();
        for id in self.globals.watchers.watchers_of(dict, name) {
            if self.update_global_cache(id, dict, new_value.clone()) {
                to_disable.push(id);
            }
        }
        self.disable_global_caches(to_disable);
    }

    pub(crate) fn notify_dict_clear(&mut self, dict: DictId) {
        let mut to_disable = Vec::new();
        for (_, ids) in self.globals.watchers.keys_of(dict) {
            for id in ids {
                if self.update_global_cache(id, dict, None) {
                    to_disable.push(id);
                }
            }
        }
        self.disable_global_caches(to_disable);
    }

    /// `dict` can no longer be watched: disable every cache depending on it.
    pub(crate) fn notify_dict_unwatch(&mut self, dict: DictId) {
        let keys = self.globals.watchers.remove_dict(dict);
        if let Some(d) = self.heap.dicts.get_mut(dict) {
            d.watched = false;
        }
        for (_, ids) in keys {
            self.disable_global_caches(ids);
        }
    }

    pub(crate) fn clear_global_caches(&mut self) {
        for dict in self.globals.watchers.dicts() {
            if self.dict_is_watched(dict) {
                self.notify_dict_unwatch(dict);
            }
        }
    }

    /// Loads global `name` at `site`, installing a global cache on first use.
    pub fn resolve_global(&mut self, site: CacheSite, name: &Name) -> AttrResult<Value> {
        let unit = self
            .units
            .get(site.unit)
            .ok_or(AttrError::StaleHandle(messages::STALE_UNIT))?;
        let (globals, builtins) = (unit.globals, unit.builtins);
        self.load_global_at(site, globals, builtins, name)
    }

    pub(crate) fn load_global_at(
        &mut self,
        site: CacheSite,
        globals: DictId,
        builtins: DictId,
        name: &Name,
    ) -> AttrResult<Value> {
        match self.site_instr(site) {
            Some((Opcode::LoadGlobalCached, slot)) => {
                let id = self
                    .units
                    .get(site.unit)
                    .and_then(|u| u.shadow.as_ref())
                    .and_then(|s| s.globals.get(slot as usize).copied().flatten());
                if let Some(v) = id.and_then(|id| self.globals.value(id)) {
                    self.stats.load_global.hits += 1;
                    return Ok(v);
                }
                self.stats.load_global.slight_misses += 1;
                self.load_global_generic(globals, builtins, name)
            }
            Some((Opcode::LoadGlobal, _)) => {
                let value = self.load_global_generic(globals, builtins, name)?;
                self.init_global_site(site, globals, builtins, name)?;
                Ok(value)
            }
            _ => self.load_global_generic(globals, builtins, name),
        }
    }

    fn init_global_site(&mut self, site: CacheSite, globals: DictId, builtins: DictId, name: &Name) -> AttrResult<()> {
        let Some(id) = self.find_global_cache(builtins, globals, name)? else {
            return Ok(());
        };
        let manager = &self.globals;
        let Some(shadow) = self
            .units
            .get_mut(site.unit)
            .and_then(|u| u.shadow.as_mut())
        else {
            return Ok(());
        };
        // The slot already holding the cache, else a free one, else one whose
        // cache for the same name was disabled.
        let held = shadow.globals.iter().position(|s| *s == Some(id));
        let Some(slot) = held.or_else(|| {
            shadow.globals.iter().position(|s| match s {
                None => true,
                Some(old) => manager
                    .get(*old)
                    .is_some_and(|c| c.disabled && c.key.name == *name),
            })
        }) else {
            return Ok(());
        };
        if held.is_none() {
            let replaced = shadow.globals[slot].replace(id);
            self.globals.retain(id);
            if let Some(old) = replaced {
                self.release_global_cache(old);
            }
        }
        if self.patch_site(site, Opcode::LoadGlobalCached, slot as u32) {
            self.stats.load_global.entries += 1;
        }
        Ok(())
    }
}
