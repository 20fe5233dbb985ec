//! Per-type registry of live cache entries.
//!
//! A type has a record only while something is registered against it:
//! entries keyed by `(name, receiver)`, or entries of classes whose
//! metaclass it is. Modifying a type empties every such entry and drops
//! the record.

use log::debug;
use shade_core::{FastHashMap, FastHashSet, Name, fast_map_new, fast_set_new};

use crate::cache::{EntryId, EntryTable, Receiver};
use crate::core::TypeId;
use crate::stats::CacheStats;

struct TypeRecord {
    entries: FastHashMap<(Name, Receiver), EntryId>,
    /// Set when this type's class-receiver entries depend on a metaclass.
    metatype: Option<TypeId>,
    /// Class-receiver entries of types using this type as metaclass.
    type_insts: FastHashMap<TypeId, Vec<EntryId>>,
}

impl TypeRecord {
    fn new() -> Self {
        Self {
            entries: fast_map_new(),
            metatype: None,
            type_insts: fast_map_new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.type_insts.is_empty()
    }
}

pub struct TypeWatchRegistry {
    records: FastHashMap<TypeId, TypeRecord>,
    invalidations: FastHashMap<TypeId, u32>,
    disabled: FastHashSet<TypeId>,
    invalidate_limit: u32,
}

impl TypeWatchRegistry {
    pub fn new(invalidate_limit: u32) -> Self {
        Self {
            records: fast_map_new(),
            invalidations: fast_map_new(),
            disabled: fast_set_new(),
            invalidate_limit,
        }
    }

    pub fn lookup(&self, ty: TypeId, name: &Name, receiver: Receiver) -> Option<EntryId> {
        self.records
            .get(&ty)?
            .entries
            .get(&(name.clone(), receiver))
            .copied()
    }

    /// Types modified too often are never cached again.
    #[inline]
    pub fn is_disabled(&self, ty: TypeId) -> bool {
        self.disabled.contains(&ty)
    }

    pub fn is_watched(&self, ty: TypeId) -> bool {
        self.records.contains_key(&ty)
    }

    /// Number of types with a record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entry_count(&self, ty: TypeId) -> usize {
        self.records.get(&ty).map_or(0, |r| r.entries.len())
    }

    /// Registers `id` as the entry for `(ty, name, receiver)`, taking a
    /// reference. A previous entry for the same key is invalidated.
    pub(crate) fn register(
        &mut self,
        entries: &mut EntryTable,
        ty: TypeId,
        name: Name,
        receiver: Receiver,
        id: EntryId,
    ) {
        entries.incref(id);
        let record = self.records.entry(ty).or_insert_with(TypeRecord::new);
        if let Some(old) = record.entries.insert((name, receiver), id) {
            entries.invalidate(old);
            entries.decref(old);
        }
    }

    /// Records that class-receiver entry `id` of `ty` depends on `meta`.
    pub(crate) fn register_meta_relationship(
        &mut self,
        entries: &mut EntryTable,
        ty: TypeId,
        meta: TypeId,
        id: EntryId,
    ) {
        let record = self.records.entry(ty).or_insert_with(TypeRecord::new);
        if let Some(old_meta) = record.metatype.replace(meta) {
            if old_meta != meta {
                self.detach_from_meta(entries, ty, old_meta);
            }
        }
        entries.incref(id);
        self.records
            .entry(meta)
            .or_insert_with(TypeRecord::new)
            .type_insts
            .entry(ty)
            .or_default()
            .push(id);
    }

    /// Drops the references `meta` holds on entries of `ty`. Their validity
    /// is governed by `ty`'s own record.
    fn detach_from_meta(&mut self, entries: &mut EntryTable, ty: TypeId, meta: TypeId) {
        let Some(meta_record) = self.records.get_mut(&meta) else {
            return;
        };
        if let Some(ids) = meta_record.type_insts.remove(&ty) {
            for id in ids {
                entries.decref(id);
            }
        }
        if meta_record.is_empty() {
            self.records.remove(&meta);
        }
    }

    /// Removes the record of `ty`, emptying its entries. Types using `ty`
    /// as metaclass lose their whole record too.
    fn drop_record(&mut self, entries: &mut EntryTable, ty: TypeId) -> bool {
        let Some(record) = self.records.remove(&ty) else {
            return false;
        };
        for (_, id) in record.entries {
            entries.invalidate(id);
            entries.decref(id);
        }
        if let Some(meta) = record.metatype {
            self.detach_from_meta(entries, ty, meta);
        }
        for (inst, ids) in record.type_insts {
            for id in ids {
                entries.invalidate(id);
                entries.decref(id);
            }
            if let Some(r) = self.records.get_mut(&inst) {
                if r.metatype == Some(ty) {
                    r.metatype = None;
                }
            }
            self.drop_record(entries, inst);
        }
        true
    }

    /// Invalidates everything cached for `ty`, including class-receiver
    /// entries of types whose metaclass is `ty`. Returns whether anything
    /// was registered.
    pub(crate) fn type_modified(&mut self, entries: &mut EntryTable, ty: TypeId, stats: &mut CacheStats) -> bool {
        if !self.drop_record(entries, ty) {
            return false;
        }
        stats.type_invalidations += 1;
        let count = self.invalidations.entry(ty).or_insert(0);
        *count += 1;
        if *count > self.invalidate_limit && self.disabled.insert(ty) {
            debug!("type {ty:?} modified {count} times, caching disabled");
        }
        true
    }

    /// Like [`type_modified`](Self::type_modified), and forgets the type.
    pub(crate) fn type_destroyed(&mut self, entries: &mut EntryTable, ty: TypeId, stats: &mut CacheStats) {
        if self.drop_record(entries, ty) {
            stats.type_invalidations += 1;
        }
        self.invalidations.remove(&ty);
        self.disabled.remove(&ty);
    }

    pub(crate) fn clear(&mut self, entries: &mut EntryTable) {
        let types: Vec<TypeId> = self.records.keys().copied().collect();
        for ty in types {
            self.drop_record(entries, ty);
        }
        self.invalidations.clear();
        self.disabled.clear();
    }
}
