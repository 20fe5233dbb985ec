//! Per-site specialization.
//!
//! A site starts as its generic opcode. The first execution classifies the
//! receiver and rewrites the site to the matching specialized opcode. A
//! later receiver of another type either moves a load site to the
//! polymorphic form (up to `polymorphic_cap` types, never evicting) or
//! refills it. Each miss counts against the unit; past `churn_threshold`
//! missing sites are rewritten to their uncachable form for good.

use log::{debug, trace};
use shade_core::Name;
use shade_ir::{OpFamily, Opcode};
use smallvec::smallvec;

use super::classify::Fill;
use super::entry::EntryId;
use crate::core::Value;
use crate::errors::AttrResult;
use crate::runtime::{CacheSite, Runtime, UnitId};
use crate::shadow::{L1Slot, PolyCache};
use crate::stats::OpcodeStats;

fn uncachable_form(op: Opcode) -> Opcode {
    match op.family() {
        Some(OpFamily::StoreAttr) => Opcode::StoreAttrUncachable,
        Some(OpFamily::LoadMethod) => Opcode::LoadMethodUncachable,
        _ => Opcode::LoadAttrUncachable,
    }
}

impl Runtime {
    pub(crate) fn family_stats(&mut self, family: OpFamily) -> &mut OpcodeStats {
        match family {
            OpFamily::LoadAttr => &mut self.stats.load_attr,
            OpFamily::StoreAttr => &mut self.stats.store_attr,
            OpFamily::LoadMethod => &mut self.stats.load_method,
            OpFamily::LoadGlobal => &mut self.stats.load_global,
        }
    }

    /// Current opcode and argument at a site, if the unit has a shadow stream.
    pub fn site_instr(&self, site: CacheSite) -> Option<(Opcode, u32)> {
        self.units
            .get(site.unit)?
            .shadow
            .as_ref()?
            .instr_at(site.offset)
    }

    pub fn site_opcode(&self, site: CacheSite) -> Option<Opcode> {
        self.site_instr(site).map(|(op, _)| op)
    }

    fn l1_entry(&self, unit: UnitId, slot: u32) -> Option<EntryId> {
        let shadow = self.units.get(unit)?.shadow.as_ref()?;
        shadow.l1.get(slot as usize).map(|s| s.entry)
    }

    fn poly_cache(&self, unit: UnitId, index: u32) -> Option<PolyCache> {
        let shadow = self.units.get(unit)?.shadow.as_ref()?;
        shadow.polymorphic.get(index as usize).cloned()
    }

    /// Counts a miss against the unit; true once the unit is past the threshold.
    fn bump_churn(&mut self, unit: UnitId) -> bool {
        let threshold = self.config.churn_threshold;
        match self.units.get_mut(unit).and_then(|u| u.shadow.as_mut()) {
            Some(shadow) => {
                shadow.update_count += 1;
                shadow.update_count > threshold
            }
            None => false,
        }
    }

    /// Rewrites the instruction at `site`, releasing whatever the old
    /// instruction referenced. Fails when the new form does not fit.
    pub(crate) fn patch_site(&mut self, site: CacheSite, op: Opcode, arg: u32) -> bool {
        let Some(shadow) = self
            .units
            .get_mut(site.unit)
            .and_then(|u| u.shadow.as_mut())
        else {
            return false;
        };
        let Some((old_op, old_arg)) = shadow.rewrite(site.offset, op, arg) else {
            debug!("{op:?} {arg} does not fit at offset {}", site.offset);
            return false;
        };
        trace!("offset {}: {old_op:?} {old_arg} -> {op:?} {arg}", site.offset);
        self.release_instr_ref(site.unit, old_op, old_arg);
        true
    }

    pub(crate) fn release_instr_ref(&mut self, unit: UnitId, op: Opcode, arg: u32) {
        if op.is_cache_opcode() {
            self.release_l1(unit, arg as usize);
        } else if op == Opcode::LoadAttrPolymorphic {
            self.release_poly(unit, arg as usize);
        }
    }

    fn release_l1(&mut self, unit: UnitId, slot: usize) {
        let Some(shadow) = self.units.get_mut(unit).and_then(|u| u.shadow.as_mut()) else {
            return;
        };
        let Some(s) = shadow.l1.get_mut(slot) else {
            return;
        };
        let entry = s.entry;
        s.uses -= 1;
        if s.uses == 0 {
            shadow.l1.take(slot);
        }
        self.entries.decref(entry);
    }

    fn release_poly(&mut self, unit: UnitId, index: usize) {
        let Some(cache) = self
            .units
            .get_mut(unit)
            .and_then(|u| u.shadow.as_mut())
            .and_then(|s| s.polymorphic.take(index))
        else {
            return;
        };
        for id in cache.into_iter().flatten() {
            self.entries.decref(id);
        }
    }

    /// Points the site at `id` through the unit's entry table, or marks the
    /// site uncachable when the table is full.
    pub(crate) fn patch_or_miss(&mut self, site: CacheSite, id: EntryId, op: Opcode) -> bool {
        let slot = {
            let Some(shadow) = self
                .units
                .get_mut(site.unit)
                .and_then(|u| u.shadow.as_mut())
            else {
                return false;
            };
            let slot = match shadow.l1.position(|s| s.entry == id) {
                Some(i) => Some(i),
                None => shadow.l1.add(L1Slot { entry: id, uses: 0 }),
            };
            if let Some(s) = slot.and_then(|i| shadow.l1.get_mut(i)) {
                s.uses += 1;
            }
            slot
        };
        let Some(slot) = slot else {
            self.stats.uncacheable.table_full += 1;
            self.attr_miss(site, uncachable_form(op));
            return false;
        };
        self.entries.incref(id);
        if !self.patch_site(site, op, slot as u32) {
            self.release_l1(site.unit, slot);
            return false;
        }
        if let Some(family) = op.family() {
            self.family_stats(family).entries += 1;
        }
        true
    }

    /// Rewrites the site to its uncachable form.
    pub(crate) fn attr_miss(&mut self, site: CacheSite, op: Opcode) {
        if let Some(family) = op.family() {
            self.family_stats(family).misses += 1;
        }
        debug!("site {:?}@{} is uncachable", site.unit, site.offset);
        self.patch_site(site, op, 0);
    }

    // ---------------------------------------------------------------------
    // Loads
    // ---------------------------------------------------------------------

    /// Resolves `obj.name` at `site`, specializing the site as it goes.
    pub fn resolve_attribute(&mut self, site: CacheSite, obj: &Value, name: &Name) -> AttrResult<Value> {
        let Some((op, arg)) = self.site_instr(site) else {
            return self.get_attr(obj, name);
        };
        match op {
            Opcode::LoadAttr => self.load_attr_with_cache(site, obj, name),
            Opcode::LoadAttrPolymorphic => self.load_attr_polymorphic(site, arg, obj, name),
            Opcode::LoadAttrUncachable => {
                self.stats.load_attr.uncacheable += 1;
                self.get_attr(obj, name)
            }
            Opcode::LoadAttrType => {
                let id = self.l1_entry(site.unit, arg);
                if let (Value::Type(t), Some(id)) = (obj, id) {
                    if self.entries.matches(id, *t) {
                        self.stats.load_attr.hits += 1;
                        return self.entry_class_value(id);
                    }
                }
                self.load_attr_miss(site, op, id, obj, name)
            }
            op if op.is_cache_opcode() && op.family() == Some(OpFamily::LoadAttr) => {
                let id = self.l1_entry(site.unit, arg);
                if let (Value::Object(o), Some(id)) = (obj, id) {
                    if self
                        .heap
                        .type_of(*o)
                        .is_some_and(|ty| self.entries.matches(id, ty))
                    {
                        self.stats.load_attr.hits += 1;
                        return self.entry_load(id, *o);
                    }
                }
                self.load_attr_miss(site, op, id, obj, name)
            }
            _ => self.get_attr(obj, name),
        }
    }

    fn load_attr_miss(
        &mut self,
        site: CacheSite,
        op: Opcode,
        id: Option<EntryId>,
        obj: &Value,
        name: &Name,
    ) -> AttrResult<Value> {
        self.stats.load_attr.slight_misses += 1;
        if self.bump_churn(site.unit) {
            self.stats.uncacheable.churn += 1;
            self.attr_miss(site, Opcode::LoadAttrUncachable);
            return self.get_attr(obj, name);
        }
        let seed = id.filter(|id| self.entries.get(*id).is_some_and(|e| e.is_valid()));
        if let (Some(seed), Value::Object(o)) = (seed, obj) {
            let ty = self.instance_ref(*o)?.ty;
            if !self.type_ref(ty)?.uses_generic_getattr() {
                return self.get_attr(obj, name);
            }
            if op != Opcode::LoadAttrType && self.config.polymorphic_cap > 1 {
                return self.switch_to_polymorphic(site, seed, obj, name);
            }
        }
        self.load_attr_with_cache(site, obj, name)
    }

    fn load_attr_with_cache(&mut self, site: CacheSite, obj: &Value, name: &Name) -> AttrResult<Value> {
        match obj {
            Value::Object(o) => {
                let ty = self.instance_ref(*o)?.ty;
                if !self.type_ref(ty)?.uses_generic_getattr() {
                    self.stats.uncacheable.custom_getattr += 1;
                    self.attr_miss(site, Opcode::LoadAttrUncachable);
                    return self.get_attr(obj, name);
                }
                match self.fill_instance_entry(ty, name)? {
                    Fill::Entry(id) => {
                        let op = self.entries.get(id).map(|e| e.kind.load_opcode());
                        if let Some(op) = op {
                            self.patch_or_miss(site, id, op);
                        }
                        self.entry_load(id, *o)
                    }
                    Fill::Uncacheable => {
                        self.attr_miss(site, Opcode::LoadAttrUncachable);
                        self.get_attr(obj, name)
                    }
                    Fill::Discarded => self.get_attr(obj, name),
                }
            }
            Value::Type(t) => match self.fill_class_entry(*t, name)? {
                Fill::Entry(id) => {
                    self.patch_or_miss(site, id, Opcode::LoadAttrType);
                    self.entry_class_value(id)
                }
                Fill::Uncacheable => {
                    self.attr_miss(site, Opcode::LoadAttrUncachable);
                    self.get_attr(obj, name)
                }
                Fill::Discarded => self.get_attr(obj, name),
            },
            _ => {
                self.attr_miss(site, Opcode::LoadAttrUncachable);
                self.get_attr(obj, name)
            }
        }
    }

    fn switch_to_polymorphic(&mut self, site: CacheSite, seed: EntryId, obj: &Value, name: &Name) -> AttrResult<Value> {
        let cap = self.config.polymorphic_cap;
        let index = {
            let Some(shadow) = self
                .units
                .get_mut(site.unit)
                .and_then(|u| u.shadow.as_mut())
            else {
                return self.get_attr(obj, name);
            };
            let mut cache: PolyCache = smallvec![None; cap];
            cache[0] = Some(seed);
            shadow.polymorphic.add(cache)
        };
        let Some(index) = index else {
            self.stats.uncacheable.table_full += 1;
            self.attr_miss(site, Opcode::LoadAttrUncachable);
            return self.get_attr(obj, name);
        };
        self.entries.incref(seed);
        if !self.patch_site(site, Opcode::LoadAttrPolymorphic, index as u32) {
            self.release_poly(site.unit, index);
            return self.get_attr(obj, name);
        }
        debug!("site {:?}@{} is now polymorphic", site.unit, site.offset);
        self.load_attr_polymorphic(site, index as u32, obj, name)
    }

    fn load_attr_polymorphic(&mut self, site: CacheSite, index: u32, obj: &Value, name: &Name) -> AttrResult<Value> {
        let Value::Object(o) = obj else {
            return self.get_attr(obj, name);
        };
        let ty = self.instance_ref(*o)?.ty;
        let Some(cache) = self.poly_cache(site.unit, index) else {
            return self.get_attr(obj, name);
        };
        if let Some(id) = cache
            .iter()
            .flatten()
            .copied()
            .find(|id| self.entries.matches(*id, ty))
        {
            self.stats.load_attr.hits += 1;
            return self.entry_load(id, *o);
        }
        self.stats.load_attr.slight_misses += 1;
        if !self.type_ref(ty)?.uses_generic_getattr() {
            return self.get_attr(obj, name);
        }
        if self.free_poly_slot(&cache).is_none() {
            self.stats.uncacheable.polymorphic_full += 1;
            return self.get_attr(obj, name);
        }
        match self.fill_instance_entry(ty, name)? {
            Fill::Entry(id) => {
                self.poly_store(site.unit, index, id);
                self.entry_load(id, *o)
            }
            Fill::Uncacheable | Fill::Discarded => self.get_attr(obj, name),
        }
    }

    /// First slot that is empty or holds an invalidated entry.
    fn free_poly_slot(&self, cache: &PolyCache) -> Option<usize> {
        cache.iter().position(|slot| match slot {
            None => true,
            Some(id) => !self.entries.get(*id).is_some_and(|e| e.is_valid()),
        })
    }

    fn poly_store(&mut self, unit: UnitId, index: u32, id: EntryId) {
        let Some(cache) = self.poly_cache(unit, index) else {
            return;
        };
        let Some(pos) = self.free_poly_slot(&cache) else {
            return;
        };
        let Some(slots) = self
            .units
            .get_mut(unit)
            .and_then(|u| u.shadow.as_mut())
            .and_then(|s| s.polymorphic.get_mut(index as usize))
        else {
            return;
        };
        let old = slots[pos].replace(id);
        self.entries.incref(id);
        self.stats.load_attr.entries += 1;
        if let Some(old) = old {
            self.entries.decref(old);
        }
    }

    // ---------------------------------------------------------------------
    // Stores
    // ---------------------------------------------------------------------

    /// Performs `obj.name = value` at `site`.
    pub fn store_attribute(&mut self, site: CacheSite, obj: &Value, name: &Name, value: Value) -> AttrResult<()> {
        let Some((op, arg)) = self.site_instr(site) else {
            return self.set_attr(obj, name, value);
        };
        match op {
            Opcode::StoreAttr => self.store_attr_with_cache(site, obj, name, value),
            Opcode::StoreAttrUncachable => {
                self.stats.store_attr.uncacheable += 1;
                self.set_attr(obj, name, value)
            }
            op if op.is_cache_opcode() && op.family() == Some(OpFamily::StoreAttr) => {
                let id = self.l1_entry(site.unit, arg);
                if let (Value::Object(o), Some(id)) = (obj, id) {
                    if self
                        .heap
                        .type_of(*o)
                        .is_some_and(|ty| self.entries.matches(id, ty))
                    {
                        self.stats.store_attr.hits += 1;
                        return self.entry_store(id, *o, value);
                    }
                }
                self.stats.store_attr.slight_misses += 1;
                if self.bump_churn(site.unit) {
                    self.stats.uncacheable.churn += 1;
                    self.attr_miss(site, Opcode::StoreAttrUncachable);
                    return self.set_attr(obj, name, value);
                }
                self.store_attr_with_cache(site, obj, name, value)
            }
            _ => self.set_attr(obj, name, value),
        }
    }

    fn store_attr_with_cache(&mut self, site: CacheSite, obj: &Value, name: &Name, value: Value) -> AttrResult<()> {
        let Value::Object(o) = obj else {
            self.attr_miss(site, Opcode::StoreAttrUncachable);
            return self.set_attr(obj, name, value);
        };
        let ty = self.instance_ref(*o)?.ty;
        if !self.type_ref(ty)?.uses_generic_setattr() {
            self.stats.uncacheable.custom_setattr += 1;
            self.attr_miss(site, Opcode::StoreAttrUncachable);
            return self.set_attr(obj, name, value);
        }
        match self.fill_instance_entry(ty, name)? {
            Fill::Entry(id) => {
                let op = self.entries.get(id).map(|e| e.kind.store_opcode());
                match op {
                    Some(op) if op != Opcode::StoreAttrUncachable => {
                        self.patch_or_miss(site, id, op);
                        self.entry_store(id, *o, value)
                    }
                    _ => self.set_attr(obj, name, value),
                }
            }
            Fill::Uncacheable => {
                self.attr_miss(site, Opcode::StoreAttrUncachable);
                self.set_attr(obj, name, value)
            }
            Fill::Discarded => self.set_attr(obj, name, value),
        }
    }

    // ---------------------------------------------------------------------
    // Methods
    // ---------------------------------------------------------------------

    /// Method lookup at `site`; see [`Runtime::get_method`].
    pub fn load_method(&mut self, site: CacheSite, obj: &Value, name: &Name) -> AttrResult<(Value, Option<Value>)> {
        let Some((op, arg)) = self.site_instr(site) else {
            return self.get_method(obj, name);
        };
        match op {
            Opcode::LoadMethod => self.load_method_with_cache(site, obj, name),
            Opcode::LoadMethodUncachable => {
                self.stats.load_method.uncacheable += 1;
                self.get_method(obj, name)
            }
            Opcode::LoadMethodCached => {
                let id = self.l1_entry(site.unit, arg);
                if let (Value::Object(o), Some(id)) = (obj, id) {
                    if self
                        .heap
                        .type_of(*o)
                        .is_some_and(|ty| self.entries.matches(id, ty))
                    {
                        self.stats.load_method.hits += 1;
                        return self.entry_load_method(id, *o);
                    }
                }
                self.stats.load_method.slight_misses += 1;
                if self.bump_churn(site.unit) {
                    self.stats.uncacheable.churn += 1;
                    self.attr_miss(site, Opcode::LoadMethodUncachable);
                    return self.get_method(obj, name);
                }
                self.load_method_with_cache(site, obj, name)
            }
            _ => self.get_method(obj, name),
        }
    }

    fn load_method_with_cache(&mut self, site: CacheSite, obj: &Value, name: &Name) -> AttrResult<(Value, Option<Value>)> {
        let Value::Object(o) = obj else {
            self.attr_miss(site, Opcode::LoadMethodUncachable);
            return self.get_method(obj, name);
        };
        let ty = self.instance_ref(*o)?.ty;
        if !self.type_ref(ty)?.uses_generic_getattr() {
            self.stats.uncacheable.custom_getattr += 1;
            self.attr_miss(site, Opcode::LoadMethodUncachable);
            return self.get_method(obj, name);
        }
        match self.fill_instance_entry(ty, name)? {
            Fill::Entry(id) => {
                self.patch_or_miss(site, id, Opcode::LoadMethodCached);
                self.entry_load_method(id, *o)
            }
            Fill::Uncacheable => {
                self.attr_miss(site, Opcode::LoadMethodUncachable);
                self.get_method(obj, name)
            }
            Fill::Discarded => self.get_method(obj, name),
        }
    }
}
