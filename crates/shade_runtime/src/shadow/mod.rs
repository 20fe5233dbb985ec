//! Shadow instruction streams.
//!
//! Each code unit gets a private, mutable copy of its instructions. Sites
//! are rewritten in place; an opcode's unit offset never changes, so it
//! identifies the site for the lifetime of the stream. A rewrite may shrink
//! an instruction (the freed prefix units become `ShadowNop`) but can never
//! grow it.

use shade_ir::{CodeObject, CodeUnit, Opcode, instr_size, oparg_at, opsize, write_op_arg};
use smallvec::SmallVec;

use crate::cache::EntryId;
use crate::watch::GlobalCacheId;

const INITIAL_TABLE_SIZE: usize = 4;

/// Entry-table slot; `uses` counts instructions pointing at it.
#[derive(Clone, Copy, Debug)]
pub(crate) struct L1Slot {
    pub(crate) entry: EntryId,
    pub(crate) uses: u32,
}

pub(crate) type PolyCache = SmallVec<[Option<EntryId>; 4]>;

/// Growable table of optional slots with a hard size limit.
pub(crate) struct SlotTable<T> {
    items: Vec<Option<T>>,
    max: usize,
}

impl<T> SlotTable<T> {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            items: Vec::new(),
            max,
        }
    }

    pub(crate) fn position(&self, pred: impl Fn(&T) -> bool) -> Option<usize> {
        self.items
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&pred))
    }

    /// Stores `item` in the first free slot, growing 4, 8, 16... up to the limit.
    pub(crate) fn add(&mut self, item: T) -> Option<usize> {
        let index = match self.items.iter().position(Option::is_none) {
            Some(i) => i,
            None => {
                let len = self.items.len();
                if len >= self.max {
                    return None;
                }
                let grown = if len == 0 { INITIAL_TABLE_SIZE } else { len * 2 };
                self.items.resize_with(grown.min(self.max), || None);
                len
            }
        };
        self.items[index] = Some(item);
        Some(index)
    }

    #[inline]
    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)?.as_ref()
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.items.get_mut(index)?.as_mut()
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<T> {
        self.items.get_mut(index)?.take()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn occupied(&self) -> usize {
        self.items.iter().filter(|s| s.is_some()).count()
    }
}

pub struct ShadowCode {
    pub(crate) units: Vec<CodeUnit>,
    pub(crate) l1: SlotTable<L1Slot>,
    pub(crate) polymorphic: SlotTable<PolyCache>,
    /// Pre-sized to the number of distinct global names loaded.
    pub(crate) globals: Vec<Option<GlobalCacheId>>,
    /// Misses across all sites of the unit.
    pub(crate) update_count: usize,
}

impl ShadowCode {
    pub(crate) fn new(code: &CodeObject, max_slots: usize) -> Self {
        Self {
            units: code.units.clone(),
            l1: SlotTable::new(max_slots),
            polymorphic: SlotTable::new(max_slots),
            globals: vec![None; code.global_name_count()],
            update_count: 0,
        }
    }

    #[inline]
    pub fn units(&self) -> &[CodeUnit] {
        &self.units
    }

    pub fn entry_slots_in_use(&self) -> usize {
        self.l1.occupied()
    }

    pub fn polymorphic_slots_in_use(&self) -> usize {
        self.polymorphic.occupied()
    }

    pub fn global_slots(&self) -> usize {
        self.globals.len()
    }

    /// Opcode and argument of the instruction whose opcode sits at `offset`.
    pub(crate) fn instr_at(&self, offset: usize) -> Option<(Opcode, u32)> {
        let unit = self.units.get(offset)?;
        Some((unit.op, oparg_at(&self.units, offset)))
    }

    /// Replaces the instruction at `offset` with `op arg` and returns the
    /// previous opcode and argument. Returns `None`, leaving the stream
    /// untouched, when the new encoding is wider than the old one.
    pub(crate) fn rewrite(&mut self, offset: usize, op: Opcode, arg: u32) -> Option<(Opcode, u32)> {
        let old = self.instr_at(offset)?;
        let existing = opsize(&self.units, offset);
        let size = instr_size(arg);
        if size > existing {
            return None;
        }
        let start = offset + 1 - existing;
        let pad = existing - size;
        for unit in &mut self.units[start..start + pad] {
            *unit = CodeUnit::new(Opcode::ShadowNop, 0);
        }
        write_op_arg(&mut self.units, start + pad, op, arg, size);
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shade_ir::{CodeBuilder, decode, instructions};

    fn wide_code() -> (CodeObject, usize, usize) {
        let mut b = CodeBuilder::new("f");
        for i in 0..300 {
            b.name_index(&format!("a{i}"));
        }
        b.load_fast(0);
        let narrow = b.load_attr("a3");
        b.load_fast(0);
        let wide = b.load_attr("a299");
        b.return_value();
        (b.finish(), narrow, wide)
    }

    #[test]
    fn narrowing_a_wide_site_pads_with_shadow_nops() {
        let (code, _, wide) = wide_code();
        let mut shadow = ShadowCode::new(&code, 256);
        let before = shadow.units.len();
        assert_eq!(shadow.rewrite(wide, Opcode::LoadAttrDict, 2), Some((Opcode::LoadAttr, 299)));
        assert_eq!(shadow.units.len(), before);
        assert_eq!(shadow.units[wide - 1].op, Opcode::ShadowNop);
        assert_eq!(shadow.instr_at(wide), Some((Opcode::LoadAttrDict, 2)));
        assert_eq!(opsize(&shadow.units, wide), 2);

        let decoded: Vec<Opcode> = instructions(&shadow.units).map(|i| i.op).collect();
        assert!(decoded.contains(&Opcode::ShadowNop));
        assert_eq!(decode(&shadow.units, wide).map(|i| i.op), Some(Opcode::LoadAttrDict));
    }

    #[test]
    fn wide_argument_never_overwrites_neighbours() {
        let (code, narrow, _) = wide_code();
        let mut shadow = ShadowCode::new(&code, 1024);
        let snapshot = shadow.units.clone();
        assert_eq!(shadow.rewrite(narrow, Opcode::LoadAttrDict, 300), None);
        assert_eq!(shadow.units, snapshot);
    }

    #[test]
    fn rewrites_keep_the_site_offset_stable() {
        let (code, _, wide) = wide_code();
        let mut shadow = ShadowCode::new(&code, 256);
        shadow.rewrite(wide, Opcode::LoadAttrDict, 1);
        assert_eq!(
            shadow.rewrite(wide, Opcode::LoadAttrUncachable, 0),
            Some((Opcode::LoadAttrDict, 1))
        );
        assert_eq!(shadow.instr_at(wide), Some((Opcode::LoadAttrUncachable, 0)));
        assert_eq!(opsize(&shadow.units, wide), 2);
    }

    #[test]
    fn slot_table_grows_by_doubling_up_to_the_limit() {
        let mut table: SlotTable<u32> = SlotTable::new(6);
        for i in 0..4 {
            assert_eq!(table.add(i), Some(i as usize));
        }
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.add(4), Some(4));
        assert_eq!(table.capacity(), 6);
        assert_eq!(table.add(5), Some(5));
        assert_eq!(table.add(6), None);
        table.take(2);
        assert_eq!(table.add(7), Some(2));
        assert_eq!(table.position(|v| *v == 7), Some(2));
    }
}
