//! Cache entries.
//!
//! An entry records how `name` resolves for receivers of one type. Entries
//! are shared: the per-type registry holds one reference and every
//! specialized instruction (or polymorphic slot) that points at the entry
//! holds another. Invalidation empties the entry in place so outstanding
//! handles see an entry that matches no receiver; storage is reclaimed when
//! the last reference is released.

use shade_core::Name;
use shade_ir::Opcode;
use slotmap::{SlotMap, new_key_type};

use crate::core::{Descriptor, TypeId, Value};
use std::rc::Rc;

new_key_type! {
    pub struct EntryId;
}

/// Whether an entry serves instances of the type or the type object itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Receiver {
    Instance,
    Class,
}

#[derive(Clone, Debug)]
pub enum EntryKind {
    /// Invalidated.
    Empty,
    /// Instance dictionary shares its key table with the type. `index` is
    /// filled in once the name has a position in that table.
    SplitDict {
        keys_id: u64,
        index: Option<usize>,
        descr: Option<Value>,
    },
    /// Instance dictionary with its own key table.
    Dict { descr: Option<Value> },
    /// Data descriptor that is not a plain writable slot.
    DataDescr { descr: Rc<Descriptor> },
    /// Writable fixed slot.
    Slot { offset: usize },
    /// Dictionary-less instance; the class-level value is bound on read.
    DescrOrClassVar { descr: Value },
    /// Attribute of a type object read through the type itself.
    ClassAttr { value: Value },
}

impl EntryKind {
    pub fn load_opcode(&self) -> Opcode {
        match self {
            EntryKind::Empty => Opcode::LoadAttr,
            EntryKind::SplitDict { .. } => Opcode::LoadAttrSplitDict,
            EntryKind::Dict { .. } => Opcode::LoadAttrDict,
            EntryKind::DataDescr { .. } => Opcode::LoadAttrDataDescr,
            EntryKind::Slot { .. } => Opcode::LoadAttrSlot,
            EntryKind::DescrOrClassVar { .. } => Opcode::LoadAttrDescrOrClassVar,
            EntryKind::ClassAttr { .. } => Opcode::LoadAttrType,
        }
    }

    pub fn store_opcode(&self) -> Opcode {
        match self {
            EntryKind::SplitDict { .. } => Opcode::StoreAttrSplitDict,
            EntryKind::Dict { .. } => Opcode::StoreAttrDict,
            EntryKind::Slot { .. } => Opcode::StoreAttrSlot,
            EntryKind::DataDescr { .. } | EntryKind::DescrOrClassVar { .. } => {
                Opcode::StoreAttrDescr
            }
            EntryKind::Empty | EntryKind::ClassAttr { .. } => Opcode::StoreAttrUncachable,
        }
    }
}

#[derive(Debug)]
pub struct AttrEntry {
    pub(crate) ty: Option<TypeId>,
    pub(crate) name: Name,
    pub(crate) kind: EntryKind,
    refs: u32,
}

impl AttrEntry {
    #[inline]
    pub fn owner(&self) -> Option<TypeId> {
        self.ty
    }

    #[inline]
    pub fn name(&self) -> &Name {
        &self.name
    }

    #[inline]
    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.ty.is_some()
    }

    #[inline]
    pub fn refs(&self) -> u32 {
        self.refs
    }
}

#[derive(Default)]
pub struct EntryTable {
    slots: SlotMap<EntryId, AttrEntry>,
}

impl EntryTable {
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
        }
    }

    /// Creates an unreferenced entry; the caller takes the first reference.
    pub(crate) fn insert(&mut self, ty: TypeId, name: Name, kind: EntryKind) -> EntryId {
        self.slots.insert(AttrEntry {
            ty: Some(ty),
            name,
            kind,
            refs: 0,
        })
    }

    #[inline]
    pub fn get(&self, id: EntryId) -> Option<&AttrEntry> {
        self.slots.get(id)
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: EntryId) -> Option<&mut AttrEntry> {
        self.slots.get_mut(id)
    }

    /// True if `id` is live and currently valid for `ty`.
    #[inline]
    pub fn matches(&self, id: EntryId, ty: TypeId) -> bool {
        self.slots.get(id).is_some_and(|e| e.ty == Some(ty))
    }

    pub(crate) fn incref(&mut self, id: EntryId) {
        if let Some(e) = self.slots.get_mut(id) {
            e.refs += 1;
        }
    }

    pub(crate) fn decref(&mut self, id: EntryId) {
        let Some(e) = self.slots.get_mut(id) else {
            return;
        };
        debug_assert!(e.refs > 0, "entry released more often than retained");
        e.refs = e.refs.saturating_sub(1);
        if e.refs == 0 {
            self.slots.remove(id);
        }
    }

    /// Empties the entry, dropping any descriptor it kept alive.
    pub(crate) fn invalidate(&mut self, id: EntryId) {
        if let Some(e) = self.slots.get_mut(id) {
            e.ty = None;
            e.kind = EntryKind::Empty;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
