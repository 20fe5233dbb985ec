//! Fast-path routines run once a site's entry matched the receiver type.
//! Each must return exactly what the generic protocol would.

use shade_core::Name;

use super::entry::{EntryId, EntryKind};
use crate::core::{DictKey, ObjectId, Value};
use crate::errors::{AttrError, AttrResult, messages};
use crate::runtime::Runtime;

impl Runtime {
    fn entry_snapshot(&self, id: EntryId) -> AttrResult<(Name, EntryKind)> {
        let entry = self
            .entries
            .get(id)
            .ok_or(AttrError::StaleHandle(messages::STALE_ENTRY))?;
        Ok((entry.name.clone(), entry.kind.clone()))
    }

    fn dict_miss(&mut self, obj: ObjectId, name: &Name, descr: Option<Value>) -> AttrResult<Value> {
        let receiver = Value::Object(obj);
        match descr {
            Some(attr) => self.bind_attr(attr, &receiver),
            None => Err(self.attribute_error(&receiver, name)),
        }
    }

    /// Reads through a split dictionary using the cached key index,
    /// resolving the index on first use.
    fn split_dict_get(
        &mut self,
        id: EntryId,
        obj: ObjectId,
        name: &Name,
        keys_id: u64,
        index: Option<usize>,
    ) -> AttrResult<Option<Value>> {
        let Some(dict) = self.instance_ref(obj)?.dict else {
            return Ok(None);
        };
        let d = self.dict_ref(dict)?;
        if d.split_keys_id() != Some(keys_id) {
            return self.dict_get(dict, &DictKey::Name(name.clone()));
        }
        let index = match index {
            Some(i) => i,
            None => {
                let Some(i) = d.split_index(name) else {
                    return Ok(None);
                };
                if let Some(entry) = self.entries.get_mut(id) {
                    if let EntryKind::SplitDict { index, .. } = &mut entry.kind {
                        *index = Some(i);
                    }
                }
                i
            }
        };
        match self.dict_ref(dict)?.split_value(index).cloned() {
            Some(Value::Lazy(_)) => self.dict_get(dict, &DictKey::Name(name.clone())),
            other => Ok(other),
        }
    }

    pub(crate) fn entry_load(&mut self, id: EntryId, obj: ObjectId) -> AttrResult<Value> {
        let (name, kind) = self.entry_snapshot(id)?;
        match kind {
            EntryKind::SplitDict {
                keys_id,
                index,
                descr,
            } => match self.split_dict_get(id, obj, &name, keys_id, index)? {
                Some(v) => Ok(v),
                None => self.dict_miss(obj, &name, descr),
            },
            EntryKind::Dict { descr } => match self.instance_dict_get(obj, &name)? {
                Some(v) => Ok(v),
                None => self.dict_miss(obj, &name, descr),
            },
            EntryKind::DataDescr { descr } => self.descr_get(&descr, &Value::Object(obj)),
            EntryKind::Slot { offset } => self.read_slot(obj, offset, &name),
            EntryKind::DescrOrClassVar { descr } => match self.instance_dict_get(obj, &name)? {
                Some(v) => Ok(v),
                None => self.bind_attr(descr, &Value::Object(obj)),
            },
            EntryKind::ClassAttr { value } => Ok(value),
            EntryKind::Empty => Err(AttrError::StaleHandle(messages::STALE_ENTRY)),
        }
    }

    pub(crate) fn entry_class_value(&self, id: EntryId) -> AttrResult<Value> {
        match self.entries.get(id).map(|e| &e.kind) {
            Some(EntryKind::ClassAttr { value }) => Ok(value.clone()),
            _ => Err(AttrError::StaleHandle(messages::STALE_ENTRY)),
        }
    }

    pub(crate) fn entry_store(&mut self, id: EntryId, obj: ObjectId, value: Value) -> AttrResult<()> {
        let (name, kind) = self.entry_snapshot(id)?;
        let inst = self.instance_ref(obj)?;
        let (ty, dict) = (inst.ty, inst.dict);
        match kind {
            EntryKind::SplitDict { descr, .. } | EntryKind::Dict { descr } => {
                let Some(dict) = dict else {
                    return Err(AttrError::StaleHandle(messages::STALE_DICT));
                };
                if descr.is_some() {
                    self.clear_no_shadowing(ty);
                }
                self.dict_set(dict, &name, value)
            }
            EntryKind::DataDescr { descr } => {
                self.descr_set(&descr, &Value::Object(obj), &name, value)
            }
            EntryKind::Slot { offset } => self.write_slot(obj, offset, value),
            EntryKind::DescrOrClassVar { .. } => match dict {
                Some(dict) => {
                    self.clear_no_shadowing(ty);
                    self.dict_set(dict, &name, value)
                }
                None => Err(AttrError::ReadOnlyAttribute {
                    type_name: self.heap.type_name(ty),
                    name,
                }),
            },
            EntryKind::ClassAttr { .. } | EntryKind::Empty => {
                Err(AttrError::StaleHandle(messages::STALE_ENTRY))
            }
        }
    }

    pub(crate) fn entry_load_method(&mut self, id: EntryId, obj: ObjectId) -> AttrResult<(Value, Option<Value>)> {
        let (name, kind) = self.entry_snapshot(id)?;
        let func = match kind {
            EntryKind::SplitDict {
                descr: Some(Value::Function(f)),
                ..
            }
            | EntryKind::Dict {
                descr: Some(Value::Function(f)),
            }
            | EntryKind::DescrOrClassVar {
                descr: Value::Function(f),
            } => f,
            _ => return Ok((self.entry_load(id, obj)?, None)),
        };
        match self.instance_dict_get(obj, &name)? {
            Some(shadowed) => Ok((shadowed, None)),
            None => Ok((Value::Function(func), Some(Value::Object(obj)))),
        }
    }
}
