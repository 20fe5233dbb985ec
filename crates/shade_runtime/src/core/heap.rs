//! Handle-addressed storage for types, dictionaries and instances.

use slotmap::{SlotMap, new_key_type};

use super::dict::Dict;
use super::types::TypeObject;
use super::value::Value;

new_key_type! {
    /// Handle to an instance.
    pub struct ObjectId;
}

new_key_type! {
    /// Handle to a type object.
    pub struct TypeId;
}

new_key_type! {
    /// Handle to a dictionary.
    pub struct DictId;
}

pub struct Instance {
    pub ty: TypeId,
    pub dict: Option<DictId>,
    pub slots: Vec<Option<Value>>,
}

pub struct Heap {
    pub(crate) types: SlotMap<TypeId, TypeObject>,
    pub(crate) dicts: SlotMap<DictId, Dict>,
    pub(crate) objects: SlotMap<ObjectId, Instance>,
    next_version_tag: u64,
    next_keys_id: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            types: SlotMap::with_key(),
            dicts: SlotMap::with_key(),
            objects: SlotMap::with_key(),
            next_version_tag: 1,
            next_keys_id: 1,
        }
    }

    pub(crate) fn next_version_tag(&mut self) -> u64 {
        let tag = self.next_version_tag;
        self.next_version_tag += 1;
        tag
    }

    pub(crate) fn next_keys_id(&mut self) -> u64 {
        let id = self.next_keys_id;
        self.next_keys_id += 1;
        id
    }

    #[inline]
    pub fn ty(&self, id: TypeId) -> Option<&TypeObject> {
        self.types.get(id)
    }

    #[inline]
    pub fn dict(&self, id: DictId) -> Option<&Dict> {
        self.dicts.get(id)
    }

    #[inline]
    pub fn object(&self, id: ObjectId) -> Option<&Instance> {
        self.objects.get(id)
    }

    #[inline]
    pub fn type_of(&self, id: ObjectId) -> Option<TypeId> {
        self.objects.get(id).map(|o| o.ty)
    }

    pub fn type_name(&self, id: TypeId) -> String {
        self.types
            .get(id)
            .map(|t| t.name.to_string())
            .unwrap_or_else(|| "<dead type>".to_string())
    }

    /// Name used in error messages for a value's type.
    pub fn value_type_name(&self, v: &Value) -> String {
        match v {
            Value::Object(id) => match self.type_of(*id) {
                Some(t) => self.type_name(t),
                None => "<dead object>".to_string(),
            },
            Value::Type(t) => match self.types.get(*t).and_then(|t| t.metaclass) {
                Some(meta) => self.type_name(meta),
                None => "type".to_string(),
            },
            other => other.kind_name().to_string(),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
