//! The generic attribute protocol.
//!
//! This is the always-correct path every cached access must agree with.
//! Instance lookup order: data descriptor on the type, then the instance
//! dictionary, then non-data descriptors, functions and class variables.

use std::rc::Rc;

use shade_core::Name;

use super::Runtime;
use crate::core::{BoundMethod, Descriptor, DictId, DictKey, FunctionBody, ObjectId, TypeId, Value};
use crate::core::value::LazyValue;
use crate::errors::{AttrError, AttrResult};
use crate::vm;

impl Runtime {
    /// Reads `key`, resolving a lazy binding in place. The resolved value
    /// is written back only if the binding was not replaced meanwhile.
    pub fn dict_get(&mut self, dict: DictId, key: &DictKey) -> AttrResult<Option<Value>> {
        match self.dict_ref(dict)?.get(key).cloned() {
            Some(Value::Lazy(lazy)) => self.resolve_lazy(dict, key, lazy).map(Some),
            other => Ok(other),
        }
    }

    fn resolve_lazy(&mut self, dict: DictId, key: &DictKey, lazy: Rc<LazyValue>) -> AttrResult<Value> {
        let value = (lazy.thunk)(self)?;
        let unchanged = matches!(
            self.dict_get_raw(dict, key),
            Some(Value::Lazy(current)) if Rc::ptr_eq(&current, &lazy)
        );
        if unchanged {
            self.dict_set(dict, key.clone(), value.clone())?;
        }
        Ok(value)
    }

    /// Finds `name` along the MRO of `ty` without binding it.
    pub fn lookup_type_attr(&mut self, ty: TypeId, name: &Name) -> AttrResult<Option<Value>> {
        let mro = self.type_ref(ty)?.mro.clone();
        let key = DictKey::Name(name.clone());
        for t in mro {
            let Some(dict) = self.heap.types.get(t).map(|t| t.dict) else {
                continue;
            };
            if let Some(v) = self.dict_get(dict, &key)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    pub(crate) fn instance_dict_get(&mut self, obj: ObjectId, name: &Name) -> AttrResult<Option<Value>> {
        match self.instance_ref(obj)?.dict {
            Some(dict) => self.dict_get(dict, &DictKey::Name(name.clone())),
            None => Ok(None),
        }
    }

    pub(crate) fn attribute_error(&self, obj: &Value, name: &Name) -> AttrError {
        AttrError::AttributeNotFound {
            type_name: self.heap.value_type_name(obj),
            name: name.clone(),
        }
    }

    pub(crate) fn read_slot(&self, obj: ObjectId, offset: usize, name: &Name) -> AttrResult<Value> {
        match self.instance_ref(obj)?.slots.get(offset) {
            Some(Some(v)) => Ok(v.clone()),
            _ => Err(self.attribute_error(&Value::Object(obj), name)),
        }
    }

    pub(crate) fn write_slot(&mut self, obj: ObjectId, offset: usize, value: Value) -> AttrResult<()> {
        let inst = self
            .heap
            .objects
            .get_mut(obj)
            .ok_or(AttrError::StaleHandle(crate::errors::messages::STALE_OBJECT))?;
        match inst.slots.get_mut(offset) {
            Some(slot) => {
                *slot = Some(value);
                Ok(())
            }
            None => Err(AttrError::InvalidCode(crate::errors::messages::BAD_OPERAND)),
        }
    }

    pub(crate) fn descr_get(&mut self, descr: &Rc<Descriptor>, obj: &Value) -> AttrResult<Value> {
        match &**descr {
            Descriptor::Member { name, offset, .. } => match obj {
                Value::Object(id) => self.read_slot(*id, *offset, name),
                _ => Ok(Value::Descr(descr.clone())),
            },
            Descriptor::Property { get, .. } => {
                let get = get.clone();
                get(self, obj)
            }
            Descriptor::Getter { get } => {
                let get = get.clone();
                get(self, obj)
            }
        }
    }

    pub(crate) fn descr_set(
        &mut self,
        descr: &Rc<Descriptor>,
        obj: &Value,
        attr: &Name,
        value: Value,
    ) -> AttrResult<()> {
        match &**descr {
            Descriptor::Member { name, readonly: true, .. } => Err(AttrError::ReadOnlyAttribute {
                type_name: self.heap.value_type_name(obj),
                name: name.clone(),
            }),
            Descriptor::Member { offset, .. } => match obj {
                Value::Object(id) => self.write_slot(*id, *offset, value),
                _ => Err(AttrError::InvalidCode(crate::errors::messages::BAD_OPERAND)),
            },
            Descriptor::Property { set: Some(set), .. } => {
                let set = set.clone();
                set(self, obj, value)
            }
            Descriptor::Property { set: None, .. } => Err(AttrError::CannotSetAttribute {
                name: attr.clone(),
            }),
            Descriptor::Getter { .. } => Err(AttrError::InvalidCode(crate::errors::messages::BAD_OPERAND)),
        }
    }

    /// Binds a class-level attribute found for an instance receiver.
    pub(crate) fn bind_attr(&mut self, attr: Value, obj: &Value) -> AttrResult<Value> {
        match attr {
            Value::Function(func) => Ok(Value::BoundMethod(Rc::new(BoundMethod {
                receiver: obj.clone(),
                func,
            }))),
            Value::Descr(d) => self.descr_get(&d, obj),
            other => Ok(other),
        }
    }

    pub fn get_attr(&mut self, obj: &Value, name: &Name) -> AttrResult<Value> {
        match obj {
            Value::Object(id) => self.instance_getattr(*id, name),
            Value::Type(ty) => self.type_getattr(*ty, name),
            _ => Err(self.attribute_error(obj, name)),
        }
    }

    fn instance_getattr(&mut self, id: ObjectId, name: &Name) -> AttrResult<Value> {
        let ty = self.instance_ref(id)?.ty;
        let obj = Value::Object(id);
        if let Some(hook) = self.type_ref(ty)?.getattr_hook.clone() {
            return hook(self, &obj, name);
        }
        let descr = self.lookup_type_attr(ty, name)?;
        if let Some(Value::Descr(d)) = &descr {
            if d.is_data() {
                return self.descr_get(d, &obj);
            }
        }
        if let Some(v) = self.instance_dict_get(id, name)? {
            return Ok(v);
        }
        match descr {
            Some(attr) => self.bind_attr(attr, &obj),
            None => Err(self.attribute_error(&obj, name)),
        }
    }

    /// A data descriptor on the metaclass wins; then the class MRO, where
    /// values come back unbound; then the metaclass attribute.
    fn type_getattr(&mut self, ty: TypeId, name: &Name) -> AttrResult<Value> {
        let receiver = Value::Type(ty);
        let meta_attr = match self.type_ref(ty)?.metaclass {
            Some(meta) => self.lookup_type_attr(meta, name)?,
            None => None,
        };
        if let Some(Value::Descr(d)) = &meta_attr {
            if d.is_data() {
                return self.descr_get(d, &receiver);
            }
        }
        if let Some(v) = self.lookup_type_attr(ty, name)? {
            return Ok(v);
        }
        match meta_attr {
            Some(attr) => self.bind_attr(attr, &receiver),
            None => Err(self.attribute_error(&receiver, name)),
        }
    }

    pub fn set_attr(&mut self, obj: &Value, name: &Name, value: Value) -> AttrResult<()> {
        match obj {
            Value::Object(id) => self.instance_setattr(*id, name, value),
            Value::Type(ty) => self.type_setattr(*ty, name, value),
            _ => Err(self.attribute_error(obj, name)),
        }
    }

    fn instance_setattr(&mut self, id: ObjectId, name: &Name, value: Value) -> AttrResult<()> {
        let ty = self.instance_ref(id)?.ty;
        let obj = Value::Object(id);
        if let Some(hook) = self.type_ref(ty)?.setattr_hook.clone() {
            return hook(self, &obj, name, value);
        }
        let descr = self.lookup_type_attr(ty, name)?;
        if let Some(Value::Descr(d)) = &descr {
            if d.is_data() {
                return self.descr_set(d, &obj, name, value);
            }
        }
        if let Some(dict) = self.instance_ref(id)?.dict {
            if descr.is_some() {
                self.clear_no_shadowing(ty);
            }
            return self.dict_set(dict, name, value);
        }
        if descr.is_some() {
            return Err(AttrError::ReadOnlyAttribute {
                type_name: self.heap.type_name(ty),
                name: name.clone(),
            });
        }
        Err(self.attribute_error(&obj, name))
    }

    fn type_setattr(&mut self, ty: TypeId, name: &Name, value: Value) -> AttrResult<()> {
        if let Some(meta) = self.type_ref(ty)?.metaclass {
            if let Some(Value::Descr(d)) = self.lookup_type_attr(meta, name)? {
                if d.is_data() {
                    return self.descr_set(&d, &Value::Type(ty), name, value);
                }
            }
        }
        let dict = self.type_dict(ty)?;
        self.dict_set(dict, name, value)
    }

    /// Method lookup without allocating a bound method: returns the callable
    /// and, when it is an unbound function, the receiver to pass as self.
    pub fn get_method(&mut self, obj: &Value, name: &Name) -> AttrResult<(Value, Option<Value>)> {
        let Value::Object(id) = obj else {
            return Ok((self.get_attr(obj, name)?, None));
        };
        let ty = self.instance_ref(*id)?.ty;
        if self.type_ref(ty)?.getattr_hook.is_some() {
            return Ok((self.get_attr(obj, name)?, None));
        }
        match self.lookup_type_attr(ty, name)? {
            Some(Value::Function(func)) => match self.instance_dict_get(*id, name)? {
                Some(shadowed) => Ok((shadowed, None)),
                None => Ok((Value::Function(func), Some(obj.clone()))),
            },
            _ => Ok((self.instance_getattr(*id, name)?, None)),
        }
    }

    pub fn call(&mut self, callable: &Value, args: &[Value]) -> AttrResult<Value> {
        match callable {
            Value::Function(func) => match &func.body {
                FunctionBody::Native(f) => {
                    let f = f.clone();
                    f(self, args)
                }
                FunctionBody::Code(unit) => vm::run_unit(self, *unit, args),
            },
            Value::BoundMethod(m) => {
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(m.receiver.clone());
                full.extend_from_slice(args);
                self.call(&Value::Function(m.func.clone()), &full)
            }
            Value::Type(ty) => Ok(Value::Object(self.new_object(*ty)?)),
            other => Err(AttrError::NotCallable {
                type_name: self.heap.value_type_name(other),
            }),
        }
    }

    /// Generic global lookup: globals, then builtins.
    pub(crate) fn load_global_generic(&mut self, globals: DictId, builtins: DictId, name: &Name) -> AttrResult<Value> {
        let key = DictKey::Name(name.clone());
        if let Some(v) = self.dict_get(globals, &key)? {
            return Ok(v);
        }
        if let Some(v) = self.dict_get(builtins, &key)? {
            return Ok(v);
        }
        Err(AttrError::NameNotFound { name: name.clone() })
    }
}
