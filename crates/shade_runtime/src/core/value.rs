//! Runtime values.
//!
//! Scalars compare by content. Reference-counted payloads (functions,
//! descriptors, lazy bindings) compare by identity, which is what attribute
//! resolution observes.

use std::fmt;
use std::rc::Rc;

use shade_core::Name;

use super::heap::{DictId, ObjectId, TypeId};
use crate::errors::AttrResult;
use crate::runtime::{Runtime, UnitId};

pub type NativeFn = Rc<dyn Fn(&mut Runtime, &[Value]) -> AttrResult<Value>>;
pub type GetHook = Rc<dyn Fn(&mut Runtime, &Value) -> AttrResult<Value>>;
pub type SetHook = Rc<dyn Fn(&mut Runtime, &Value, Value) -> AttrResult<()>>;
pub type GetAttrHook = Rc<dyn Fn(&mut Runtime, &Value, &Name) -> AttrResult<Value>>;
pub type SetAttrHook = Rc<dyn Fn(&mut Runtime, &Value, &Name, Value) -> AttrResult<()>>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Object(ObjectId),
    Type(TypeId),
    Dict(DictId),
    Function(Rc<Function>),
    BoundMethod(Rc<BoundMethod>),
    Descr(Rc<Descriptor>),
    /// Deferred binding, resolved on first read from a dictionary.
    Lazy(Rc<LazyValue>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn native(name: &str, f: impl Fn(&mut Runtime, &[Value]) -> AttrResult<Value> + 'static) -> Self {
        Value::Function(Rc::new(Function {
            name: Name::new(name),
            body: FunctionBody::Native(Rc::new(f)),
        }))
    }

    pub fn lazy(thunk: impl Fn(&mut Runtime) -> AttrResult<Value> + 'static) -> Self {
        Value::Lazy(Rc::new(LazyValue {
            thunk: Box::new(thunk),
        }))
    }

    pub fn descr(d: Descriptor) -> Self {
        Value::Descr(Rc::new(d))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Object(_) => "object",
            Value::Type(_) => "type",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::BoundMethod(_) => "method",
            Value::Descr(_) => "descriptor",
            Value::Lazy(_) => "lazy",
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                Rc::ptr_eq(&a.func, &b.func) && a.receiver == b.receiver
            }
            (Value::Descr(a), Value::Descr(b)) => Rc::ptr_eq(a, b),
            (Value::Lazy(a), Value::Lazy(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(id) => write!(f, "<object {id:?}>"),
            Value::Type(id) => write!(f, "<type {id:?}>"),
            Value::Dict(id) => write!(f, "<dict {id:?}>"),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::BoundMethod(m) => write!(f, "<bound method {} of {:?}>", m.func.name, m.receiver),
            Value::Descr(d) => write!(f, "{d:?}"),
            Value::Lazy(_) => write!(f, "<lazy>"),
        }
    }
}

pub enum FunctionBody {
    Native(NativeFn),
    Code(UnitId),
}

pub struct Function {
    pub name: Name,
    pub body: FunctionBody,
}

pub struct BoundMethod {
    pub receiver: Value,
    pub func: Rc<Function>,
}

pub struct LazyValue {
    pub(crate) thunk: Box<dyn Fn(&mut Runtime) -> AttrResult<Value>>,
}

/// Attribute descriptors stored in type dictionaries.
pub enum Descriptor {
    /// Fixed instance slot.
    Member {
        name: Name,
        offset: usize,
        readonly: bool,
    },
    /// Computed attribute; a property without a setter rejects stores.
    Property { get: GetHook, set: Option<SetHook> },
    /// Non-data descriptor: instance dictionaries shadow it.
    Getter { get: GetHook },
}

impl Descriptor {
    pub fn member(name: &str, offset: usize) -> Self {
        Descriptor::Member {
            name: Name::new(name),
            offset,
            readonly: false,
        }
    }

    pub fn readonly_member(name: &str, offset: usize) -> Self {
        Descriptor::Member {
            name: Name::new(name),
            offset,
            readonly: true,
        }
    }

    pub fn property(
        get: impl Fn(&mut Runtime, &Value) -> AttrResult<Value> + 'static,
        set: Option<SetHook>,
    ) -> Self {
        Descriptor::Property {
            get: Rc::new(get),
            set,
        }
    }

    pub fn getter(get: impl Fn(&mut Runtime, &Value) -> AttrResult<Value> + 'static) -> Self {
        Descriptor::Getter { get: Rc::new(get) }
    }

    /// Data descriptors take precedence over instance dictionaries.
    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, Descriptor::Member { .. } | Descriptor::Property { .. })
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Member { name, offset, readonly } => {
                write!(f, "<member {name} @{offset}{}>", if *readonly { " ro" } else { "" })
            }
            Descriptor::Property { set, .. } => {
                write!(f, "<property{}>", if set.is_some() { "" } else { " ro" })
            }
            Descriptor::Getter { .. } => write!(f, "<getter>"),
        }
    }
}
