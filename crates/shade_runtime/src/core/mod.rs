//! Object model: values, dictionaries, types and the heap that owns them.

pub mod dict;
pub mod heap;
pub mod types;
pub mod value;

pub use dict::{Dict, DictKey, SharedKeys};
pub use heap::{DictId, Heap, Instance, ObjectId, TypeId};
pub use types::{InstanceDict, Layout, TypeObject, TypeSpec};
pub use value::{
    BoundMethod, Descriptor, Function, FunctionBody, GetAttrHook, GetHook, LazyValue, NativeFn,
    SetAttrHook, SetHook, Value,
};
