//! Type objects.

use std::rc::Rc;

use shade_core::Name;

use super::dict::SharedKeys;
use super::heap::{DictId, TypeId};
use super::value::{GetAttrHook, SetAttrHook, Value};

/// Instance layout: dictionary kind and fixed slot count.
#[derive(Clone)]
pub struct Layout {
    pub has_dict: bool,
    /// Present when instances use split dictionaries.
    pub shared_keys: Option<Rc<SharedKeys>>,
    pub slot_count: usize,
}

pub struct TypeObject {
    pub name: Name,
    pub bases: Vec<TypeId>,
    pub(crate) mro: Vec<TypeId>,
    pub metaclass: Option<TypeId>,
    pub dict: DictId,
    pub layout: Layout,
    /// Valid-version token. `None` means the type cannot be cached.
    pub(crate) version_tag: Option<u64>,
    pub(crate) versioned: bool,
    pub(crate) subclasses: Vec<TypeId>,
    pub(crate) getattr_hook: Option<GetAttrHook>,
    pub(crate) setattr_hook: Option<SetAttrHook>,
    /// Cleared the first time an instance stores over a class-level name.
    pub(crate) no_shadowing_instances: bool,
}

impl TypeObject {
    #[inline]
    pub fn mro(&self) -> &[TypeId] {
        &self.mro
    }

    #[inline]
    pub fn version_tag(&self) -> Option<u64> {
        self.version_tag
    }

    #[inline]
    pub fn uses_generic_getattr(&self) -> bool {
        self.getattr_hook.is_none()
    }

    #[inline]
    pub fn uses_generic_setattr(&self) -> bool {
        self.setattr_hook.is_none()
    }

    #[inline]
    pub fn no_shadowing_instances(&self) -> bool {
        self.no_shadowing_instances
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InstanceDict {
    None,
    Combined,
    Split,
}

/// Declarative description of a type to create.
pub struct TypeSpec {
    pub(crate) name: Name,
    pub(crate) bases: Vec<TypeId>,
    pub(crate) metaclass: Option<TypeId>,
    pub(crate) attrs: Vec<(Name, Value)>,
    pub(crate) instance_dict: InstanceDict,
    pub(crate) slots: usize,
    pub(crate) versioned: bool,
    pub(crate) getattr_hook: Option<GetAttrHook>,
    pub(crate) setattr_hook: Option<SetAttrHook>,
}

impl TypeSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: Name::new(name),
            bases: Vec::new(),
            metaclass: None,
            attrs: Vec::new(),
            instance_dict: InstanceDict::Combined,
            slots: 0,
            versioned: true,
            getattr_hook: None,
            setattr_hook: None,
        }
    }

    pub fn base(mut self, base: TypeId) -> Self {
        self.bases.push(base);
        self
    }

    pub fn metaclass(mut self, meta: TypeId) -> Self {
        self.metaclass = Some(meta);
        self
    }

    pub fn attr(mut self, name: &str, value: Value) -> Self {
        self.attrs.push((Name::new(name), value));
        self
    }

    pub fn split_dict(mut self) -> Self {
        self.instance_dict = InstanceDict::Split;
        self
    }

    pub fn no_dict(mut self) -> Self {
        self.instance_dict = InstanceDict::None;
        self
    }

    pub fn slots(mut self, n: usize) -> Self {
        self.slots = n;
        self
    }

    /// Types without a version tag are never cached.
    pub fn unversioned(mut self) -> Self {
        self.versioned = false;
        self
    }

    pub fn getattr_hook(mut self, hook: GetAttrHook) -> Self {
        self.getattr_hook = Some(hook);
        self
    }

    pub fn setattr_hook(mut self, hook: SetAttrHook) -> Self {
        self.setattr_hook = Some(hook);
        self
    }
}
