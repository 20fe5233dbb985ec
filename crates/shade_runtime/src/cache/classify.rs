//! Entry classification.
//!
//! Classifying walks the MRO, which can resolve lazy bindings and so run
//! arbitrary code. The type's version tag is captured before the walk and
//! checked after it; if the type changed meanwhile the result is dropped
//! instead of being published.

use log::debug;
use shade_core::Name;

use super::entry::{EntryId, EntryKind, Receiver};
use crate::core::{Layout, TypeId, Value};
use crate::errors::AttrResult;
use crate::runtime::Runtime;

pub(crate) enum Fill {
    Entry(EntryId),
    /// The receiver cannot be cached; the site should stop trying.
    Uncacheable,
    /// The type changed during classification; retry on a later execution.
    Discarded,
}

fn classify(descr: Option<Value>, layout: &Layout) -> Option<EntryKind> {
    if let Some(Value::Descr(d)) = &descr {
        if d.is_data() {
            return Some(match &**d {
                crate::core::Descriptor::Member {
                    offset,
                    readonly: false,
                    ..
                } => EntryKind::Slot { offset: *offset },
                _ => EntryKind::DataDescr { descr: d.clone() },
            });
        }
    }
    if layout.has_dict {
        return Some(match &layout.shared_keys {
            Some(keys) => EntryKind::SplitDict {
                keys_id: keys.id(),
                index: None,
                descr,
            },
            None => EntryKind::Dict { descr },
        });
    }
    descr.map(|descr| EntryKind::DescrOrClassVar { descr })
}

impl Runtime {
    fn version_of(&self, ty: TypeId) -> Option<u64> {
        self.heap.types.get(ty).and_then(|t| t.version_tag)
    }

    /// Finds or builds the entry for instances of `ty` reading `name`.
    pub(crate) fn fill_instance_entry(&mut self, ty: TypeId, name: &Name) -> AttrResult<Fill> {
        if let Some(id) = self.type_watch.lookup(ty, name, Receiver::Instance) {
            return Ok(Fill::Entry(id));
        }
        if self.type_watch.is_disabled(ty) {
            self.stats.uncacheable.churn += 1;
            return Ok(Fill::Uncacheable);
        }
        let Some(version) = self.version_of(ty) else {
            self.stats.uncacheable.unstable_type += 1;
            return Ok(Fill::Uncacheable);
        };
        let layout = self.type_ref(ty)?.layout.clone();

        let descr = self.lookup_type_attr(ty, name)?;

        if self.version_of(ty) != Some(version) {
            self.stats.discarded_fills += 1;
            debug!("discarding fill of {name} on {}: type changed", self.heap.type_name(ty));
            return Ok(Fill::Discarded);
        }
        let Some(kind) = classify(descr, &layout) else {
            self.stats.uncacheable.not_found += 1;
            return Ok(Fill::Uncacheable);
        };
        let id = self.entries.insert(ty, name.clone(), kind);
        self.type_watch
            .register(&mut self.entries, ty, name.clone(), Receiver::Instance, id);
        self.stats.fills += 1;
        Ok(Fill::Entry(id))
    }

    /// Finds or builds the entry for reading `name` from the type object
    /// `ty` itself. Such entries also depend on the metaclass, which must
    /// not define a data descriptor for `name`.
    pub(crate) fn fill_class_entry(&mut self, ty: TypeId, name: &Name) -> AttrResult<Fill> {
        if let Some(id) = self.type_watch.lookup(ty, name, Receiver::Class) {
            return Ok(Fill::Entry(id));
        }
        if self.type_watch.is_disabled(ty) {
            self.stats.uncacheable.churn += 1;
            return Ok(Fill::Uncacheable);
        }
        let Some(version) = self.version_of(ty) else {
            self.stats.uncacheable.unstable_type += 1;
            return Ok(Fill::Uncacheable);
        };
        let meta = self.type_ref(ty)?.metaclass;
        let meta_version = match meta {
            Some(m) => match self.version_of(m) {
                Some(v) => Some(v),
                None => {
                    self.stats.uncacheable.unstable_type += 1;
                    return Ok(Fill::Uncacheable);
                }
            },
            None => None,
        };

        let meta_attr = match meta {
            Some(m) => self.lookup_type_attr(m, name)?,
            None => None,
        };
        let value = self.lookup_type_attr(ty, name)?;

        if self.version_of(ty) != Some(version) || meta.and_then(|m| self.version_of(m)) != meta_version {
            self.stats.discarded_fills += 1;
            debug!("discarding class fill of {name} on {}: type changed", self.heap.type_name(ty));
            return Ok(Fill::Discarded);
        }
        if let Some(Value::Descr(d)) = &meta_attr {
            if d.is_data() {
                self.stats.uncacheable.meta_data_descr += 1;
                return Ok(Fill::Uncacheable);
            }
        }
        let Some(value) = value else {
            self.stats.uncacheable.not_found += 1;
            return Ok(Fill::Uncacheable);
        };
        let id = self
            .entries
            .insert(ty, name.clone(), EntryKind::ClassAttr { value });
        self.type_watch
            .register(&mut self.entries, ty, name.clone(), Receiver::Class, id);
        if let Some(m) = meta {
            self.type_watch
                .register_meta_relationship(&mut self.entries, ty, m, id);
        }
        self.stats.fills += 1;
        Ok(Fill::Entry(id))
    }
}
