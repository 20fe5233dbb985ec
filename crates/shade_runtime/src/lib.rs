//! Adaptive inline caches for the shade interpreter.
//!
//! Attribute loads, attribute stores, method loads and global loads are
//! specialized per instruction site in a private copy of each code unit's
//! instruction stream. Caches depend on type and dictionary state; every
//! mutation of that state is routed through the [`Runtime`], which
//! invalidates or updates the affected caches before the mutation becomes
//! observable. A cached access therefore always returns what the generic
//! protocol would.

#![allow(clippy::new_without_default)]
#![allow(clippy::len_without_is_empty)]
#![allow(clippy::type_complexity)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod config;
pub mod core;
pub mod errors;
pub mod shadow;
pub mod stats;
pub mod watch;
mod runtime;
mod vm;

pub use cache::{AttrEntry, EntryId, EntryKind, Receiver};
pub use config::CacheConfig;
pub use crate::core::{
    Descriptor, DictId, DictKey, Function, FunctionBody, InstanceDict, ObjectId, TypeId, TypeSpec,
    Value,
};
pub use errors::{AttrError, AttrResult};
pub use runtime::{CacheSite, CompiledUnit, Runtime, UnitId};
pub use shade_core::Name;
pub use shade_ir::{CodeBuilder, CodeObject, Constant, Opcode};
pub use shadow::ShadowCode;
pub use stats::{CacheStats, OpcodeStats, UncacheableStats};
