//! Attribute cache entries and the per-site specialization state machine.

mod access;
mod classify;
mod entry;
mod site;

pub use entry::{AttrEntry, EntryId, EntryKind, EntryTable, Receiver};
pub(crate) use classify::Fill;
