//! Instruction dispatch over shadow streams.

mod dispatch;
mod stack;

pub(crate) use dispatch::run_unit;
