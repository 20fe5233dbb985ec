//! Instruction stream representation for shade code units.
//!
//! Streams are sequences of two-byte units (opcode, 8-bit argument). Wide
//! arguments are spelled with `ExtendedArg` prefixes, and `ShadowNop` units
//! pad instructions that were rewritten to a narrower form.
mod builder;
mod code;
mod opcode;

pub use builder::*;
pub use code::*;
pub use opcode::*;
