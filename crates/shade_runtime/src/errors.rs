//! Error type for attribute, global and call resolution.

use shade_core::Name;
use thiserror::Error;

pub mod messages {
    pub const STALE_OBJECT: &str = "object no longer exists";
    pub const STALE_TYPE: &str = "type no longer exists";
    pub const STALE_DICT: &str = "dict no longer exists";
    pub const STALE_UNIT: &str = "code unit no longer exists";
    pub const STALE_ENTRY: &str = "cache entry no longer exists";
    pub const STACK_UNDERFLOW: &str = "stack underflow";
    pub const BAD_OPERAND: &str = "instruction operand out of range";
    pub const TRUNCATED: &str = "instruction stream ends inside an instruction";
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttrError {
    #[error("'{type_name}' object has no attribute '{name}'")]
    AttributeNotFound { type_name: String, name: Name },
    #[error("attribute '{name}' of '{type_name}' objects is not writable")]
    ReadOnlyAttribute { type_name: String, name: Name },
    #[error("can't set attribute '{name}'")]
    CannotSetAttribute { name: Name },
    #[error("name '{name}' is not defined")]
    NameNotFound { name: Name },
    #[error("'{type_name}' object is not callable")]
    NotCallable { type_name: String },
    #[error("{name}() takes {expected} arguments but {got} were given")]
    WrongArgCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{0}")]
    StaleHandle(&'static str),
    #[error("invalid code: {0}")]
    InvalidCode(&'static str),
    /// Raised by user hooks, functions and lazy thunks.
    #[error("{0}")]
    Raised(String),
}

pub type AttrResult<T> = Result<T, AttrError>;
