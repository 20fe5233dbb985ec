use crate::core::Value;
use crate::errors::{AttrError, messages};

#[inline]
pub(crate) fn stack_underflow() -> AttrError {
    AttrError::InvalidCode(messages::STACK_UNDERFLOW)
}

#[inline]
pub(crate) fn pop(stack: &mut Vec<Value>) -> Result<Value, AttrError> {
    stack.pop().ok_or_else(stack_underflow)
}

/// Removes the top `n` values, oldest first.
pub(crate) fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<Vec<Value>, AttrError> {
    if stack.len() < n {
        return Err(stack_underflow());
    }
    Ok(stack.split_off(stack.len() - n))
}
