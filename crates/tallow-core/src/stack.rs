//! Script value stack
//!
//! The engine's operand stack as seen by the bridge. Calls read their
//! arguments from the top, leave them in place and push results above them.
//!
//! ```text
//! ┌─────────────────────────────┐
//! │ result₀                     │  ← depth after the call
//! ├─────────────────────────────┤
//! │ argₙ₋₁ … arg₀               │  ← frame base - nargs .. frame base
//! ├─────────────────────────────┤
//! │ caller values               │
//! └─────────────────────────────┘
//! ```

use crate::error::{ErrorKind, ScriptError};
use crate::value::ScriptValue;

/// Default maximum stack size (in slots)
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 8;

/// Stack misuse
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    /// Stack overflow
    #[error("Stack overflow")]
    Overflow,

    /// Stack underflow
    #[error("Stack underflow")]
    Underflow,
}

impl From<StackError> for ScriptError {
    fn from(err: StackError) -> Self {
        ScriptError::new(ErrorKind::Script, err.to_string())
    }
}

/// Operand stack of the embedded engine
#[derive(Debug, Clone)]
pub struct ScriptStack {
    slots: Vec<ScriptValue>,
    max_size: usize,
}

impl ScriptStack {
    /// Create a stack with the default size limit
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack holding at most `max_size` slots
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_size.min(256)),
            max_size,
        }
    }

    /// Push a value
    ///
    /// # Errors
    ///
    /// Returns `StackError::Overflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: ScriptValue) -> Result<(), StackError> {
        if self.slots.len() >= self.max_size {
            return Err(StackError::Overflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop the top value
    ///
    /// # Errors
    ///
    /// Returns `StackError::Underflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> Result<ScriptValue, StackError> {
        self.slots.pop().ok_or(StackError::Underflow)
    }

    /// Top value without popping
    #[inline]
    pub fn peek(&self) -> Result<&ScriptValue, StackError> {
        self.slots.last().ok_or(StackError::Underflow)
    }

    /// Value `n` slots below the top (0 = top)
    #[inline]
    pub fn peek_n(&self, n: usize) -> Result<&ScriptValue, StackError> {
        if self.slots.len() <= n {
            return Err(StackError::Underflow);
        }
        Ok(&self.slots[self.slots.len() - 1 - n])
    }

    /// Value at absolute position `pos`
    #[inline]
    pub fn get(&self, pos: usize) -> Result<&ScriptValue, StackError> {
        self.slots.get(pos).ok_or(StackError::Underflow)
    }

    /// Replace the value at absolute position `pos`
    pub fn set(&mut self, pos: usize, value: ScriptValue) -> Result<(), StackError> {
        let slot = self.slots.get_mut(pos).ok_or(StackError::Underflow)?;
        *slot = value;
        Ok(())
    }

    /// The top `n` values, bottom first
    pub fn top(&self, n: usize) -> Result<&[ScriptValue], StackError> {
        if self.slots.len() < n {
            return Err(StackError::Underflow);
        }
        Ok(&self.slots[self.slots.len() - n..])
    }

    /// Pop the top `n` values, bottom first
    pub fn pop_n(&mut self, n: usize) -> Result<Vec<ScriptValue>, StackError> {
        if self.slots.len() < n {
            return Err(StackError::Underflow);
        }
        Ok(self.slots.split_off(self.slots.len() - n))
    }

    /// Drop everything above `depth`
    #[inline]
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    /// Keep the top `keep` values and move them down to start at `base`
    ///
    /// Slots between `base` and the kept values are dropped.
    pub fn collapse(&mut self, base: usize, keep: usize) -> Result<(), StackError> {
        let depth = self.slots.len();
        if depth < base + keep {
            return Err(StackError::Underflow);
        }
        self.slots.drain(base..depth - keep);
        Ok(())
    }

    /// Current depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Size limit in slots
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// All slots, bottom first
    pub fn as_slice(&self) -> &[ScriptValue] {
        &self.slots
    }

    /// Render the stack, top first, for debug logs
    pub fn dump(&self) -> String {
        let mut out = format!("=== Script Stack ({} slots) ===", self.slots.len());
        for (index, value) in self.slots.iter().enumerate().rev() {
            out.push_str(&format!("\n  [{}] {}: {}", index, value.type_name(), value));
        }
        out
    }
}

impl Default for ScriptStack {
    fn default() -> Self {
        Self::new()
    }
}
