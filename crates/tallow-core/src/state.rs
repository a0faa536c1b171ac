//! Shared engine state
//!
//! Everything the lock holder may touch: the value stack, the chain of
//! active script calls (for tracebacks), the table of script functions the
//! host can call back and the id of the module being executed.

use crate::error::ScriptError;
use crate::host::HandlerId;
use crate::stack::{ScriptStack, DEFAULT_MAX_STACK_SIZE};
use crate::value::{ScriptFunction, ScriptValue};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Panic payload for contract violations that must not be caught as script
/// errors
///
/// Protected regions re-raise this payload instead of converting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalFault {
    /// What was violated
    pub message: String,
}

impl InternalFault {
    /// Raise an internal fault
    pub fn raise(message: impl Into<String>) -> ! {
        std::panic::panic_any(InternalFault {
            message: message.into(),
        })
    }
}

impl fmt::Display for InternalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "internal fault: {}", self.message)
    }
}

/// One active script call
#[derive(Debug, Clone)]
pub struct CallInfo {
    /// Function name
    pub name: Arc<str>,
}

/// Engine state guarded by the execution lock
#[derive(Debug)]
pub struct ScriptState {
    stack: ScriptStack,
    calls: Vec<CallInfo>,
    handlers: FxHashMap<HandlerId, ScriptFunction>,
    next_handler: u64,
    current_module: Option<String>,
}

impl ScriptState {
    /// Create a state with the default stack size
    pub fn new() -> Self {
        Self::with_max_stack(DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a state with a stack of `max_stack` slots
    pub fn with_max_stack(max_stack: usize) -> Self {
        Self {
            stack: ScriptStack::with_capacity(max_stack),
            calls: Vec::new(),
            handlers: FxHashMap::default(),
            next_handler: 1,
            current_module: None,
        }
    }

    /// The value stack
    pub fn stack(&self) -> &ScriptStack {
        &self.stack
    }

    /// The value stack, mutably
    pub fn stack_mut(&mut self) -> &mut ScriptStack {
        &mut self.stack
    }

    /// Current stack depth
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Push a value, reporting overflow as a script error
    pub fn push(&mut self, value: ScriptValue) -> Result<(), ScriptError> {
        self.stack.push(value).map_err(ScriptError::from)
    }

    /// Register a script function the host can call back
    ///
    /// The function stays registered until [`release_handler`](Self::release_handler)
    /// (normally once the host reports its handler object gone) or until the
    /// state is dropped.
    pub fn register_handler(&mut self, function: ScriptFunction) -> HandlerId {
        let id = HandlerId(self.next_handler);
        self.next_handler += 1;
        self.handlers.insert(id, function);
        id
    }

    /// Look a handler up
    pub fn handler(&self, id: HandlerId) -> Option<&ScriptFunction> {
        self.handlers.get(&id)
    }

    /// Forget a handler
    pub fn release_handler(&mut self, id: HandlerId) -> Option<ScriptFunction> {
        self.handlers.remove(&id)
    }

    /// Forget every handler in `ids`, returning how many were registered
    pub fn release_handlers(&mut self, ids: impl IntoIterator<Item = HandlerId>) -> usize {
        ids.into_iter()
            .filter(|id| self.handlers.remove(id).is_some())
            .count()
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Id of the module being executed
    pub fn current_module(&self) -> Option<&str> {
        self.current_module.as_deref()
    }

    /// Set the id of the module being executed, returning the previous one
    pub fn set_current_module(&mut self, id: Option<String>) -> Option<String> {
        std::mem::replace(&mut self.current_module, id)
    }

    /// Record entry into a script function
    pub fn enter(&mut self, name: Arc<str>) {
        self.calls.push(CallInfo { name });
    }

    /// Record exit from the innermost script function
    pub fn leave(&mut self) {
        self.calls.pop();
    }

    /// Active calls, outermost first
    pub fn calls(&self) -> &[CallInfo] {
        &self.calls
    }

    /// Render the active call chain, innermost first
    pub fn traceback(&self) -> String {
        let mut out = String::from("stack traceback:");
        for call in self.calls.iter().rev() {
            out.push_str("\n\tin function '");
            out.push_str(&call.name);
            out.push('\'');
        }
        match &self.current_module {
            Some(module) => {
                out.push_str("\n\tin module '");
                out.push_str(module);
                out.push('\'');
            }
            None => out.push_str("\n\t[host]"),
        }
        out
    }

    /// Run `f` as one call frame
    ///
    /// On success `f` returns how many results it pushed; those results are
    /// moved down to start at the depth the frame began with, so the frame
    /// nets exactly that many slots. On failure the stack is cut back to the
    /// starting depth. Popping below the starting depth is an internal fault.
    pub fn balanced<F>(&mut self, f: F) -> Result<usize, ScriptError>
    where
        F: FnOnce(&mut ScriptState) -> Result<usize, ScriptError>,
    {
        let base = self.depth();
        let outcome = f(self);
        let depth = self.depth();
        if depth < base {
            InternalFault::raise(format!(
                "stack imbalance: depth {} fell below frame base {}",
                depth, base
            ));
        }
        match outcome {
            Ok(results) => {
                if self.stack.collapse(base, results).is_err() {
                    InternalFault::raise(format!(
                        "stack imbalance: frame at {} claims {} results with depth {}",
                        base, results, depth
                    ));
                }
                Ok(results)
            }
            Err(err) => {
                self.stack.truncate(base);
                Err(err)
            }
        }
    }

    /// Render the stack for debug logs
    pub fn dump_stack(&self) -> String {
        self.stack.dump()
    }
}

impl Default for ScriptState {
    fn default() -> Self {
        Self::new()
    }
}
