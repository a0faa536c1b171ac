//! Script engine seam
//!
//! The bridge does not interpret scripts itself. An embedder supplies a
//! [`ScriptEngine`] that turns module bytes (source or precompiled) into a
//! callable [`ScriptFunction`]; the bridge runs that function under the
//! execution lock like any other script call.

use tallow_core::{ScriptError, ScriptFunction};

/// Compiles modules for the bridge
pub trait ScriptEngine: Send + Sync {
    /// Engine name for diagnostics
    fn name(&self) -> &str;

    /// Compile `bytes` into the module's main function
    ///
    /// `chunk` is the module id or file path, used in error messages and
    /// as the function name in tracebacks.
    fn compile(&self, chunk: &str, bytes: &[u8]) -> Result<ScriptFunction, ScriptError>;
}
