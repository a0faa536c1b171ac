//! Runtime error types.

use tallow_core::ScriptError;

/// Errors that can occur while configuring the bridge or running modules.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("Failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No registered module or search path entry matched
    #[error("Module '{name}' not found; tried:{tried}")]
    ModuleNotFound {
        /// Requested module name
        name: String,
        /// Candidate locations, one per line
        tried: String,
    },

    /// Unload of an id that was never loaded
    #[error("No module registered as '{0}'")]
    UnknownModule(String),

    /// Module id rejected
    #[error("Invalid module id: {0:?}")]
    InvalidModuleId(String),

    /// Engine rejected the module bytes
    #[error("Compile error in '{module}': {message}")]
    Compile {
        /// Module being compiled
        module: String,
        /// Engine diagnostic
        message: String,
    },

    /// Script raised an error while running
    #[error("{0}")]
    Script(#[from] ScriptError),

    /// No engine handle is installed or bound
    #[error("No engine handle is installed for this thread")]
    NoEngine,

    /// The bridge was shut down
    #[error("Bridge is shut down")]
    ShutDown,
}

/// Result alias for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;
