//! Tallow runtime
//!
//! Binds the bridge core to a script engine: configuration, log
//! categories, module loading, engine handles and the main-thread relay.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod handle;
pub mod logging;
pub mod modules;
pub mod utility;

pub use bridge::Bridge;
pub use config::{BridgeConfig, PointerWidthSetting};
pub use engine::ScriptEngine;
pub use error::{RuntimeError, RuntimeResult};
pub use handle::{
    bind_to_thread, current_engine_handle, current_module_id, initialization_succeeded, install,
    is_64bit_process, load_module, run_module, uninstall, unload_module,
};
pub use logging::{log_flags, set_log_flags, LogFlags};
pub use modules::{ModuleRegistry, SearchPath};
pub use utility::Utility;
