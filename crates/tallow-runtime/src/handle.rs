//! Process-wide and per-thread engine handles
//!
//! Embedders [`install`] one bridge for the process. A thread that runs a
//! different engine (a worker with its own state) binds it with
//! [`bind_to_thread`]; lookups from that thread see the binding first.
//! The free functions here are the handle-based entry points the C API
//! forwards to.

use crate::bridge::Bridge;
use crate::bridge_log;
use crate::logging::LogFlags;
use parking_lot::RwLock;
use std::cell::RefCell;
use std::sync::Arc;

static INSTALLED: RwLock<Option<Arc<Bridge>>> = RwLock::new(None);

thread_local! {
    static BOUND: RefCell<Option<Arc<Bridge>>> = const { RefCell::new(None) };
}

/// Set the process-wide handle, returning the previous one
pub fn install(bridge: Arc<Bridge>) -> Option<Arc<Bridge>> {
    INSTALLED.write().replace(bridge)
}

/// Clear the process-wide handle
pub fn uninstall() -> Option<Arc<Bridge>> {
    INSTALLED.write().take()
}

/// Bind a handle to the calling thread (or clear the binding with `None`)
pub fn bind_to_thread(bridge: Option<Arc<Bridge>>) -> Option<Arc<Bridge>> {
    BOUND.with(|bound| std::mem::replace(&mut *bound.borrow_mut(), bridge))
}

/// Handle for the calling thread: its binding, else the installed one
pub fn current_engine_handle() -> Option<Arc<Bridge>> {
    BOUND
        .with(|bound| bound.borrow().clone())
        .or_else(|| INSTALLED.read().clone())
}

fn with_handle<R>(operation: &str, default: R, f: impl FnOnce(&Bridge) -> R) -> R {
    match current_engine_handle() {
        Some(bridge) => f(&bridge),
        None => {
            bridge_log!(LogFlags::ERROR, "{}: no engine handle installed", operation);
            default
        }
    }
}

/// Run a module on the current engine
pub fn run_module(path: &str) -> bool {
    with_handle("run_module", false, |bridge| bridge.run_module(path))
}

/// Register a precompiled module on the current engine
pub fn load_module(bytes: &[u8], module_id: &str) -> bool {
    with_handle("load_module", false, |bridge| bridge.load_module(bytes, module_id))
}

/// Deregister a module on the current engine
pub fn unload_module(module_id: &str) -> bool {
    with_handle("unload_module", false, |bridge| bridge.unload_module(module_id))
}

/// Whether a usable engine is available to the calling thread
pub fn initialization_succeeded() -> bool {
    current_engine_handle().is_some_and(|bridge| bridge.initialization_succeeded())
}

/// Module executing on the current engine, if any
pub fn current_module_id() -> Option<String> {
    current_engine_handle().and_then(|bridge| bridge.current_module_id())
}

/// Whether the process uses 64-bit pointers
pub fn is_64bit_process() -> bool {
    cfg!(target_pointer_width = "64")
}
