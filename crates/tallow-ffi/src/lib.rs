//! C FFI bindings for the Tallow bridge
//!
//! This module exposes the engine-handle operations to C callers. The API
//! follows these principles:
//! - ABI-stable (uses only C-compatible types)
//! - Operations act on the calling thread's engine handle
//! - Failures return `false`/NULL and are logged; an optional error
//!   out-parameter carries the message
//! - Strings returned to C are owned by the caller and freed with
//!   `tallow_string_free()`

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;
use tallow_core::{ExecGuard, ScriptValue};
use tallow_runtime::{bridge_log, handle, Bridge, LogFlags, RuntimeError};

// ============================================================================
// Opaque Types
// ============================================================================

/// Opaque handle to an engine
#[repr(C)]
pub struct TallowEngine {
    _private: [u8; 0],
}

/// Error information
#[repr(C)]
pub struct TallowError {
    message: *mut c_char,
}

thread_local! {
    /// Locks taken by `tallow_begin_exec`, with the engine each belongs to
    static EXEC_GUARDS: RefCell<Vec<(Arc<Bridge>, ExecGuard)>> = const { RefCell::new(Vec::new()) };
}

// ============================================================================
// Helper Functions
// ============================================================================

fn rust_to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Set error out-parameter
unsafe fn set_error(error_out: *mut *mut TallowError, message: &str) {
    if !error_out.is_null() {
        let err = Box::new(TallowError {
            message: rust_to_c_string(message),
        });
        *error_out = Box::into_raw(err);
    }
}

/// Borrow a C string argument
unsafe fn c_str_arg<'a>(s: *const c_char, what: &str) -> Result<&'a str, String> {
    if s.is_null() {
        return Err(format!("{} is NULL", what));
    }
    CStr::from_ptr(s)
        .to_str()
        .map_err(|_| format!("{} is not valid UTF-8", what))
}

fn engine() -> Result<Arc<Bridge>, String> {
    handle::current_engine_handle().ok_or_else(|| RuntimeError::NoEngine.to_string())
}

unsafe fn report(operation: &str, error: *mut *mut TallowError, message: String) -> bool {
    bridge_log!(LogFlags::ERROR, "{} failed: {}", operation, message);
    set_error(error, &message);
    false
}

// ============================================================================
// Module Functions
// ============================================================================

/// Load and run a script module
///
/// `path` is a registered module id, a file path or a dotted module name
/// on the configured search path.
///
/// # Arguments
/// * `path` - Null-terminated module path
/// * `error` - Optional pointer to receive error information
///
/// # Returns
/// * true on success, false on failure (check error parameter)
///
/// Between `tallow_begin_exec()` and `tallow_end_exec()` the module runs
/// under the lock already held by this thread.
///
/// # Safety
/// Path must be a valid null-terminated string
///
/// # Example (C)
/// ```c
/// TallowError* error = NULL;
/// if (!tallow_run_module("app.main", &error)) {
///     fprintf(stderr, "%s\n", tallow_error_message(error));
///     tallow_error_free(error);
/// }
/// ```
#[no_mangle]
pub unsafe extern "C" fn tallow_run_module(path: *const c_char, error: *mut *mut TallowError) -> bool {
    let outcome = c_str_arg(path, "path")
        .and_then(|path| Ok((path, engine()?)))
        .and_then(|(path, bridge)| run_module(&bridge, path).map_err(|e| e.to_string()));
    match outcome {
        Ok(_) => true,
        Err(message) => report("tallow_run_module", error, message),
    }
}

/// Run a module, reusing this thread's exec guard for the same engine
fn run_module(bridge: &Arc<Bridge>, path: &str) -> Result<Vec<ScriptValue>, RuntimeError> {
    let held = EXEC_GUARDS.with(|guards| {
        let mut guards = guards.borrow_mut();
        let reuse = matches!(guards.last(), Some((owner, _)) if Arc::ptr_eq(owner, bridge));
        if reuse {
            guards.pop()
        } else {
            None
        }
    });
    let Some((owner, mut guard)) = held else {
        return bridge.try_run_module(path);
    };
    let outcome = bridge.try_run_module_with(&mut guard, path);
    EXEC_GUARDS.with(|guards| guards.borrow_mut().push((owner, guard)));
    outcome
}

/// Register a precompiled module under an id
///
/// # Arguments
/// * `buffer` - Module bytes
/// * `size` - Length of `buffer` in bytes
/// * `module_id` - Null-terminated module id
/// * `error` - Optional pointer to receive error information
///
/// # Safety
/// - Buffer must be valid for `size` bytes
/// - Module id must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn tallow_load_module(
    buffer: *const u8,
    size: usize,
    module_id: *const c_char,
    error: *mut *mut TallowError,
) -> bool {
    if buffer.is_null() && size > 0 {
        return report("tallow_load_module", error, "buffer is NULL".to_string());
    }
    let bytes: &[u8] = if size == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(buffer, size)
    };
    let outcome = c_str_arg(module_id, "module id")
        .and_then(|id| Ok((id, engine()?)))
        .and_then(|(id, bridge)| bridge.modules().load(id, bytes).map_err(|e| e.to_string()));
    match outcome {
        Ok(()) => true,
        Err(message) => report("tallow_load_module", error, message),
    }
}

/// Deregister a module; unknown ids fail
///
/// # Safety
/// Module id must be a valid null-terminated string
#[no_mangle]
pub unsafe extern "C" fn tallow_unload_module(module_id: *const c_char, error: *mut *mut TallowError) -> bool {
    let outcome = c_str_arg(module_id, "module id")
        .and_then(|id| Ok((id, engine()?)))
        .and_then(|(id, bridge)| bridge.modules().unload(id).map_err(|e| e.to_string()));
    match outcome {
        Ok(()) => true,
        Err(message) => report("tallow_unload_module", error, message),
    }
}

// ============================================================================
// Engine State
// ============================================================================

/// Engine handle for the calling thread
///
/// # Returns
/// * Borrowed handle, valid while the engine stays installed or bound
/// * NULL if no engine is available
#[no_mangle]
pub extern "C" fn tallow_current_engine_handle() -> *const TallowEngine {
    match handle::current_engine_handle() {
        Some(bridge) => Arc::as_ptr(&bridge) as *const TallowEngine,
        None => ptr::null(),
    }
}

/// Whether a usable engine is available to the calling thread
#[no_mangle]
pub extern "C" fn tallow_init_success() -> bool {
    handle::initialization_succeeded()
}

/// Id of the module currently executing
///
/// # Returns
/// * Newly allocated string, free with `tallow_string_free()`
/// * NULL if no module is running
#[no_mangle]
pub extern "C" fn tallow_current_module_id() -> *mut c_char {
    match handle::current_module_id() {
        Some(id) => rust_to_c_string(&id),
        None => ptr::null_mut(),
    }
}

/// Whether the process uses 64-bit pointers
#[no_mangle]
pub extern "C" fn tallow_is_64bit_process() -> bool {
    handle::is_64bit_process()
}

// ============================================================================
// Execution Lock
// ============================================================================

/// Take the execution lock for the calling thread
///
/// Every successful call must be matched by `tallow_end_exec()` on the same
/// thread. Taking the lock twice on one thread is an unrecoverable fault
/// and aborts the process.
///
/// # Returns
/// * false if no engine is available
#[no_mangle]
pub extern "C" fn tallow_begin_exec() -> bool {
    let Some(bridge) = handle::current_engine_handle() else {
        bridge_log!(LogFlags::ERROR, "tallow_begin_exec: no engine handle installed");
        return false;
    };
    let guard = bridge.lock().acquire();
    EXEC_GUARDS.with(|guards| guards.borrow_mut().push((bridge, guard)));
    true
}

/// Release the lock taken by the matching `tallow_begin_exec()`
#[no_mangle]
pub extern "C" fn tallow_end_exec() {
    let released = EXEC_GUARDS.with(|guards| guards.borrow_mut().pop());
    if released.is_none() {
        log::warn!("tallow_end_exec without a matching tallow_begin_exec");
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Get the error message
///
/// # Returns
/// * Pointer to the message, owned by the error; NULL if `error` is NULL
///
/// # Safety
/// Error pointer must be valid (created by the Tallow API)
#[no_mangle]
pub unsafe extern "C" fn tallow_error_message(error: *const TallowError) -> *const c_char {
    if error.is_null() {
        return ptr::null();
    }
    (*error).message
}

/// Free an error
///
/// # Safety
/// - Error pointer must be valid (created by the Tallow API)
/// - Error must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn tallow_error_free(error: *mut TallowError) {
    if error.is_null() {
        return;
    }
    let error = Box::from_raw(error);
    if !error.message.is_null() {
        drop(CString::from_raw(error.message));
    }
}

/// Free a string returned by the Tallow API
///
/// # Safety
/// - String must have been returned by a Tallow function
/// - String must not be used after this call
#[no_mangle]
pub unsafe extern "C" fn tallow_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tallow_core::testing::MockRuntime;
    use tallow_core::{ScriptError, ScriptFunction};
    use tallow_runtime::{BridgeConfig, ScriptEngine};

    struct ModuleIdEngine;

    impl ScriptEngine for ModuleIdEngine {
        fn name(&self) -> &str {
            "module-id"
        }

        fn compile(&self, chunk: &str, bytes: &[u8]) -> Result<ScriptFunction, ScriptError> {
            if bytes.is_empty() {
                return Err(ScriptError::script(format!("{}: empty chunk", chunk)));
            }
            Ok(ScriptFunction::new(chunk, |_, _| {
                let id = tallow_current_module_id();
                let seen = unsafe { CStr::from_ptr(id) }.to_string_lossy().into_owned();
                unsafe { tallow_string_free(id) };
                Ok(vec![ScriptValue::from(seen)])
            }))
        }
    }

    fn bind() -> Arc<Bridge> {
        let bridge = Arc::new(
            Bridge::new(Arc::new(MockRuntime::new()), Arc::new(ModuleIdEngine), &BridgeConfig::default()).unwrap(),
        );
        handle::bind_to_thread(Some(Arc::clone(&bridge)));
        bridge
    }

    #[test]
    fn test_module_lifecycle() {
        let bridge = bind();
        unsafe {
            let mut error: *mut TallowError = ptr::null_mut();
            let chunk = b"main";
            assert!(tallow_load_module(
                chunk.as_ptr(),
                chunk.len(),
                b"app.main\0".as_ptr() as *const c_char,
                &mut error
            ));
            assert!(tallow_run_module(b"app.main\0".as_ptr() as *const c_char, &mut error));
            assert!(error.is_null());
            assert!(tallow_unload_module(b"app.main\0".as_ptr() as *const c_char, &mut error));

            assert!(!tallow_unload_module(b"app.main\0".as_ptr() as *const c_char, &mut error));
            assert!(!error.is_null());
            let message = CStr::from_ptr(tallow_error_message(error)).to_str().unwrap();
            assert!(message.contains("app.main"));
            tallow_error_free(error);
        }
        assert_eq!(tallow_current_engine_handle(), Arc::as_ptr(&bridge) as *const TallowEngine);
        assert!(tallow_current_module_id().is_null());
        handle::bind_to_thread(None);
    }

    #[test]
    fn test_null_arguments() {
        let _bridge = bind();
        unsafe {
            let mut error: *mut TallowError = ptr::null_mut();
            assert!(!tallow_run_module(ptr::null(), &mut error));
            assert!(!error.is_null());
            tallow_error_free(error);

            assert!(!tallow_load_module(ptr::null(), 4, b"x\0".as_ptr() as *const c_char, ptr::null_mut()));
        }
        handle::bind_to_thread(None);
    }

    #[test]
    fn test_exec_lock_pairing() {
        let bridge = bind();
        assert!(tallow_init_success());
        assert!(tallow_begin_exec());
        assert!(bridge.lock().is_held_by_current_thread());
        tallow_end_exec();
        assert!(!bridge.lock().is_locked());
        tallow_end_exec();
        handle::bind_to_thread(None);
    }

    #[test]
    fn test_run_module_inside_exec_pair() {
        let bridge = bind();
        let chunk = b"main";
        unsafe {
            assert!(tallow_load_module(
                chunk.as_ptr(),
                chunk.len(),
                b"locked\0".as_ptr() as *const c_char,
                ptr::null_mut()
            ));
            assert!(tallow_begin_exec());
            let mut error: *mut TallowError = ptr::null_mut();
            assert!(tallow_run_module(b"locked\0".as_ptr() as *const c_char, &mut error));
            assert!(error.is_null());
        }
        assert!(bridge.lock().is_held_by_current_thread());
        tallow_end_exec();
        assert!(!bridge.lock().is_locked());
        handle::bind_to_thread(None);
    }

    #[test]
    fn test_no_engine_on_fresh_thread() {
        let results = std::thread::spawn(|| {
            (
                tallow_begin_exec(),
                tallow_current_engine_handle().is_null(),
                unsafe { tallow_run_module(b"a\0".as_ptr() as *const c_char, ptr::null_mut()) },
            )
        })
        .join()
        .unwrap();
        assert_eq!(results, (false, true, false));
    }

    #[test]
    fn test_string_free_accepts_null() {
        unsafe { tallow_string_free(ptr::null_mut()) };
        assert_eq!(tallow_is_64bit_process(), cfg!(target_pointer_width = "64"));
    }
}
