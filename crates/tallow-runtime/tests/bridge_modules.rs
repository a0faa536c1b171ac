//! Module loading and engine handles
//!
//! Tests for:
//! - Search-path resolution with `?` templates and dotted names
//! - Registered modules taking precedence over files
//! - Error reporting for missing, malformed and failing modules
//! - The current module id while a module runs
//! - Thread-bound and installed engine handles

use parking_lot::Mutex;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tallow_core::testing::MockRuntime;
use tallow_core::{ErrorKind, ScriptError, ScriptFunction, ScriptValue};
use tallow_runtime::{
    bind_to_thread, current_engine_handle, Bridge, BridgeConfig, PointerWidthSetting, RuntimeError, ScriptEngine,
};
use tempfile::TempDir;

/// Engine whose modules return their own source text
///
/// `error <msg>` raises `msg`, `panic` panics; sources starting with
/// `syntax error` fail to compile. Every run records the module id it saw.
#[derive(Default)]
struct TextEngine {
    runs: Arc<Mutex<Vec<String>>>,
}

impl ScriptEngine for TextEngine {
    fn name(&self) -> &str {
        "text"
    }

    fn compile(&self, chunk: &str, bytes: &[u8]) -> Result<ScriptFunction, ScriptError> {
        let source = std::str::from_utf8(bytes)
            .map_err(|_| ScriptError::script(format!("{}: not UTF-8", chunk)))?
            .trim()
            .to_string();
        if source.starts_with("syntax error") {
            return Err(ScriptError::script(format!("{}:1: unexpected symbol", chunk)));
        }
        let runs = Arc::clone(&self.runs);
        Ok(ScriptFunction::new(chunk, move |reentry, _| {
            let module = reentry.state().current_module().unwrap_or_default().to_string();
            runs.lock().push(module);
            if source == "panic" {
                panic!("module body panicked");
            }
            match source.strip_prefix("error ") {
                Some(message) => Err(ScriptError::script(message)),
                None => Ok(vec![ScriptValue::from(source.as_str())]),
            }
        }))
    }
}

fn bridge_in(dir: &TempDir) -> (Bridge, Arc<Mutex<Vec<String>>>) {
    let engine = TextEngine::default();
    let runs = Arc::clone(&engine.runs);
    let bridge = Bridge::new(Arc::new(MockRuntime::new()), Arc::new(engine), &BridgeConfig::default())
        .unwrap()
        .with_search_root(dir.path());
    (bridge, runs)
}

fn write(dir: &TempDir, relative: &str, content: &str) {
    let path = dir.path().join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn test_run_module_from_search_path() {
    let dir = TempDir::new().unwrap();
    write(&dir, "ui/main.lua", "hello");
    let (bridge, runs) = bridge_in(&dir);

    let results = bridge.try_run_module("ui.main").unwrap();

    assert_eq!(results, vec![ScriptValue::from("hello")]);
    assert_eq!(*runs.lock(), vec!["ui.main".to_string()]);
    assert_eq!(bridge.current_module_id(), None);
}

#[test]
fn test_init_template_is_second_choice() {
    let dir = TempDir::new().unwrap();
    write(&dir, "net/init.lua", "package");
    let (bridge, _) = bridge_in(&dir);

    assert_eq!(bridge.try_run_module("net").unwrap(), vec![ScriptValue::from("package")]);
}

#[test]
fn test_registered_module_wins() {
    let dir = TempDir::new().unwrap();
    write(&dir, "ui/main.lua", "from disk");
    let (bridge, _) = bridge_in(&dir);

    assert!(bridge.load_module(b"from registry", "ui.main"));
    assert_eq!(bridge.try_run_module("ui.main").unwrap(), vec![ScriptValue::from("from registry")]);

    assert!(bridge.unload_module("ui.main"));
    assert_eq!(bridge.try_run_module("ui.main").unwrap(), vec![ScriptValue::from("from disk")]);
}

#[test]
fn test_unload_unknown_module_fails() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);

    assert!(!bridge.unload_module("never.loaded"));
    assert!(!bridge.load_module(b"x", ""));
}

#[test]
fn test_missing_module_lists_tried_paths() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);

    assert!(!bridge.run_module("nope"));
    match bridge.try_run_module("nope") {
        Err(RuntimeError::ModuleNotFound { name, tried }) => {
            assert_eq!(name, "nope");
            assert!(tried.contains("nope.lua"));
            assert!(tried.contains("init.lua"));
        }
        other => panic!("expected ModuleNotFound, got {:?}", other),
    }
}

#[test]
fn test_direct_file_path_uses_stem_as_id() {
    let dir = TempDir::new().unwrap();
    write(&dir, "boot.lua", "booted");
    let (bridge, runs) = bridge_in(&dir);
    let path = dir.path().join("boot.lua");

    assert!(bridge.run_module(path.to_str().unwrap()));
    assert_eq!(*runs.lock(), vec!["boot".to_string()]);
}

#[test]
fn test_script_error_carries_module_traceback() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);
    bridge.load_module(b"error attempt to call a nil value", "broken");

    match bridge.try_run_module("broken") {
        Err(RuntimeError::Script(err)) => {
            assert_eq!(err.kind, ErrorKind::Script);
            assert_eq!(err.message, "attempt to call a nil value");
            assert!(err.traceback.contains("in function 'broken'"));
            assert!(err.traceback.contains("in module 'broken'"));
        }
        other => panic!("expected a script error, got {:?}", other),
    }
    assert!(!bridge.lock().is_locked());
    assert_eq!(bridge.lock().with(|state| state.depth()), 0);
}

#[test]
fn test_panicking_module_restores_state() {
    let dir = TempDir::new().unwrap();
    let (bridge, runs) = bridge_in(&dir);
    bridge.load_module(b"panic", "crashy");
    bridge.load_module(b"fine", "fine");

    let outcome = catch_unwind(AssertUnwindSafe(|| bridge.try_run_module("crashy")));

    assert!(outcome.is_err());
    assert_eq!(bridge.current_module_id(), None);
    assert!(!bridge.lock().is_locked());
    bridge.lock().with(|state| {
        assert_eq!(state.current_module(), None);
        assert!(state.calls().is_empty());
    });
    assert_eq!(bridge.try_run_module("fine").unwrap(), vec![ScriptValue::from("fine")]);
    assert_eq!(*runs.lock(), vec!["crashy".to_string(), "fine".to_string()]);
}

#[test]
fn test_run_module_under_held_lock() {
    let dir = TempDir::new().unwrap();
    let (bridge, runs) = bridge_in(&dir);
    bridge.load_module(b"nested", "inner");

    let mut guard = bridge.lock().acquire();
    let results = bridge.try_run_module_with(&mut guard, "inner").unwrap();
    assert_eq!(guard.current_module(), None);
    drop(guard);

    assert_eq!(results, vec![ScriptValue::from("nested")]);
    assert_eq!(*runs.lock(), vec!["inner".to_string()]);
}

#[test]
fn test_compile_error() {
    let dir = TempDir::new().unwrap();
    let (bridge, runs) = bridge_in(&dir);
    bridge.load_module(b"syntax error here", "bad");

    assert!(matches!(bridge.try_run_module("bad"), Err(RuntimeError::Compile { .. })));
    assert!(runs.lock().is_empty());
}

#[test]
fn test_shutdown_disables_runs() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);
    bridge.load_module(b"ok", "m");

    assert!(bridge.initialization_succeeded());
    bridge.shutdown();
    assert!(!bridge.initialization_succeeded());
    assert!(!bridge.run_module("m"));
}

#[test]
fn test_call_function_takes_lock() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);
    let held = ScriptFunction::new("depth_check", |reentry, args| {
        let depth = reentry.state().depth() as i64;
        Ok(vec![ScriptValue::Integer(depth), ScriptValue::Integer(args.len() as i64)])
    });

    let results = bridge
        .call_function(&held, vec![ScriptValue::Nil, ScriptValue::Nil])
        .unwrap();

    assert_eq!(results, vec![ScriptValue::Integer(0), ScriptValue::Integer(2)]);
    assert!(!bridge.lock().is_locked());
}

#[test]
fn test_pointer_width_from_config() {
    let config = BridgeConfig {
        pointer_width: PointerWidthSetting::Bits32,
        ..BridgeConfig::default()
    };
    let bridge = Bridge::new(Arc::new(MockRuntime::new()), Arc::new(TextEngine::default()), &config).unwrap();

    assert_eq!(bridge.context().layout().pointer_size(), 4);
}

#[test]
fn test_thread_binding_and_free_functions() {
    let dir = TempDir::new().unwrap();
    let (bridge, runs) = bridge_in(&dir);
    let bridge = Arc::new(bridge);

    bind_to_thread(Some(Arc::clone(&bridge)));
    assert!(Arc::ptr_eq(&current_engine_handle().unwrap(), &bridge));
    assert!(tallow_runtime::initialization_succeeded());
    assert!(tallow_runtime::load_module(b"bound", "bound.module"));
    assert!(tallow_runtime::run_module("bound.module"));
    assert!(tallow_runtime::unload_module("bound.module"));
    assert!(!tallow_runtime::unload_module("bound.module"));
    bind_to_thread(None);

    assert_eq!(*runs.lock(), vec!["bound.module".to_string()]);
    assert_eq!(tallow_runtime::is_64bit_process(), cfg!(target_pointer_width = "64"));
}

#[test]
fn test_installed_handle_is_process_wide() {
    let dir = TempDir::new().unwrap();
    let (bridge, _) = bridge_in(&dir);
    let bridge = Arc::new(bridge);
    let previous = tallow_runtime::install(Arc::clone(&bridge));
    assert!(previous.is_none());

    let seen = std::thread::spawn(|| current_engine_handle().map(|b| Arc::as_ptr(&b) as usize))
        .join()
        .unwrap();
    assert_eq!(seen, Some(Arc::as_ptr(&bridge) as usize));

    let removed = tallow_runtime::uninstall().unwrap();
    assert!(Arc::ptr_eq(&removed, &bridge));
    let none = std::thread::spawn(|| current_engine_handle().is_none()).join().unwrap();
    assert!(none);
}
