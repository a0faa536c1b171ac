//! The bridge: context, execution lock, engine and modules together
//!
//! A [`Bridge`] is the engine handle embedders install. Every entry from
//! native code (running a module, calling a script function) takes the
//! execution lock for the duration of the call; anything that happens
//! inside that call re-enters through the [`Reentry`] scope instead.

use crate::bridge_log;
use crate::config::BridgeConfig;
use crate::engine::ScriptEngine;
use crate::error::RuntimeError;
use crate::logging::{self, LogFlags};
use crate::modules::{module_id_for_path, ModuleRegistry, SearchPath};
use parking_lot::RwLock;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tallow_core::{
    Context, ExecutionLock, HostRuntime, ProxyRef, Reentry, ScriptError, ScriptFunction, ScriptState, ScriptValue,
};

/// Engine handle
pub struct Bridge {
    cx: Arc<Context>,
    lock: ExecutionLock,
    engine: Arc<dyn ScriptEngine>,
    modules: ModuleRegistry,
    search: SearchPath,
    current_module: RwLock<Option<String>>,
    initialized: AtomicBool,
}

impl Bridge {
    /// Create a bridge over `host`, compiling modules with `engine`
    ///
    /// Applies the configured log categories process-wide.
    pub fn new(
        host: Arc<dyn HostRuntime>,
        engine: Arc<dyn ScriptEngine>,
        config: &BridgeConfig,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        logging::set_log_flags(config.log_mask()?);

        let cx = Arc::new(Context::with_options(host, config.context_options()));
        let lock = ExecutionLock::new(ScriptState::with_max_stack(config.max_stack));
        bridge_log!(
            LogFlags::DEBUG,
            "bridge initialized: engine {}, {}-bit layout",
            engine.name(),
            cx.layout().pointer_size() * 8
        );
        Ok(Self {
            cx,
            lock,
            engine,
            modules: ModuleRegistry::new(),
            search: SearchPath::new(config.module_path.clone()),
            current_module: RwLock::new(None),
            initialized: AtomicBool::new(true),
        })
    }

    /// Resolve relative search templates against `root`
    pub fn with_search_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.search = self.search.with_root(root);
        self
    }

    /// Shared bridge context
    pub fn context(&self) -> &Arc<Context> {
        &self.cx
    }

    /// Execution lock guarding the engine state
    pub fn lock(&self) -> &ExecutionLock {
        &self.lock
    }

    /// Precompiled modules
    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Module search path
    pub fn search_path(&self) -> &SearchPath {
        &self.search
    }

    /// Whether construction completed and the bridge has not been shut down
    pub fn initialization_succeeded(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Mark the bridge unusable; later module runs fail
    pub fn shutdown(&self) {
        if self.initialized.swap(false, Ordering::AcqRel) {
            bridge_log!(LogFlags::DEBUG, "bridge shut down");
        }
    }

    /// Id of the module currently executing, if any
    pub fn current_module_id(&self) -> Option<String> {
        self.current_module.read().clone()
    }

    /// Register a precompiled module; failures are logged
    pub fn load_module(&self, bytes: &[u8], module_id: &str) -> bool {
        match self.modules.load(module_id, bytes) {
            Ok(()) => true,
            Err(err) => {
                bridge_log!(LogFlags::ERROR, "load_module failed: {}", err);
                false
            }
        }
    }

    /// Deregister a module; unknown ids fail and are logged
    pub fn unload_module(&self, module_id: &str) -> bool {
        match self.modules.unload(module_id) {
            Ok(()) => true,
            Err(err) => {
                bridge_log!(LogFlags::ERROR, "unload_module failed: {}", err);
                false
            }
        }
    }

    /// Run a module; failures are logged
    pub fn run_module(&self, path: &str) -> bool {
        match self.try_run_module(path) {
            Ok(_) => true,
            Err(err) => {
                bridge_log!(LogFlags::ERROR, "run_module '{}' failed: {}", path, err);
                false
            }
        }
    }

    /// Run a module, returning its results
    ///
    /// `path` is tried as a registered module id, then as a file path,
    /// then as a dotted module name on the search path.
    ///
    /// # Panics
    ///
    /// Panics with an internal fault if the calling thread holds the
    /// execution lock; such callers use
    /// [`try_run_module_with`](Self::try_run_module_with).
    pub fn try_run_module(&self, path: &str) -> Result<Vec<ScriptValue>, RuntimeError> {
        let (id, function) = self.prepare(path)?;
        let mut guard = self.lock.acquire();
        self.execute(&mut guard, &id, &function)
    }

    /// Run a module on a thread that already holds the execution lock
    ///
    /// `state` must be the state guarded by this bridge's lock.
    pub fn try_run_module_with(
        &self,
        state: &mut ScriptState,
        path: &str,
    ) -> Result<Vec<ScriptValue>, RuntimeError> {
        let (id, function) = self.prepare(path)?;
        self.execute(state, &id, &function)
    }

    /// Locate and compile a module, returning its id and body
    fn prepare(&self, path: &str) -> Result<(String, ScriptFunction), RuntimeError> {
        if !self.initialization_succeeded() {
            return Err(RuntimeError::ShutDown);
        }
        let (id, bytes) = match self.modules.get(path) {
            Some(bytes) => (path.to_string(), bytes),
            None => {
                let direct = Path::new(path);
                let (id, file) = if direct.is_file() {
                    (module_id_for_path(direct), direct.to_path_buf())
                } else {
                    (path.to_string(), self.search.find(path)?)
                };
                bridge_log!(LogFlags::DEBUG, "loading module '{}' from {}", id, file.display());
                (id, Arc::from(std::fs::read(&file)?))
            }
        };
        let function = self.engine.compile(&id, &bytes).map_err(|err| RuntimeError::Compile {
            module: id.clone(),
            message: err.message,
        })?;
        Ok((id, function))
    }

    fn execute(
        &self,
        state: &mut ScriptState,
        id: &str,
        function: &ScriptFunction,
    ) -> Result<Vec<ScriptValue>, RuntimeError> {
        let previous_state = state.set_current_module(Some(id.to_string()));
        let previous = self.current_module.write().replace(id.to_string());

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            Reentry::new(&self.cx, &mut *state).call_function(function, Vec::new())
        }));
        if !matches!(outcome, Ok(Ok(_))) {
            logging::dump_stack(state);
        }

        *self.current_module.write() = previous;
        state.set_current_module(previous_state);
        match outcome {
            Ok(results) => Ok(results?),
            Err(payload) => resume_unwind(payload),
        }
    }

    /// Call a script function from native code
    ///
    /// # Panics
    ///
    /// Panics with an internal fault if the calling thread holds the
    /// execution lock; code already inside a call uses its [`Reentry`].
    pub fn call_function(
        &self,
        function: &ScriptFunction,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        self.with_reentry(|reentry| reentry.call_function(function, args))
    }

    /// Send a message to a host object from native code
    pub fn send(&self, receiver: &ProxyRef, call_name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        self.with_reentry(|reentry| reentry.send(receiver, call_name, args))
    }

    /// Run `f` holding the execution lock
    pub fn with_reentry<R>(&self, f: impl FnOnce(&mut Reentry<'_>) -> R) -> R {
        let mut guard = self.lock.acquire();
        let mut reentry = Reentry::new(&self.cx, &mut guard);
        f(&mut reentry)
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("engine", &self.engine.name())
            .field("modules", &self.modules.len())
            .field("current_module", &self.current_module_id())
            .field("initialized", &self.initialization_succeeded())
            .finish()
    }
}
