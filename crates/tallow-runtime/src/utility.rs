//! Process utilities: cached selectors and the main-thread relay
//!
//! The relay lets any thread ask for a message to be sent later on one
//! designated thread (usually the host's main/UI thread). Requests are
//! queued on a channel and run when that thread calls
//! [`Utility::drain_main_thread`]; results are discarded and failures only
//! logged.

use crate::bridge::Bridge;
use crate::bridge_log;
use crate::logging::LogFlags;
use crossbeam::channel::{self, Receiver, Sender};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use tallow_core::{invoke, BridgeError, HostRef, HostRuntime, ProxyRef, ScriptError, ScriptValue, SelectorRef};

static SHARED: Lazy<Utility> = Lazy::new(Utility::new);

struct RelayTask {
    bridge: Arc<Bridge>,
    receiver: ProxyRef,
    selector: String,
    arg: Option<ScriptValue>,
    retained: Vec<HostRef>,
}

impl RelayTask {
    fn run(&self) -> Result<(), ScriptError> {
        let cx = self.bridge.context();
        let traceback = "stack traceback:\n\t[relay]";
        let target = self
            .receiver
            .unwrap()
            .map_err(|err| BridgeError::from(err).into_script_error(traceback))?;
        let resolved = cx
            .resolver()
            .resolve_selector(target, &self.selector)
            .map_err(|err| err.into_script_error(traceback))?;
        let args: Vec<ScriptValue> = self.arg.iter().cloned().collect();
        self.bridge.lock().with(|state| {
            let base = state.depth();
            let outcome = invoke(cx, state, &self.receiver, &resolved, args);
            state.stack_mut().truncate(base);
            outcome.map(|_| ())
        })
    }
}

impl Drop for RelayTask {
    fn drop(&mut self) {
        let host = self.bridge.context().host();
        for object in self.retained.drain(..) {
            host.release(object);
        }
    }
}

/// Selector cache and main-thread relay
pub struct Utility {
    selectors: DashMap<(usize, String), SelectorRef>,
    sender: Sender<RelayTask>,
    queue: Receiver<RelayTask>,
}

impl Utility {
    /// Fresh utility with its own cache and queue
    pub fn new() -> Self {
        let (sender, queue) = channel::unbounded();
        Self {
            selectors: DashMap::new(),
            sender,
            queue,
        }
    }

    /// Process-wide instance
    pub fn shared() -> &'static Utility {
        &SHARED
    }

    /// Selector for `name`, registered with `host` once
    pub fn selector_from_string(&self, host: &dyn HostRuntime, name: &str) -> SelectorRef {
        let key = (host as *const dyn HostRuntime as *const () as usize, name.to_string());
        *self
            .selectors
            .entry(key)
            .or_insert_with(|| host.register_selector(name))
            .value()
    }

    /// Number of cached selectors
    pub fn cached_selectors(&self) -> usize {
        self.selectors.len()
    }

    /// Queue `selector` to be sent to `receiver` on the draining thread
    ///
    /// The receiver and an object argument are retained until the task has
    /// run or the queue is dropped.
    pub fn perform_on_main_thread_async(
        &self,
        bridge: &Arc<Bridge>,
        receiver: &ProxyRef,
        selector: &str,
        arg: Option<ScriptValue>,
    ) -> Result<(), ScriptError> {
        let host = bridge.context().host();
        let mut retained = Vec::new();
        let proxies = std::iter::once(receiver).chain(arg.as_ref().and_then(ScriptValue::as_proxy));
        for proxy in proxies {
            if let Ok(object) = proxy.unwrap_instance() {
                host.retain(object);
                retained.push(object);
            }
        }
        let task = RelayTask {
            bridge: Arc::clone(bridge),
            receiver: Arc::clone(receiver),
            selector: selector.to_string(),
            arg,
            retained,
        };
        if self.sender.send(task).is_err() {
            return Err(ScriptError::script("relay queue closed"));
        }
        Ok(())
    }

    /// Number of queued tasks
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Run every queued task on the calling thread
    ///
    /// Must be called without holding the execution lock. Returns how many
    /// tasks ran, failed ones included.
    pub fn drain_main_thread(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.queue.try_recv() {
            if let Err(err) = task.run() {
                bridge_log!(LogFlags::ERROR, "relayed -{} failed: {}", task.selector, err);
            }
            ran += 1;
        }
        ran
    }
}

impl Default for Utility {
    fn default() -> Self {
        Self::new()
    }
}
