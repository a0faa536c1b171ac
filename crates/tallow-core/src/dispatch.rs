//! Call dispatch
//!
//! Script → native calls resolve a call name, marshal the arguments and send
//! the message inside a protected region that turns host exceptions and
//! panics into [`ScriptError`]s. Native → script calls (handlers invoked by
//! the host during a send) run through the [`Reentry`] scope of the call
//! that is already holding the execution lock.

use crate::context::Context;
use crate::error::{BridgeError, ErrorKind, ScriptError};
use crate::host::{HandlerId, HostException, Receiver};
use crate::marshal::Marshaller;
use crate::native::{NativeArgs, NativeValue};
use crate::proxy::{Ownership, ProxyRef};
use crate::resolver::Resolved;
use crate::state::{InternalFault, ScriptState};
use crate::value::{ScriptFunction, ScriptValue};
use std::any::Any;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Access to the engine for code running while the execution lock is held
///
/// A `Reentry` is created by whoever took the lock and passed down every
/// call path that may re-enter the engine; nothing below it acquires the
/// lock again.
pub struct Reentry<'a> {
    cx: &'a Context,
    state: &'a mut ScriptState,
}

impl<'a> Reentry<'a> {
    /// Wrap a context and the locked state
    pub fn new(cx: &'a Context, state: &'a mut ScriptState) -> Self {
        Self { cx, state }
    }

    /// The bridge context
    pub fn context(&self) -> &'a Context {
        self.cx
    }

    /// The engine state
    pub fn state(&mut self) -> &mut ScriptState {
        self.state
    }

    /// Call a script function, recording it in the traceback
    ///
    /// Errors raised by the function get the traceback at the point of
    /// failure attached. The call record is popped even if the function
    /// panics.
    pub fn call_function(
        &mut self,
        function: &ScriptFunction,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        self.state.enter(function.name().into());
        let outcome = match catch_unwind(AssertUnwindSafe(|| function.call_raw(self, args))) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.state.leave();
                resume_unwind(payload);
            }
        };
        let outcome = outcome.map_err(|err| {
            if err.traceback.is_empty() {
                let traceback = self.state.traceback();
                err.with_traceback(traceback)
            } else {
                err
            }
        });
        self.state.leave();
        outcome
    }

    /// Run a registered handler on behalf of the host
    ///
    /// `encoding` describes the handler's native signature (return type,
    /// then parameters; implicit receiver/selector pairs are dropped).
    /// Arguments are converted to script values, and the first script
    /// result back to the return type. Objects boxed for the return value
    /// are handed to the host with their reference.
    pub fn call_handler(
        &mut self,
        handler: HandlerId,
        encoding: &str,
        args: &NativeArgs,
    ) -> Result<NativeValue, ScriptError> {
        let traceback = |state: &ScriptState, err: BridgeError| err.into_script_error(&state.traceback());
        let signature = match self.cx.signatures().method(encoding) {
            Ok(sig) => sig,
            Err(err) => return Err(traceback(self.state, err.into())),
        };
        let function = self.state.handler(handler).cloned().ok_or_else(|| {
            ScriptError::new(ErrorKind::Script, format!("No script handler registered as {}", handler.0))
        })?;

        let marshaller = Marshaller::new(self.cx);
        let mut script_args = Vec::with_capacity(signature.arity());
        for (i, tag) in signature.params().iter().enumerate() {
            let native = args.get(i).cloned().unwrap_or_default();
            match marshaller.to_script(tag, &native, Ownership::Borrowed) {
                Ok(v) => script_args.push(v),
                Err(err) => return Err(traceback(self.state, err.into())),
            }
        }

        let results = self.call_function(&function, script_args)?;
        let ret = signature.return_type();
        if ret.is_void() {
            return Ok(NativeValue::void());
        }
        let first = results.into_iter().next().unwrap_or_default();
        let mut temps = Vec::new();
        marshaller
            .to_native(self.state, ret, &first, &mut temps)
            .map_err(|err| traceback(self.state, err))
    }

    /// Stack-level call: see [`call`]
    pub fn call_method(&mut self, receiver: &ProxyRef, call_name: &str, nargs: usize) -> Result<usize, ScriptError> {
        call(self.cx, self.state, receiver, call_name, nargs)
    }

    /// Send `call_name` to `receiver` with `args`, returning the result
    ///
    /// Convenience over [`call_method`](Self::call_method): the arguments are
    /// pushed, the call made and the result popped again.
    pub fn send(
        &mut self,
        receiver: &ProxyRef,
        call_name: &str,
        args: Vec<ScriptValue>,
    ) -> Result<ScriptValue, ScriptError> {
        let base = self.state.depth();
        let nargs = args.len();
        for arg in args {
            if let Err(err) = self.state.push(arg) {
                self.state.stack_mut().truncate(base);
                return Err(err);
            }
        }
        let outcome = self.call_method(receiver, call_name, nargs);
        let result = match outcome {
            Ok(0) => ScriptValue::Nil,
            Ok(_) => self.state.stack_mut().pop().map_err(ScriptError::from)?,
            Err(err) => {
                self.state.stack_mut().truncate(base);
                return Err(err);
            }
        };
        self.state.stack_mut().truncate(base);
        Ok(result)
    }

    /// Class proxy by name
    pub fn class(&self, name: &str) -> Option<ProxyRef> {
        self.cx.class_named(name)
    }
}

/// Call `call_name` on `receiver` with the top `nargs` stack values
///
/// The arguments stay where they are; results (0 or 1) are pushed above
/// them and their count returned. On failure nothing is pushed.
///
/// # Panics
///
/// Panics with an [`InternalFault`] if fewer than `nargs` values are on the
/// stack.
pub fn call(
    cx: &Context,
    state: &mut ScriptState,
    receiver: &ProxyRef,
    call_name: &str,
    nargs: usize,
) -> Result<usize, ScriptError> {
    let args = match state.stack().top(nargs) {
        Ok(args) => args.to_vec(),
        Err(_) => InternalFault::raise(format!(
            "call to '{}' expects {} arguments but the stack holds {}",
            call_name,
            nargs,
            state.depth()
        )),
    };
    let target = match receiver.unwrap() {
        Ok(target) => target,
        Err(err) => return Err(BridgeError::from(err).into_script_error(&state.traceback())),
    };
    let resolved = match cx.resolver().resolve(target, call_name) {
        Ok(resolved) => resolved,
        Err(err) => {
            log::debug!("resolution of '{}' failed: {}", call_name, err);
            return Err(err.into_script_error(&state.traceback()));
        }
    };
    invoke(cx, state, receiver, &resolved, args)
}

/// Invoke a resolved method
///
/// Pushes the converted return value (nothing for void) and returns the
/// number of values pushed. Host failures surface as [`ScriptError`]s with
/// the stack left at its entry depth.
pub fn invoke(
    cx: &Context,
    state: &mut ScriptState,
    receiver: &ProxyRef,
    resolved: &Resolved,
    args: Vec<ScriptValue>,
) -> Result<usize, ScriptError> {
    state.balanced(|state| {
        perform(cx, state, receiver, resolved, &args)
            .map_err(|err| err.into_script_error(&state.traceback()))
    })
}

fn perform(
    cx: &Context,
    state: &mut ScriptState,
    receiver: &ProxyRef,
    resolved: &Resolved,
    args: &[ScriptValue],
) -> Result<usize, BridgeError> {
    let host = cx.host();
    let marshaller = Marshaller::new(cx);
    let signature = &resolved.signature;
    let mut native_args = marshaller.arguments(state, signature, args, resolved.method.variadic)?;

    let target = receiver.unwrap()?;
    let (target, allocated) = if resolved.alloc_first {
        match host.alloc(resolved.class) {
            Ok(object) => (Receiver::Instance(object), Some(object)),
            Err(exception) => {
                marshaller.release_all(native_args.take_temporaries());
                return Err(host_failure(cx, target, &resolved.method.selector, exception).into());
            }
        }
    } else {
        (target, None)
    };

    let sent = protected(|| {
        let mut reentry = Reentry::new(cx, &mut *state);
        host.send(target, &resolved.method, &native_args, &mut reentry)
    });
    marshaller.release_all(native_args.take_temporaries());
    let swept = state.release_handlers(host.take_released_handlers());
    if swept > 0 {
        log::trace!(target: "tallow::gc", "released {} script handlers", swept);
    }

    let ret = match sent {
        Ok(ret) => ret,
        Err(exception) => {
            if let Some(object) = allocated {
                host.release(object);
            }
            return Err(host_failure(cx, target, &resolved.method.selector, exception).into());
        }
    };

    let ownership = if resolved.family.is_init() {
        if allocated.is_none() {
            receiver.consume();
        }
        Ownership::Owned
    } else {
        Ownership::infer(&resolved.method.selector)
    };

    let ret_tag = signature.return_type();
    if ret_tag.is_void() {
        return Ok(0);
    }
    let value = marshaller.to_script(ret_tag, &ret, ownership)?;
    state.push(value)?;
    Ok(1)
}

fn host_failure(cx: &Context, target: Receiver, selector: &str, exception: HostException) -> ScriptError {
    let prefix = match target {
        Receiver::Instance(_) => '-',
        Receiver::Class(_) => '+',
    };
    let message = format!("{}[{} {}] failed: {}", prefix, cx.describe(target), selector, exception);
    log::warn!("{}", message);
    ScriptError::new(ErrorKind::Host, message)
}

/// Run `f`, converting panics into host exceptions
///
/// [`InternalFault`] panics are contract violations and keep unwinding.
pub fn protected<F>(f: F) -> Result<NativeValue, HostException>
where
    F: FnOnce() -> Result<NativeValue, HostException>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(outcome) => outcome,
        Err(payload) => {
            if payload.is::<InternalFault>() {
                resume_unwind(payload);
            }
            Err(HostException::new("panic", panic_message(payload.as_ref())))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
