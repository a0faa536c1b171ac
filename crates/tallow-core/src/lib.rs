//! Tallow bridge core
//!
//! This crate lets scripts of an embedded, stack-based engine call methods
//! on objects of a dynamically dispatched host object runtime, and lets the
//! host call back into script handlers:
//! - Type-encoding parser, layout and signature cache
//! - Value marshaller between script values and native buffers
//! - Method resolver with call-name type flags
//! - Instance proxies with explicit ownership
//! - Protected call dispatch and the execution lock

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod context;
pub mod dispatch;
pub mod encoding;
pub mod error;
pub mod host;
pub mod lock;
pub mod marshal;
pub mod native;
pub mod proxy;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod testing;
pub mod value;

pub use context::{Context, ContextOptions};
pub use dispatch::{call, invoke, protected, Reentry};
pub use encoding::{Layout, PointerWidth, Signature, SignatureCache, TypeTag};
pub use error::{
    BridgeError, BridgeResult, Candidate, ConversionError, ErrorKind, InvalidProxyError, NotFoundError,
    NotFoundKind, ParseError, ScriptError,
};
pub use host::{
    ClassRef, HandlerId, HostException, HostMethod, HostPrimitive, HostRef, HostRuntime, MethodKind, Receiver,
    SelectorRef,
};
pub use lock::{ExecGuard, ExecutionLock};
pub use marshal::Marshaller;
pub use native::{NativeArgs, NativeValue};
pub use proxy::{InstanceProxy, MethodFamily, Ownership, ProxyKind, ProxyManager, ProxyRef};
pub use resolver::{CallName, ClassRegistry, MethodTable, Resolved, Resolver, TypeFlag};
pub use stack::{ScriptStack, StackError};
pub use state::{InternalFault, ScriptState};
pub use value::{ScriptFunction, ScriptValue};
