//! Host object runtime boundary
//!
//! The bridge never touches host objects directly. Everything it needs from
//! the host (reflection metadata, message sends, reference counting, boxing
//! of script primitives) goes through [`HostRuntime`]. References are opaque
//! pointer-sized addresses that only the host dereferences.

use crate::dispatch::Reentry;
use crate::native::{NativeArgs, NativeValue};
use std::fmt;
use std::num::NonZeroUsize;

macro_rules! host_address {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroUsize);

        impl $name {
            /// Wrap a raw address; `None` for the null address
            #[inline]
            pub fn new(address: usize) -> Option<Self> {
                NonZeroUsize::new(address).map(Self)
            }

            /// Wrap a known non-null address
            #[inline]
            pub const fn from_nonzero(address: NonZeroUsize) -> Self {
                Self(address)
            }

            /// Raw address
            #[inline]
            pub fn address(self) -> usize {
                self.0.get()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0.get())
            }
        }
    };
}

host_address!(
    /// Reference to a host object instance
    HostRef
);
host_address!(
    /// Reference to a host class
    ClassRef
);
host_address!(
    /// Host selector identifier
    SelectorRef
);

/// Target of a message send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Receiver {
    /// An object instance
    Instance(HostRef),
    /// A class (class methods)
    Class(ClassRef),
}

impl Receiver {
    /// Raw address of the receiver
    pub fn address(self) -> usize {
        match self {
            Receiver::Instance(r) => r.address(),
            Receiver::Class(c) => c.address(),
        }
    }

    /// Which method table applies to this receiver
    pub fn method_kind(self) -> MethodKind {
        match self {
            Receiver::Instance(_) => MethodKind::Instance,
            Receiver::Class(_) => MethodKind::Class,
        }
    }
}

/// Instance or class method table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Methods sent to instances
    Instance,
    /// Methods sent to the class object
    Class,
}

/// One method as published by host reflection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostMethod {
    /// Selector name (`setValue:forKey:`)
    pub selector: String,

    /// Full type encoding, including receiver and selector
    pub encoding: String,

    /// Whether the method takes a nil-terminated variable argument list
    pub variadic: bool,

    /// Opaque implementation token handed back to [`HostRuntime::send`]
    pub imp: usize,
}

impl HostMethod {
    /// Describe a fixed-arity method
    pub fn new(selector: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            encoding: encoding.into(),
            variadic: false,
            imp: 0,
        }
    }

    /// Attach an implementation token
    pub fn with_imp(mut self, imp: usize) -> Self {
        self.imp = imp;
        self
    }

    /// Mark as variadic
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

/// Failure raised by the host runtime during a call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {reason}")]
pub struct HostException {
    /// Exception class or category
    pub name: String,

    /// Human-readable reason
    pub reason: String,
}

impl HostException {
    /// Create an exception
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Script primitive the host can box into (or unbox from) an object
#[derive(Debug, Clone, PartialEq)]
pub enum HostPrimitive {
    /// String object
    String(String),
    /// Integral number object
    Integer(i64),
    /// Floating-point number object
    Number(f64),
    /// Boolean number object
    Boolean(bool),
}

/// Identifier of a script function registered as a host-callable handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(pub u64);

/// The host object runtime
///
/// Implementations must be thread-safe; the bridge serializes script access
/// but native threads may query reflection metadata concurrently.
pub trait HostRuntime: Send + Sync {
    /// Look a class up by name
    fn lookup_class(&self, name: &str) -> Option<ClassRef>;

    /// Concrete class of an instance; `None` if the object no longer exists
    fn class_of(&self, object: HostRef) -> Option<ClassRef>;

    /// Superclass, `None` for root classes
    fn superclass(&self, class: ClassRef) -> Option<ClassRef>;

    /// Class name
    fn class_name(&self, class: ClassRef) -> String;

    /// Methods declared directly on `class` (not inherited)
    fn methods(&self, class: ClassRef, kind: MethodKind) -> Vec<HostMethod>;

    /// Intern a selector name
    fn register_selector(&self, name: &str) -> SelectorRef;

    /// Name of an interned selector
    fn selector_name(&self, selector: SelectorRef) -> Option<String>;

    /// Send `method` to `receiver`
    ///
    /// `reentry` lets the host call script handlers while the execution lock
    /// is held by this call.
    fn send(
        &self,
        receiver: Receiver,
        method: &HostMethod,
        args: &NativeArgs,
        reentry: &mut Reentry<'_>,
    ) -> Result<NativeValue, HostException>;

    /// Allocate an uninitialized instance (+1 reference)
    fn alloc(&self, class: ClassRef) -> Result<HostRef, HostException>;

    /// Take a reference
    fn retain(&self, object: HostRef);

    /// Drop a reference
    fn release(&self, object: HostRef);

    /// Box a script primitive into a new host object (+1 reference)
    fn box_primitive(&self, _value: &HostPrimitive) -> Option<HostRef> {
        None
    }

    /// Primitive value of a host string/number object, if it is one
    fn unbox(&self, _object: HostRef) -> Option<HostPrimitive> {
        None
    }

    /// Create a host object that forwards invocations to a script handler
    /// (+1 reference)
    fn wrap_handler(&self, _handler: HandlerId) -> Option<HostRef> {
        None
    }

    /// Read a NUL-terminated string owned by the host
    fn read_c_string(&self, _address: usize) -> Option<String> {
        None
    }

    /// Handlers whose handler objects were deallocated since the last call
    ///
    /// The bridge drains this after every send and forgets the listed
    /// handlers.
    fn take_released_handlers(&self) -> Vec<HandlerId> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_address_rejected() {
        assert!(HostRef::new(0).is_none());
        assert_eq!(HostRef::new(0x1000).map(HostRef::address), Some(0x1000));
    }

    #[test]
    fn test_receiver_kind() {
        let obj = HostRef::new(0x10).unwrap();
        let class = ClassRef::new(0x20).unwrap();
        assert_eq!(Receiver::Instance(obj).method_kind(), MethodKind::Instance);
        assert_eq!(Receiver::Class(class).method_kind(), MethodKind::Class);
        assert_eq!(format!("{:?}", obj), "HostRef(0x10)");
    }
}
