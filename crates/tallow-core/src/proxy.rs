//! Instance proxies
//!
//! A proxy is the script-side handle of one host object or class. Owned
//! proxies hold one host reference and release it exactly once, when the
//! last handle is dropped or the proxy is finalized explicitly. Borrowed
//! proxies never release; their validity follows the host object's own
//! lifetime.

use crate::error::InvalidProxyError;
use crate::host::{ClassRef, HostRef, HostRuntime, Receiver};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Shared handle to a proxy
pub type ProxyRef = Arc<InstanceProxy>;

/// Whether a proxy holds a host reference of its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// One host reference is held and released on finalization
    Owned,
    /// No reference is held
    Borrowed,
}

impl Ownership {
    /// Ownership of an object returned by `selector`
    ///
    /// Results of `alloc`, `new`, `copy`, `mutableCopy` and `init` family
    /// selectors are owned by the caller; everything else is borrowed.
    pub fn infer(selector: &str) -> Self {
        if MethodFamily::of(selector).returns_owned() {
            Ownership::Owned
        } else {
            Ownership::Borrowed
        }
    }
}

/// Memory-management family of a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodFamily {
    /// `alloc…`
    Alloc,
    /// `new…`
    New,
    /// `copy…`
    Copy,
    /// `mutableCopy…`
    MutableCopy,
    /// `init…`
    Init,
    /// Anything else
    None,
}

impl MethodFamily {
    /// Family of `selector`, judged by its first keyword
    ///
    /// Leading underscores are ignored. A family prefix counts only when it
    /// ends the keyword or is followed by a non-lowercase character, so
    /// `initWithFrame:` is in the init family and `initialize` is not.
    pub fn of(selector: &str) -> Self {
        let keyword = selector.split(':').next().unwrap_or("");
        let keyword = keyword.trim_start_matches('_');
        const FAMILIES: [(&str, MethodFamily); 5] = [
            ("alloc", MethodFamily::Alloc),
            ("new", MethodFamily::New),
            ("copy", MethodFamily::Copy),
            ("mutableCopy", MethodFamily::MutableCopy),
            ("init", MethodFamily::Init),
        ];
        for (prefix, family) in FAMILIES {
            if let Some(rest) = keyword.strip_prefix(prefix) {
                if !rest.starts_with(|c: char| c.is_ascii_lowercase()) {
                    return family;
                }
            }
        }
        MethodFamily::None
    }

    /// Whether results of this family come with a reference for the caller
    pub fn returns_owned(self) -> bool {
        !matches!(self, MethodFamily::None)
    }

    /// Whether this is the init family
    pub fn is_init(self) -> bool {
        matches!(self, MethodFamily::Init)
    }
}

/// What a proxy stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// An object instance
    Instance,
    /// A class object
    Class,
}

/// Script handle for one host reference
pub struct InstanceProxy {
    receiver: Receiver,
    ownership: Ownership,
    valid: AtomicBool,
    host: Arc<dyn HostRuntime>,
}

impl InstanceProxy {
    fn new(receiver: Receiver, ownership: Ownership, host: Arc<dyn HostRuntime>) -> Self {
        Self {
            receiver,
            ownership,
            valid: AtomicBool::new(true),
            host,
        }
    }

    /// The wrapped reference, without validity checks
    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    /// Ownership mode
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    /// Instance or class
    pub fn kind(&self) -> ProxyKind {
        match self.receiver {
            Receiver::Instance(_) => ProxyKind::Instance,
            Receiver::Class(_) => ProxyKind::Class,
        }
    }

    /// Whether the proxy has not been finalized or consumed
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// The wrapped reference, checked for validity
    ///
    /// Borrowed instance proxies are also checked against the host: an
    /// object the host no longer knows is reported as deallocated.
    pub fn unwrap(&self) -> Result<Receiver, InvalidProxyError> {
        if !self.is_valid() {
            return Err(InvalidProxyError {
                address: self.receiver.address(),
                reason: "proxy was finalized or consumed by an initializer",
            });
        }
        if let (Receiver::Instance(object), Ownership::Borrowed) = (self.receiver, self.ownership) {
            if self.host.class_of(object).is_none() {
                return Err(InvalidProxyError {
                    address: object.address(),
                    reason: "borrowed host object was deallocated",
                });
            }
        }
        Ok(self.receiver)
    }

    /// The wrapped instance reference, checked for validity
    pub fn unwrap_instance(&self) -> Result<HostRef, InvalidProxyError> {
        match self.unwrap()? {
            Receiver::Instance(object) => Ok(object),
            Receiver::Class(class) => Err(InvalidProxyError {
                address: class.address(),
                reason: "expected an instance, found a class",
            }),
        }
    }

    /// Invalidate the proxy, releasing an owned reference
    ///
    /// Idempotent; only the first call on a valid proxy releases.
    pub fn finalize(&self) {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return;
        }
        if let (Receiver::Instance(object), Ownership::Owned) = (self.receiver, self.ownership) {
            log::trace!(target: "tallow::gc", "releasing owned {:?}", object);
            self.host.release(object);
        }
    }

    /// Invalidate the proxy without releasing
    ///
    /// Used when an initializer consumes its receiver's reference.
    pub fn consume(&self) {
        if self.valid.swap(false, Ordering::AcqRel) {
            log::trace!(target: "tallow::gc", "{:?} consumed by initializer", self.receiver);
        }
    }
}

impl Drop for InstanceProxy {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl fmt::Debug for InstanceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceProxy")
            .field("receiver", &self.receiver)
            .field("ownership", &self.ownership)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl fmt::Display for InstanceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.receiver {
            Receiver::Class(class) => Some(class),
            Receiver::Instance(object) if self.is_valid() => self.host.class_of(object),
            Receiver::Instance(_) => None,
        };
        let name = class.map_or_else(|| "?".to_string(), |c| self.host.class_name(c));
        match self.kind() {
            ProxyKind::Class => write!(f, "class: {}", name),
            ProxyKind::Instance => write!(f, "<{}: {:#x}>", name, self.receiver.address()),
        }
    }
}

/// Creates proxies and keeps one live proxy per host reference
pub struct ProxyManager {
    host: Arc<dyn HostRuntime>,
    live: Mutex<FxHashMap<Receiver, Weak<InstanceProxy>>>,
}

impl ProxyManager {
    /// Create a manager for `host`
    pub fn new(host: Arc<dyn HostRuntime>) -> Self {
        Self {
            host,
            live: Mutex::new(FxHashMap::default()),
        }
    }

    /// Proxy for an object reference
    ///
    /// `Owned` means the caller hands over one reference. If a valid proxy
    /// already exists it is returned; an extra owned reference is released
    /// at once unless the existing proxy is borrowed, in which case a new
    /// owned proxy takes its place in the cache.
    pub fn wrap(&self, object: HostRef, ownership: Ownership) -> ProxyRef {
        self.wrap_receiver(Receiver::Instance(object), ownership)
    }

    /// Proxy for a class (always borrowed)
    pub fn wrap_class(&self, class: ClassRef) -> ProxyRef {
        self.wrap_receiver(Receiver::Class(class), Ownership::Borrowed)
    }

    fn wrap_receiver(&self, receiver: Receiver, ownership: Ownership) -> ProxyRef {
        let mut live = self.live.lock();
        if let Some(existing) = live.get(&receiver).and_then(Weak::upgrade) {
            if existing.is_valid() {
                match (existing.ownership(), ownership) {
                    (_, Ownership::Borrowed) => return existing,
                    (Ownership::Owned, Ownership::Owned) => {
                        if let Receiver::Instance(object) = receiver {
                            self.host.release(object);
                        }
                        return existing;
                    }
                    (Ownership::Borrowed, Ownership::Owned) => {}
                }
            }
        }
        if live.len() >= 64 {
            live.retain(|_, weak| weak.strong_count() > 0);
        }
        let proxy = Arc::new(InstanceProxy::new(receiver, ownership, Arc::clone(&self.host)));
        live.insert(receiver, Arc::downgrade(&proxy));
        proxy
    }

    /// Live proxy for a reference, if any
    pub fn lookup(&self, receiver: Receiver) -> Option<ProxyRef> {
        self.live
            .lock()
            .get(&receiver)
            .and_then(Weak::upgrade)
            .filter(|p| p.is_valid())
    }

    /// Number of live, valid proxies
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|p| p.is_valid())
            .count()
    }
}

impl fmt::Debug for ProxyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyManager")
            .field("tracked", &self.live.lock().len())
            .finish()
    }
}
