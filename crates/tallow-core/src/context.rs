//! Bridge context
//!
//! One [`Context`] per host runtime. It owns everything that outlives a
//! single call (signature cache, method tables, proxy manager) and is shared
//! by reference down every call path; the mutable engine state lives behind
//! the execution lock instead.

use crate::encoding::{Layout, PointerWidth, SignatureCache};
use crate::host::{ClassRef, HostRuntime, Receiver};
use crate::proxy::{ProxyManager, ProxyRef};
use crate::resolver::{ClassRegistry, Resolver};
use std::fmt;
use std::sync::Arc;

/// Context construction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Pointer width override; `None` uses the process's own
    pub pointer_width: Option<PointerWidth>,

    /// Convert host string and number objects to script primitives
    pub unbox_primitives: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            pointer_width: None,
            unbox_primitives: true,
        }
    }
}

/// Shared, lock-free part of the bridge
pub struct Context {
    host: Arc<dyn HostRuntime>,
    layout: Layout,
    signatures: SignatureCache,
    classes: ClassRegistry,
    proxies: ProxyManager,
    options: ContextOptions,
}

impl Context {
    /// Create a context with default options
    pub fn new(host: Arc<dyn HostRuntime>) -> Self {
        Self::with_options(host, ContextOptions::default())
    }

    /// Create a context
    pub fn with_options(host: Arc<dyn HostRuntime>, options: ContextOptions) -> Self {
        let width = options.pointer_width.unwrap_or_else(PointerWidth::native);
        Self {
            proxies: ProxyManager::new(Arc::clone(&host)),
            host,
            layout: Layout::new(width),
            signatures: SignatureCache::new(),
            classes: ClassRegistry::new(),
            options,
        }
    }

    /// The host runtime
    pub fn host(&self) -> &dyn HostRuntime {
        self.host.as_ref()
    }

    /// Shared handle to the host runtime
    pub fn host_arc(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    /// Storage layout in use
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Parsed signature cache
    pub fn signatures(&self) -> &SignatureCache {
        &self.signatures
    }

    /// Method tables
    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Proxy manager
    pub fn proxies(&self) -> &ProxyManager {
        &self.proxies
    }

    /// Options this context was built with
    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Method resolver over this context's tables
    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.host.as_ref(), &self.classes, &self.signatures)
    }

    /// Class proxy for a class name
    pub fn class_named(&self, name: &str) -> Option<ProxyRef> {
        self.host.lookup_class(name).map(|c| self.proxies.wrap_class(c))
    }

    /// Class name of a receiver, for messages
    pub fn describe(&self, receiver: Receiver) -> String {
        let class: Option<ClassRef> = match receiver {
            Receiver::Class(class) => Some(class),
            Receiver::Instance(object) => self.host.class_of(object),
        };
        class.map_or_else(|| format!("{:#x}", receiver.address()), |c| self.host.class_name(c))
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("layout", &self.layout)
            .field("signatures", &self.signatures.len())
            .field("classes", &self.classes.len())
            .field("proxies", &self.proxies)
            .field("options", &self.options)
            .finish()
    }
}
