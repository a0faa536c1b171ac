//! In-memory host runtime for tests
//!
//! [`MockRuntime`] implements [`HostRuntime`] with reference-counted objects,
//! classes with single inheritance, interned selectors and method
//! implementations written as Rust closures. It keeps a log of every send and
//! counts releases per object so tests can check ownership rules.

use crate::dispatch::Reentry;
use crate::encoding::PointerWidth;
use crate::host::{
    ClassRef, HandlerId, HostException, HostMethod, HostPrimitive, HostRef, HostRuntime, MethodKind,
    Receiver, SelectorRef,
};
use crate::native::{NativeArgs, NativeValue};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Method implementation
pub type MockImp =
    Arc<dyn Fn(&MockSend<'_>, &mut Reentry<'_>) -> Result<NativeValue, HostException> + Send + Sync>;

/// One recorded message send
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    /// Target
    pub receiver: Receiver,
    /// Selector sent
    pub selector: String,
    /// Marshalled arguments
    pub args: Vec<NativeValue>,
}

/// What a method implementation sees of the send that invoked it
pub struct MockSend<'a> {
    runtime: &'a MockRuntime,
    receiver: Receiver,
    selector: &'a str,
    args: &'a NativeArgs,
}

impl<'a> MockSend<'a> {
    /// The runtime
    pub fn runtime(&self) -> &'a MockRuntime {
        self.runtime
    }

    /// Target of the send
    pub fn receiver(&self) -> Receiver {
        self.receiver
    }

    /// Target instance; class receivers raise
    pub fn this(&self) -> Result<HostRef, HostException> {
        match self.receiver {
            Receiver::Instance(object) => Ok(object),
            Receiver::Class(_) => Err(HostException::new(
                "NSInvalidArgumentException",
                format!("-{} sent to a class", self.selector),
            )),
        }
    }

    /// Selector sent
    pub fn selector(&self) -> &str {
        self.selector
    }

    /// Raw arguments
    pub fn args(&self) -> &'a NativeArgs {
        self.args
    }

    /// Argument `i` as a signed integer of its own width
    pub fn arg_i64(&self, i: usize) -> Option<i64> {
        self.args.get(i)?.as_i64()
    }

    /// Argument `i` as a float of its own width
    pub fn arg_f64(&self, i: usize) -> Option<f64> {
        self.args.get(i)?.as_f64()
    }

    /// Argument `i` as an object reference
    pub fn arg_object(&self, i: usize) -> Option<HostRef> {
        HostRef::new(self.args.get(i)?.as_address()?)
    }

    /// Argument `i` as a C string or a string object
    pub fn arg_string(&self, i: usize) -> Option<String> {
        let arg = self.args.get(i)?;
        if let Some(s) = arg.as_c_str() {
            return Some(s.to_string_lossy().into_owned());
        }
        match self.runtime.unbox(self.arg_object(i)?)? {
            HostPrimitive::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct MockClass {
    name: String,
    superclass: Option<ClassRef>,
    instance_methods: Vec<HostMethod>,
    class_methods: Vec<HostMethod>,
}

#[derive(Debug)]
struct MockObject {
    class: ClassRef,
    refcount: usize,
    primitive: Option<HostPrimitive>,
    handler: Option<HandlerId>,
    slots: FxHashMap<String, NativeValue>,
}

#[derive(Default)]
struct Inner {
    next_address: usize,
    classes: FxHashMap<ClassRef, MockClass>,
    class_names: FxHashMap<String, ClassRef>,
    objects: FxHashMap<HostRef, MockObject>,
    releases: FxHashMap<HostRef, usize>,
    selectors: FxHashMap<String, SelectorRef>,
    selector_names: FxHashMap<SelectorRef, String>,
    strings: FxHashMap<usize, String>,
    imps: Vec<MockImp>,
    calls: Vec<MockCall>,
    released_handlers: Vec<HandlerId>,
}

impl Inner {
    fn next(&mut self) -> NonZeroUsize {
        self.next_address += 0x10;
        NonZeroUsize::MIN.saturating_add(0xfff + self.next_address)
    }
}

/// In-memory reflective host runtime
pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl MockRuntime {
    /// Empty runtime with no classes
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Runtime with `NSObject`, `NSString`, `NSNumber` and `TallowHandler`
    ///
    /// `NSObject` implements `init` (returns self), `+new` and
    /// `retainCount`.
    pub fn with_foundation() -> Self {
        let rt = Self::new();
        let root = rt.define_class("NSObject", None);
        rt.define_class("NSString", Some("NSObject"));
        rt.define_class("NSNumber", Some("NSObject"));
        rt.define_class("TallowHandler", Some("NSObject"));

        rt.add_method(root, MethodKind::Instance, "init", "@16@0:8", |call, _| {
            Ok(NativeValue::object(PointerWidth::native(), Some(call.this()?)))
        });
        rt.add_method(root, MethodKind::Instance, "retainCount", "Q16@0:8", |call, _| {
            let count = call.runtime().retain_count(call.this()?).unwrap_or(0);
            Ok(NativeValue::u64(count as u64))
        });
        rt.add_method(root, MethodKind::Class, "new", "@16@0:8", |call, _| {
            let Receiver::Class(class) = call.receiver() else {
                return Err(HostException::new("NSInvalidArgumentException", "+new sent to an instance"));
            };
            let object = call.runtime().alloc(class)?;
            Ok(NativeValue::object(PointerWidth::native(), Some(object)))
        });
        rt
    }

    /// Define a class; the superclass must already exist
    pub fn define_class(&self, name: &str, superclass: Option<&str>) -> ClassRef {
        let mut inner = self.inner.lock();
        let superclass = superclass.and_then(|s| inner.class_names.get(s).copied());
        let class = ClassRef::from_nonzero(inner.next());
        inner.classes.insert(
            class,
            MockClass {
                name: name.to_string(),
                superclass,
                instance_methods: Vec::new(),
                class_methods: Vec::new(),
            },
        );
        inner.class_names.insert(name.to_string(), class);
        class
    }

    fn push_method(&self, class: ClassRef, kind: MethodKind, method: HostMethod) {
        let mut inner = self.inner.lock();
        if let Some(c) = inner.classes.get_mut(&class) {
            match kind {
                MethodKind::Instance => c.instance_methods.push(method),
                MethodKind::Class => c.class_methods.push(method),
            }
        }
    }

    fn register_imp<F>(&self, imp: F) -> usize
    where
        F: Fn(&MockSend<'_>, &mut Reentry<'_>) -> Result<NativeValue, HostException> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        inner.imps.push(Arc::new(imp));
        inner.imps.len()
    }

    /// Publish a method with an implementation
    pub fn add_method<F>(&self, class: ClassRef, kind: MethodKind, selector: &str, encoding: &str, imp: F)
    where
        F: Fn(&MockSend<'_>, &mut Reentry<'_>) -> Result<NativeValue, HostException> + Send + Sync + 'static,
    {
        let token = self.register_imp(imp);
        self.push_method(class, kind, HostMethod::new(selector, encoding).with_imp(token));
    }

    /// Publish a nil-terminated variadic method
    pub fn add_variadic_method<F>(&self, class: ClassRef, kind: MethodKind, selector: &str, encoding: &str, imp: F)
    where
        F: Fn(&MockSend<'_>, &mut Reentry<'_>) -> Result<NativeValue, HostException> + Send + Sync + 'static,
    {
        let token = self.register_imp(imp);
        self.push_method(class, kind, HostMethod::new(selector, encoding).with_imp(token).variadic());
    }

    /// Publish a method with no implementation
    ///
    /// Sending it raises "unrecognized selector", like a declared but
    /// unimplemented method.
    pub fn declare_method(&self, class: ClassRef, kind: MethodKind, selector: &str, encoding: &str) {
        self.push_method(class, kind, HostMethod::new(selector, encoding));
    }

    /// Create an instance with one reference
    pub fn create_object(&self, class: ClassRef) -> HostRef {
        let mut inner = self.inner.lock();
        let object = HostRef::from_nonzero(inner.next());
        inner.objects.insert(
            object,
            MockObject {
                class,
                refcount: 1,
                primitive: None,
                handler: None,
                slots: FxHashMap::default(),
            },
        );
        object
    }

    fn create_special(&self, class_name: &str, primitive: Option<HostPrimitive>, handler: Option<HandlerId>) -> Option<HostRef> {
        let class = self.lookup_class(class_name)?;
        let object = self.create_object(class);
        if let Some(o) = self.inner.lock().objects.get_mut(&object) {
            o.primitive = primitive;
            o.handler = handler;
        }
        Some(object)
    }

    /// Reference count, `None` once deallocated
    pub fn retain_count(&self, object: HostRef) -> Option<usize> {
        self.inner.lock().objects.get(&object).map(|o| o.refcount)
    }

    /// Number of releases `object` has received
    pub fn release_count(&self, object: HostRef) -> usize {
        self.inner.lock().releases.get(&object).copied().unwrap_or(0)
    }

    /// Whether `object` is still allocated
    pub fn is_alive(&self, object: HostRef) -> bool {
        self.inner.lock().objects.contains_key(&object)
    }

    /// Number of allocated objects
    pub fn live_objects(&self) -> usize {
        self.inner.lock().objects.len()
    }

    /// Store a host-owned C string and return its address
    pub fn host_c_string(&self, s: &str) -> usize {
        let mut inner = self.inner.lock();
        let address = inner.next().get();
        inner.strings.insert(address, s.to_string());
        address
    }

    /// Script handler wrapped by a handler object
    pub fn handler_of(&self, object: HostRef) -> Option<HandlerId> {
        self.inner.lock().objects.get(&object)?.handler
    }

    /// Store a per-object value (instance variable)
    pub fn set_slot(&self, object: HostRef, key: &str, value: NativeValue) {
        if let Some(o) = self.inner.lock().objects.get_mut(&object) {
            o.slots.insert(key.to_string(), value);
        }
    }

    /// Read a per-object value
    pub fn slot(&self, object: HostRef, key: &str) -> Option<NativeValue> {
        self.inner.lock().objects.get(&object)?.slots.get(key).cloned()
    }

    /// Every send so far, oldest first
    pub fn calls(&self) -> Vec<MockCall> {
        self.inner.lock().calls.clone()
    }

    /// Most recent send of `selector`
    pub fn last_call(&self, selector: &str) -> Option<MockCall> {
        self.inner
            .lock()
            .calls
            .iter()
            .rev()
            .find(|c| c.selector == selector)
            .cloned()
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl HostRuntime for MockRuntime {
    fn lookup_class(&self, name: &str) -> Option<ClassRef> {
        self.inner.lock().class_names.get(name).copied()
    }

    fn class_of(&self, object: HostRef) -> Option<ClassRef> {
        self.inner.lock().objects.get(&object).map(|o| o.class)
    }

    fn superclass(&self, class: ClassRef) -> Option<ClassRef> {
        self.inner.lock().classes.get(&class)?.superclass
    }

    fn class_name(&self, class: ClassRef) -> String {
        self.inner
            .lock()
            .classes
            .get(&class)
            .map_or_else(|| "?".to_string(), |c| c.name.clone())
    }

    fn methods(&self, class: ClassRef, kind: MethodKind) -> Vec<HostMethod> {
        let inner = self.inner.lock();
        match (inner.classes.get(&class), kind) {
            (Some(c), MethodKind::Instance) => c.instance_methods.clone(),
            (Some(c), MethodKind::Class) => c.class_methods.clone(),
            (None, _) => Vec::new(),
        }
    }

    fn register_selector(&self, name: &str) -> SelectorRef {
        let mut inner = self.inner.lock();
        if let Some(sel) = inner.selectors.get(name) {
            return *sel;
        }
        let sel = SelectorRef::from_nonzero(inner.next());
        inner.selectors.insert(name.to_string(), sel);
        inner.selector_names.insert(sel, name.to_string());
        sel
    }

    fn selector_name(&self, selector: SelectorRef) -> Option<String> {
        self.inner.lock().selector_names.get(&selector).cloned()
    }

    fn send(
        &self,
        receiver: Receiver,
        method: &HostMethod,
        args: &NativeArgs,
        reentry: &mut Reentry<'_>,
    ) -> Result<NativeValue, HostException> {
        let imp = {
            let mut inner = self.inner.lock();
            if let Receiver::Instance(object) = receiver {
                if !inner.objects.contains_key(&object) {
                    return Err(HostException::new(
                        "NSInvalidArgumentException",
                        format!("-{} sent to deallocated instance {:?}", method.selector, object),
                    ));
                }
            }
            inner.calls.push(MockCall {
                receiver,
                selector: method.selector.clone(),
                args: args.values().to_vec(),
            });
            inner.imps.get(method.imp.wrapping_sub(1)).cloned()
        };
        let Some(imp) = imp else {
            return Err(HostException::new(
                "NSInvalidArgumentException",
                format!("unrecognized selector sent to instance: {}", method.selector),
            ));
        };
        let send = MockSend {
            runtime: self,
            receiver,
            selector: &method.selector,
            args,
        };
        imp(&send, reentry)
    }

    fn alloc(&self, class: ClassRef) -> Result<HostRef, HostException> {
        if !self.inner.lock().classes.contains_key(&class) {
            return Err(HostException::new("NSInvalidArgumentException", "alloc of unknown class"));
        }
        Ok(self.create_object(class))
    }

    fn retain(&self, object: HostRef) {
        if let Some(o) = self.inner.lock().objects.get_mut(&object) {
            o.refcount += 1;
        }
    }

    fn release(&self, object: HostRef) {
        let mut inner = self.inner.lock();
        *inner.releases.entry(object).or_insert(0) += 1;
        let dead = match inner.objects.get_mut(&object) {
            Some(o) => {
                o.refcount = o.refcount.saturating_sub(1);
                o.refcount == 0
            }
            None => false,
        };
        if dead {
            if let Some(handler) = inner.objects.remove(&object).and_then(|o| o.handler) {
                inner.released_handlers.push(handler);
            }
        }
    }

    fn box_primitive(&self, value: &HostPrimitive) -> Option<HostRef> {
        let class = match value {
            HostPrimitive::String(_) => "NSString",
            _ => "NSNumber",
        };
        self.create_special(class, Some(value.clone()), None)
    }

    fn unbox(&self, object: HostRef) -> Option<HostPrimitive> {
        self.inner.lock().objects.get(&object)?.primitive.clone()
    }

    fn wrap_handler(&self, handler: HandlerId) -> Option<HostRef> {
        self.create_special("TallowHandler", None, Some(handler))
    }

    fn read_c_string(&self, address: usize) -> Option<String> {
        self.inner.lock().strings.get(&address).cloned()
    }

    fn take_released_handlers(&self) -> Vec<HandlerId> {
        std::mem::take(&mut self.inner.lock().released_handlers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refcounting() {
        let rt = MockRuntime::with_foundation();
        let class = rt.lookup_class("NSObject").unwrap();
        let object = rt.create_object(class);
        rt.retain(object);
        assert_eq!(rt.retain_count(object), Some(2));
        rt.release(object);
        rt.release(object);
        assert!(!rt.is_alive(object));
        assert_eq!(rt.release_count(object), 2);
    }

    #[test]
    fn test_class_hierarchy() {
        let rt = MockRuntime::with_foundation();
        let string = rt.lookup_class("NSString").unwrap();
        let root = rt.superclass(string).unwrap();
        assert_eq!(rt.class_name(root), "NSObject");
        assert!(rt.superclass(root).is_none());
        assert_eq!(rt.methods(root, MethodKind::Class).len(), 1);
    }

    #[test]
    fn test_selectors_interned() {
        let rt = MockRuntime::new();
        let a = rt.register_selector("count");
        assert_eq!(rt.register_selector("count"), a);
        assert_eq!(rt.selector_name(a).as_deref(), Some("count"));
    }

    #[test]
    fn test_boxing() {
        let rt = MockRuntime::with_foundation();
        let object = rt.box_primitive(&HostPrimitive::Number(1.5)).unwrap();
        assert_eq!(rt.unbox(object), Some(HostPrimitive::Number(1.5)));
        let class = rt.class_of(object).unwrap();
        assert_eq!(rt.class_name(class), "NSNumber");
    }
}
