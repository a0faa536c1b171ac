//! Method resolution
//!
//! Scripts name host methods by their selector with colons spelled as `_`
//! (`setValue_forKey`), optionally suffixed with one digit per parameter to
//! pick among same-named methods that differ in parameter types:
//!
//! | digit | parameter type |
//! |-------|----------------|
//! | `0`   | none (zero-parameter method) |
//! | `1`   | object |
//! | `2`   | integer |
//! | `3`   | float |
//! | `4`   | boolean |
//!
//! Method tables are built per class and method kind on first use from host
//! reflection, walking the superclass chain with subclass declarations
//! shadowing inherited ones.

use crate::encoding::{Signature, SignatureCache, TypeTag};
use crate::error::{BridgeError, Candidate, InvalidProxyError, NotFoundError, NotFoundKind};
use crate::host::{ClassRef, HostMethod, HostRuntime, MethodKind, Receiver};
use crate::proxy::MethodFamily;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// Coarse parameter type named by one call-name digit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFlag {
    /// `0`
    Void,
    /// `1`
    Object,
    /// `2`
    Integer,
    /// `3`
    Float,
    /// `4`
    Boolean,
}

impl TypeFlag {
    /// Flag for a digit
    pub fn from_digit(c: char) -> Option<Self> {
        match c {
            '0' => Some(TypeFlag::Void),
            '1' => Some(TypeFlag::Object),
            '2' => Some(TypeFlag::Integer),
            '3' => Some(TypeFlag::Float),
            '4' => Some(TypeFlag::Boolean),
            _ => None,
        }
    }

    /// Digit spelling
    pub fn digit(self) -> char {
        match self {
            TypeFlag::Void => '0',
            TypeFlag::Object => '1',
            TypeFlag::Integer => '2',
            TypeFlag::Float => '3',
            TypeFlag::Boolean => '4',
        }
    }

    /// Flag describing `tag`, if one does
    ///
    /// Structs, unions, arrays, pointers, C strings and selectors have no
    /// flag.
    pub fn for_tag(tag: &TypeTag) -> Option<Self> {
        match tag {
            TypeTag::Void => Some(TypeFlag::Void),
            TypeTag::Object | TypeTag::Class => Some(TypeFlag::Object),
            TypeTag::Bool => Some(TypeFlag::Boolean),
            t if t.is_float() => Some(TypeFlag::Float),
            t if t.is_integer() => Some(TypeFlag::Integer),
            _ => None,
        }
    }

    /// Whether a parameter of type `tag` satisfies this flag
    pub fn matches(self, tag: &TypeTag) -> bool {
        Self::for_tag(tag) == Some(self)
    }
}

/// A script call name split into base name and type flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallName<'a> {
    /// Name without the flag suffix
    pub base: &'a str,

    /// Requested parameter types; `Some(vec![])` for the `0` suffix,
    /// `None` when no suffix was given
    pub flags: Option<Vec<TypeFlag>>,
}

impl<'a> CallName<'a> {
    /// Split the trailing flag digits off `name`
    ///
    /// `0` is only a flag on its own; a suffix mixing `0` with other digits,
    /// or containing digits above `4`, is left as part of the name.
    pub fn parse(name: &'a str) -> Self {
        let base = name.trim_end_matches(|c: char| c.is_ascii_digit());
        let suffix = &name[base.len()..];
        let unsplit = CallName { base: name, flags: None };
        if suffix.is_empty() || base.is_empty() {
            return unsplit;
        }
        if suffix == "0" {
            return CallName {
                base,
                flags: Some(Vec::new()),
            };
        }
        let flags: Option<Vec<TypeFlag>> = suffix
            .chars()
            .map(|c| TypeFlag::from_digit(c).filter(|f| *f != TypeFlag::Void))
            .collect();
        match flags {
            Some(flags) => CallName {
                base,
                flags: Some(flags),
            },
            None => unsplit,
        }
    }
}

/// Script lookup key of a selector or call name
///
/// Colons become underscores and trailing underscores are dropped, so
/// `setValue:forKey:`, `setValue_forKey_` and `setValue_forKey` share a key.
pub fn script_key(name: &str) -> String {
    name.replace(':', "_").trim_end_matches('_').to_string()
}

/// The two selector spellings a script name can stand for
///
/// `setValue_forKey` → `["setValue:forKey", "setValue:forKey:"]`.
pub fn selectors_for_name(name: &str) -> [String; 2] {
    let bare = name.replace('_', ":");
    let bare = bare.trim_end_matches(':').to_string();
    let with_colon = format!("{}:", bare);
    [bare, with_colon]
}

/// Script call name that selects `selector` with the given parameter flags
///
/// Zero flags produce the `0` suffix; `None` entries (parameters no flag can
/// name) are spelled `?`.
pub fn script_name_for_selector(selector: &str, flags: &[Option<TypeFlag>]) -> String {
    let mut name = script_key(selector);
    if flags.is_empty() {
        name.push('0');
    }
    for flag in flags {
        name.push(flag.map_or('?', TypeFlag::digit));
    }
    name
}

/// Whether `selector` is in the init family
pub fn is_init_method(selector: &str) -> bool {
    MethodFamily::of(selector).is_init()
}

/// One method available on a class, with where it was declared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodEntry {
    /// Host method description
    pub method: HostMethod,

    /// Class that declares it
    pub declaring_class: ClassRef,
}

/// All methods of one kind reachable from one class, by script key
#[derive(Debug, Default)]
pub struct MethodTable {
    by_key: FxHashMap<String, Vec<MethodEntry>>,
}

impl MethodTable {
    /// Build the table for `class` by walking its superclass chain
    pub fn build(host: &dyn HostRuntime, class: ClassRef, kind: MethodKind) -> Self {
        let mut table = MethodTable::default();
        let mut shadowed: FxHashSet<String> = FxHashSet::default();
        let mut current = Some(class);
        let mut visited = FxHashSet::default();
        while let Some(level) = current {
            if !visited.insert(level) {
                break;
            }
            let methods = host.methods(level, kind);
            let declared: Vec<String> = methods.iter().map(|m| m.selector.clone()).collect();
            for method in methods {
                if shadowed.contains(&method.selector) {
                    continue;
                }
                table
                    .by_key
                    .entry(script_key(&method.selector))
                    .or_default()
                    .push(MethodEntry {
                        method,
                        declaring_class: level,
                    });
            }
            shadowed.extend(declared);
            current = host.superclass(level);
        }
        table
    }

    /// Candidates sharing a script key
    pub fn candidates(&self, key: &str) -> &[MethodEntry] {
        self.by_key.get(key).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct script keys
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Method tables, built once per (class, kind)
#[derive(Debug, Default)]
pub struct ClassRegistry {
    tables: RwLock<FxHashMap<(ClassRef, MethodKind), Arc<MethodTable>>>,
}

impl ClassRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for `class`, building it on first use
    pub fn table(&self, host: &dyn HostRuntime, class: ClassRef, kind: MethodKind) -> Arc<MethodTable> {
        if let Some(table) = self.tables.read().get(&(class, kind)) {
            return Arc::clone(table);
        }
        let built = Arc::new(MethodTable::build(host, class, kind));
        let mut tables = self.tables.write();
        Arc::clone(tables.entry((class, kind)).or_insert(built))
    }

    /// Drop every table (after the host registers new methods)
    pub fn invalidate(&self) {
        self.tables.write().clear();
    }

    /// Number of built tables
    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    /// Whether no table has been built yet
    pub fn is_empty(&self) -> bool {
        self.tables.read().is_empty()
    }
}

/// Outcome of a successful resolution
#[derive(Debug, Clone)]
pub struct Resolved {
    /// Selected method
    pub method: HostMethod,

    /// Its signature, implicit parameters removed
    pub signature: Arc<Signature>,

    /// Memory-management family of the selector
    pub family: MethodFamily,

    /// Class whose table produced the method
    pub class: ClassRef,

    /// An instance must be allocated and the method sent to it (init-family
    /// name called on a class)
    pub alloc_first: bool,
}

/// Resolves script call names against host method tables
pub struct Resolver<'a> {
    host: &'a dyn HostRuntime,
    classes: &'a ClassRegistry,
    signatures: &'a SignatureCache,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over the given tables
    pub fn new(host: &'a dyn HostRuntime, classes: &'a ClassRegistry, signatures: &'a SignatureCache) -> Self {
        Self {
            host,
            classes,
            signatures,
        }
    }

    /// Resolve `call_name` on `receiver`
    ///
    /// Init-family names sent to a class are looked up among the class's
    /// instance methods and marked `alloc_first`.
    pub fn resolve(&self, receiver: Receiver, call_name: &str) -> Result<Resolved, BridgeError> {
        let (class, kind, alloc_first) = self.target(receiver, CallName::parse(call_name).base)?;
        let table = self.classes.table(self.host, class, kind);
        let entry = self.select(&table, class, call_name)?;
        self.finish(entry, class, alloc_first, call_name)
    }

    /// Resolve an exact selector on `receiver`, bypassing call-name rules
    ///
    /// Selectors sharing a script key (`reload` and `reload:`) are told
    /// apart by spelling, never by flags.
    pub fn resolve_selector(&self, receiver: Receiver, selector: &str) -> Result<Resolved, BridgeError> {
        let (class, kind, alloc_first) = self.target(receiver, selector)?;
        let table = self.classes.table(self.host, class, kind);
        let candidates = table.candidates(&script_key(selector));
        let exact: Vec<&MethodEntry> = candidates.iter().filter(|e| e.method.selector == selector).collect();
        match exact.as_slice() {
            [one] => self.finish(one, class, alloc_first, selector),
            [] => Err(self.not_found(class, selector, NotFoundKind::Missing, candidates).into()),
            _ => Err(self.not_found(class, selector, NotFoundKind::Ambiguous, candidates).into()),
        }
    }

    /// Class and table kind that answer `name` sent to `receiver`
    fn target(&self, receiver: Receiver, name: &str) -> Result<(ClassRef, MethodKind, bool), BridgeError> {
        match receiver {
            Receiver::Instance(object) => {
                let class = self.host.class_of(object).ok_or(InvalidProxyError {
                    address: object.address(),
                    reason: "host object was deallocated",
                })?;
                Ok((class, MethodKind::Instance, false))
            }
            Receiver::Class(class) if is_init_method(name) => Ok((class, MethodKind::Instance, true)),
            Receiver::Class(class) => Ok((class, MethodKind::Class, false)),
        }
    }

    fn finish(&self, entry: &MethodEntry, class: ClassRef, alloc_first: bool, name: &str) -> Result<Resolved, BridgeError> {
        let signature = self.signatures.method(&entry.method.encoding)?;
        log::debug!(
            "resolved '{}' on {} to {} [{}]",
            name,
            self.host.class_name(class),
            entry.method.selector,
            entry.method.encoding
        );
        Ok(Resolved {
            family: MethodFamily::of(&entry.method.selector),
            method: entry.method.clone(),
            signature,
            class,
            alloc_first,
        })
    }

    fn select<'t>(&self, table: &'t MethodTable, class: ClassRef, call_name: &str) -> Result<&'t MethodEntry, NotFoundError> {
        let whole = script_key(call_name);
        let (candidates, flags) = match table.candidates(&whole) {
            [] => {
                let split = CallName::parse(call_name);
                (table.candidates(&script_key(split.base)), split.flags)
            }
            found => (found, None),
        };

        match candidates {
            [] => Err(self.not_found(class, call_name, NotFoundKind::Missing, candidates)),
            [only] => Ok(only),
            several => match flags {
                Some(flags) => {
                    let matching: Vec<&MethodEntry> = several
                        .iter()
                        .filter(|e| self.matches_flags(e, &flags))
                        .collect();
                    match matching.as_slice() {
                        [] => Err(self.not_found(class, call_name, NotFoundKind::NoFlagMatch, several)),
                        [one] => Ok(*one),
                        _ => Err(self.not_found(class, call_name, NotFoundKind::Ambiguous, several)),
                    }
                }
                None => {
                    // A colon spelling names its selector exactly
                    let exact: Vec<&MethodEntry> = if call_name.contains(':') {
                        several.iter().filter(|e| e.method.selector == call_name).collect()
                    } else {
                        Vec::new()
                    };
                    match exact.as_slice() {
                        [one] => Ok(*one),
                        _ => Err(self.not_found(class, call_name, NotFoundKind::Ambiguous, several)),
                    }
                }
            },
        }
    }

    fn matches_flags(&self, entry: &MethodEntry, flags: &[TypeFlag]) -> bool {
        let signature = self.signatures.method_lenient(&entry.method.encoding);
        let params = signature.params();
        params.len() == flags.len() && params.iter().zip(flags).all(|(tag, flag)| flag.matches(tag))
    }

    fn not_found(&self, class: ClassRef, name: &str, kind: NotFoundKind, candidates: &[MethodEntry]) -> NotFoundError {
        NotFoundError {
            receiver: self.host.class_name(class),
            name: name.to_string(),
            kind,
            candidates: candidates.iter().map(|e| self.candidate(e)).collect(),
        }
    }

    fn candidate(&self, entry: &MethodEntry) -> Candidate {
        let signature = self.signatures.method_lenient(&entry.method.encoding);
        let flags: Vec<Option<TypeFlag>> = signature.params().iter().map(TypeFlag::for_tag).collect();
        Candidate {
            selector: entry.method.selector.clone(),
            encoding: entry.method.encoding.clone(),
            call_name: script_name_for_selector(&entry.method.selector, &flags),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRuntime;

    #[test]
    fn test_call_name_parse() {
        assert_eq!(
            CallName::parse("setValue2"),
            CallName {
                base: "setValue",
                flags: Some(vec![TypeFlag::Integer])
            }
        );
        assert_eq!(CallName::parse("count0").flags, Some(Vec::new()));
        assert_eq!(CallName::parse("setValue").flags, None);
        assert_eq!(CallName::parse("set_x_y13").flags, Some(vec![TypeFlag::Object, TypeFlag::Float]));
        // 5 is not a flag; 0 only stands alone
        assert_eq!(CallName::parse("utf8").base, "utf8");
        assert_eq!(CallName::parse("foo10").base, "foo10");
        assert_eq!(CallName::parse("42").base, "42");
    }

    #[test]
    fn test_name_mapping() {
        assert_eq!(script_key("setValue:forKey:"), "setValue_forKey");
        assert_eq!(script_key("setValue_forKey_"), "setValue_forKey");
        assert_eq!(selectors_for_name("setValue_forKey"), ["setValue:forKey".to_string(), "setValue:forKey:".to_string()]);
        assert_eq!(
            script_name_for_selector("setValue:forKey:", &[Some(TypeFlag::Object), Some(TypeFlag::Object)]),
            "setValue_forKey11"
        );
        assert_eq!(script_name_for_selector("count", &[]), "count0");
        assert_eq!(script_name_for_selector("setFrame:", &[None]), "setFrame?");
    }

    #[test]
    fn test_flag_for_tag() {
        assert_eq!(TypeFlag::for_tag(&TypeTag::Char), Some(TypeFlag::Integer));
        assert_eq!(TypeFlag::for_tag(&TypeTag::Bool), Some(TypeFlag::Boolean));
        assert_eq!(TypeFlag::for_tag(&TypeTag::Float), Some(TypeFlag::Float));
        assert_eq!(TypeFlag::for_tag(&TypeTag::CString), None);
        assert!(TypeFlag::Object.matches(&TypeTag::Class));
    }

    fn fixture() -> (Arc<MockRuntime>, ClassRegistry, SignatureCache, ClassRef) {
        let host = Arc::new(MockRuntime::with_foundation());
        let base = host.define_class("Base", Some("NSObject"));
        let widget = host.define_class("Widget", Some("Base"));
        host.declare_method(base, MethodKind::Instance, "setValue:", "v@:d");
        host.declare_method(base, MethodKind::Instance, "title", "@@:");
        host.declare_method(widget, MethodKind::Instance, "setValue:", "v@:i");
        host.declare_method(widget, MethodKind::Instance, "setValue:", "v@:d");
        host.declare_method(widget, MethodKind::Instance, "setValue", "v@:");
        host.declare_method(widget, MethodKind::Instance, "setSize:", "v@:{CGSize=dd}");
        host.declare_method(widget, MethodKind::Class, "widget", "@@:");
        (host, ClassRegistry::new(), SignatureCache::new(), widget)
    }

    #[test]
    fn test_subclass_shadows_and_inherits() {
        let (host, classes, _, widget) = fixture();
        let table = classes.table(host.as_ref(), widget, MethodKind::Instance);
        // Both declarations in Widget, none from Base, plus the zero-arg one
        assert_eq!(table.candidates("setValue").len(), 3);
        assert!(table
            .candidates("setValue")
            .iter()
            .all(|e| e.declaring_class == widget));
        assert_eq!(table.candidates("title").len(), 1);
        assert_eq!(classes.len(), 1);
        classes.table(host.as_ref(), widget, MethodKind::Instance);
        assert_eq!(classes.len(), 1);
    }

    #[test]
    fn test_flags_pick_candidate() {
        let (host, classes, sigs, widget) = fixture();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);
        let recv = Receiver::Instance(object);

        let r = resolver.resolve(recv, "setValue2").unwrap();
        assert_eq!(r.method.encoding, "v@:i");
        let r = resolver.resolve(recv, "setValue3").unwrap();
        assert_eq!(r.method.encoding, "v@:d");
        let r = resolver.resolve(recv, "setValue0").unwrap();
        assert_eq!(r.method.selector, "setValue");
    }

    #[test]
    fn test_ambiguous_lists_all_candidates() {
        let (host, classes, sigs, widget) = fixture();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);

        let err = resolver.resolve(Receiver::Instance(object), "setValue").unwrap_err();
        let BridgeError::NotFound(err) = err else {
            panic!("expected NotFound");
        };
        assert_eq!(err.kind, NotFoundKind::Ambiguous);
        let names: Vec<&str> = err.candidates.iter().map(|c| c.call_name.as_str()).collect();
        assert!(names.contains(&"setValue2"));
        assert!(names.contains(&"setValue3"));
        assert!(names.contains(&"setValue0"));
    }

    #[test]
    fn test_flag_mismatch_and_missing() {
        let (host, classes, sigs, widget) = fixture();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);
        let recv = Receiver::Instance(object);

        let Err(BridgeError::NotFound(err)) = resolver.resolve(recv, "setValue4") else {
            panic!("expected NotFound");
        };
        assert_eq!(err.kind, NotFoundKind::NoFlagMatch);

        let Err(BridgeError::NotFound(err)) = resolver.resolve(recv, "frobnicate") else {
            panic!("expected NotFound");
        };
        assert_eq!(err.kind, NotFoundKind::Missing);
        assert_eq!(err.receiver, "Widget");
    }

    #[test]
    fn test_single_candidate_ignores_flags() {
        let (host, classes, sigs, widget) = fixture();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);
        let r = resolver.resolve(Receiver::Instance(object), "setSize").unwrap();
        assert_eq!(r.method.selector, "setSize:");
        assert_eq!(r.signature.arity(), 1);
    }

    #[test]
    fn test_class_receiver_and_init() {
        let (host, classes, sigs, widget) = fixture();
        host.declare_method(widget, MethodKind::Instance, "initWithTitle:", "@@:@");
        classes.invalidate();
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);

        let r = resolver.resolve(Receiver::Class(widget), "widget").unwrap();
        assert!(!r.alloc_first);

        let r = resolver.resolve(Receiver::Class(widget), "initWithTitle").unwrap();
        assert!(r.alloc_first);
        assert_eq!(r.family, MethodFamily::Init);
    }

    #[test]
    fn test_resolve_exact_selector() {
        let (host, classes, sigs, widget) = fixture();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);
        let r = resolver.resolve_selector(Receiver::Instance(object), "title").unwrap();
        assert_eq!(r.method.encoding, "@@:");
    }

    #[test]
    fn test_exact_selector_with_shared_key() {
        let (host, classes, sigs, widget) = fixture();
        host.declare_method(widget, MethodKind::Instance, "reload", "v16@0:8");
        host.declare_method(widget, MethodKind::Instance, "reload:", "v24@0:8@16");
        classes.invalidate();
        let object = host.create_object(widget);
        let resolver = Resolver::new(host.as_ref(), &classes, &sigs);
        let recv = Receiver::Instance(object);

        // The call name alone is ambiguous
        assert!(resolver.resolve(recv, "reload").is_err());

        let r = resolver.resolve_selector(recv, "reload:").unwrap();
        assert_eq!(r.method.encoding, "v24@0:8@16");
        let r = resolver.resolve_selector(recv, "reload").unwrap();
        assert_eq!(r.method.encoding, "v16@0:8");

        let Err(BridgeError::NotFound(err)) = resolver.resolve_selector(recv, "reload:later:") else {
            panic!("expected NotFound");
        };
        assert_eq!(err.kind, NotFoundKind::Missing);
    }
}
