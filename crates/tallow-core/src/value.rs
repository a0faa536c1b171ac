//! Script-side values
//!
//! [`ScriptValue`] is what lives in a stack slot of the embedded engine. Host
//! objects appear as [`ScriptValue::Proxy`] handles; script functions are
//! native closures that receive the re-entry scope of the call that runs
//! them.

use crate::dispatch::Reentry;
use crate::error::ScriptError;
use crate::proxy::ProxyRef;
use std::fmt;
use std::sync::Arc;

/// Body of a script function
pub type NativeFn =
    dyn Fn(&mut Reentry<'_>, Vec<ScriptValue>) -> Result<Vec<ScriptValue>, ScriptError> + Send + Sync;

/// A callable script function
#[derive(Clone)]
pub struct ScriptFunction {
    name: Arc<str>,
    func: Arc<NativeFn>,
}

impl ScriptFunction {
    /// Create a named function
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&mut Reentry<'_>, Vec<ScriptValue>) -> Result<Vec<ScriptValue>, ScriptError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    /// Function name, as shown in tracebacks
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the body directly, without recording a call frame
    ///
    /// Use [`Reentry::call_function`] to get tracebacks.
    pub fn call_raw(
        &self,
        reentry: &mut Reentry<'_>,
        args: Vec<ScriptValue>,
    ) -> Result<Vec<ScriptValue>, ScriptError> {
        (self.func)(reentry, args)
    }

    /// Whether two handles refer to the same function body
    pub fn ptr_eq(&self, other: &ScriptFunction) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptFunction({})", self.name)
    }
}

/// A value in a script stack slot
#[derive(Clone, Default)]
pub enum ScriptValue {
    /// nil
    #[default]
    Nil,
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Floating-point number
    Number(f64),
    /// Immutable string
    String(Arc<str>),
    /// Positional table (structs, arrays, unions)
    Table(Vec<ScriptValue>),
    /// Raw address with no ownership
    LightPointer(usize),
    /// Handle to a host object or class
    Proxy(ProxyRef),
    /// Callable function
    Function(ScriptFunction),
}

impl ScriptValue {
    /// Script-visible type name
    pub fn type_name(&self) -> &'static str {
        match self {
            ScriptValue::Nil => "nil",
            ScriptValue::Boolean(_) => "boolean",
            ScriptValue::Integer(_) => "integer",
            ScriptValue::Number(_) => "number",
            ScriptValue::String(_) => "string",
            ScriptValue::Table(_) => "table",
            ScriptValue::LightPointer(_) => "lightuserdata",
            ScriptValue::Proxy(_) => "userdata",
            ScriptValue::Function(_) => "function",
        }
    }

    /// Create a string value
    pub fn string(s: &str) -> Self {
        ScriptValue::String(Arc::from(s))
    }

    /// Whether this is nil
    pub fn is_nil(&self) -> bool {
        matches!(self, ScriptValue::Nil)
    }

    /// Truthiness: everything except nil and false is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, ScriptValue::Nil | ScriptValue::Boolean(false))
    }

    /// Integer value, coercing numbers (truncating) and numeric strings
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            ScriptValue::Integer(i) => Some(*i),
            ScriptValue::Number(n) if n.is_finite() => Some(*n as i64),
            ScriptValue::String(s) => match parse_numeric(s)? {
                ScriptValue::Integer(i) => Some(i),
                ScriptValue::Number(n) if n.is_finite() => Some(n as i64),
                _ => None,
            },
            _ => None,
        }
    }

    /// Float value, coercing integers and numeric strings
    pub fn to_number(&self) -> Option<f64> {
        match self {
            ScriptValue::Integer(i) => Some(*i as f64),
            ScriptValue::Number(n) => Some(*n),
            ScriptValue::String(s) => match parse_numeric(s)? {
                ScriptValue::Integer(i) => Some(i as f64),
                ScriptValue::Number(n) => Some(n),
                _ => None,
            },
            _ => None,
        }
    }

    /// String contents, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScriptValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Proxy handle, if this is one
    pub fn as_proxy(&self) -> Option<&ProxyRef> {
        match self {
            ScriptValue::Proxy(p) => Some(p),
            _ => None,
        }
    }
}

/// Parse a numeric string the way script arithmetic coerces it
///
/// Leading and trailing whitespace is ignored; `0x` prefixes are hex
/// integers.
pub fn parse_numeric(s: &str) -> Option<ScriptValue> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        let v = u64::from_str_radix(hex, 16).ok()? as i64;
        return Some(ScriptValue::Integer(if negative { v.wrapping_neg() } else { v }));
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(ScriptValue::Integer(i));
    }
    // Reject the spellings Rust accepts but script arithmetic does not
    if digits.is_empty() || digits.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return None;
    }
    s.parse::<f64>().ok().map(ScriptValue::Number)
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ScriptValue::Nil, ScriptValue::Nil) => true,
            (ScriptValue::Boolean(a), ScriptValue::Boolean(b)) => a == b,
            (ScriptValue::Integer(a), ScriptValue::Integer(b)) => a == b,
            (ScriptValue::Number(a), ScriptValue::Number(b)) => a == b,
            (ScriptValue::Integer(a), ScriptValue::Number(b))
            | (ScriptValue::Number(b), ScriptValue::Integer(a)) => (*a as f64) == *b,
            (ScriptValue::String(a), ScriptValue::String(b)) => a == b,
            (ScriptValue::Table(a), ScriptValue::Table(b)) => a == b,
            (ScriptValue::LightPointer(a), ScriptValue::LightPointer(b)) => a == b,
            (ScriptValue::Proxy(a), ScriptValue::Proxy(b)) => Arc::ptr_eq(a, b),
            (ScriptValue::Function(a), ScriptValue::Function(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => f.write_str("Nil"),
            ScriptValue::Boolean(b) => write!(f, "Boolean({})", b),
            ScriptValue::Integer(i) => write!(f, "Integer({})", i),
            ScriptValue::Number(n) => write!(f, "Number({})", n),
            ScriptValue::String(s) => write!(f, "String({:?})", s),
            ScriptValue::Table(items) => f.debug_tuple("Table").field(items).finish(),
            ScriptValue::LightPointer(a) => write!(f, "LightPointer({:#x})", a),
            ScriptValue::Proxy(p) => write!(f, "Proxy({:?})", p.receiver()),
            ScriptValue::Function(func) => write!(f, "{:?}", func),
        }
    }
}

impl fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptValue::Nil => f.write_str("nil"),
            ScriptValue::Boolean(b) => write!(f, "{}", b),
            ScriptValue::Integer(i) => write!(f, "{}", i),
            ScriptValue::Number(n) => write!(f, "{}", n),
            ScriptValue::String(s) => write!(f, "\"{}\"", s),
            ScriptValue::Table(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("}")
            }
            ScriptValue::LightPointer(a) => write!(f, "lightuserdata: {:#x}", a),
            ScriptValue::Proxy(p) => write!(f, "{}", p),
            ScriptValue::Function(func) => write!(f, "function: {}", func.name()),
        }
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        ScriptValue::Boolean(b)
    }
}

impl From<i64> for ScriptValue {
    fn from(i: i64) -> Self {
        ScriptValue::Integer(i)
    }
}

impl From<i32> for ScriptValue {
    fn from(i: i32) -> Self {
        ScriptValue::Integer(i64::from(i))
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        ScriptValue::Number(n)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        ScriptValue::string(s)
    }
}

impl From<String> for ScriptValue {
    fn from(s: String) -> Self {
        ScriptValue::String(Arc::from(s))
    }
}

impl From<ProxyRef> for ScriptValue {
    fn from(p: ProxyRef) -> Self {
        ScriptValue::Proxy(p)
    }
}

impl From<ScriptFunction> for ScriptValue {
    fn from(f: ScriptFunction) -> Self {
        ScriptValue::Function(f)
    }
}

impl From<Vec<ScriptValue>> for ScriptValue {
    fn from(items: Vec<ScriptValue>) -> Self {
        ScriptValue::Table(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_string_coercion() {
        assert_eq!(ScriptValue::string(" 42 ").to_integer(), Some(42));
        assert_eq!(ScriptValue::string("0x10").to_integer(), Some(16));
        assert_eq!(ScriptValue::string("-0x10").to_integer(), Some(-16));
        assert_eq!(ScriptValue::string("2.5").to_number(), Some(2.5));
        assert_eq!(ScriptValue::string("1e3").to_number(), Some(1000.0));
        assert_eq!(ScriptValue::string("abc").to_number(), None);
        assert_eq!(ScriptValue::string("inf").to_number(), None);
        assert_eq!(ScriptValue::string("").to_integer(), None);
    }

    #[test]
    fn test_number_truncates_to_integer() {
        assert_eq!(ScriptValue::Number(3.9).to_integer(), Some(3));
        assert_eq!(ScriptValue::Number(-3.9).to_integer(), Some(-3));
        assert_eq!(ScriptValue::Number(f64::NAN).to_integer(), None);
        assert_eq!(ScriptValue::Boolean(true).to_integer(), None);
    }

    #[test]
    fn test_truthiness() {
        assert!(!ScriptValue::Nil.is_truthy());
        assert!(!ScriptValue::Boolean(false).is_truthy());
        assert!(ScriptValue::Integer(0).is_truthy());
        assert!(ScriptValue::string("").is_truthy());
    }

    #[test]
    fn test_integer_number_equality() {
        assert_eq!(ScriptValue::Integer(2), ScriptValue::Number(2.0));
        assert_ne!(ScriptValue::Integer(2), ScriptValue::string("2"));
    }

    #[test]
    fn test_display_nested_table() {
        let v = ScriptValue::Table(vec![1.into(), "x".into(), ScriptValue::Table(vec![true.into()])]);
        assert_eq!(v.to_string(), "{1, \"x\", {true}}");
        assert_eq!(v.type_name(), "table");
    }
}
