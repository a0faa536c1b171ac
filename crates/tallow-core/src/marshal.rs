//! Value marshalling between script values and native buffers
//!
//! Integers travel towards scripts as `i64` and are truncated to their
//! declared width on the way back; unsigned 64-bit values keep their bits.
//! Composite types are written and read member by member at the offsets
//! [`Layout`](crate::encoding::Layout) computes, and surface as positional
//! tables.

use crate::context::Context;
use crate::encoding::{Signature, TypeTag};
use crate::error::{BridgeError, ConversionError};
use crate::host::{ClassRef, HostPrimitive, HostRef, Receiver, SelectorRef};
use crate::native::{NativeArgs, NativeValue};
use crate::proxy::Ownership;
use crate::state::ScriptState;
use crate::value::ScriptValue;
use std::ffi::CString;

/// Largest native value the marshaller will allocate for one tag
const MAX_NATIVE_SIZE: usize = 1 << 24;

fn mismatch(tag: &TypeTag, value: &ScriptValue) -> ConversionError {
    ConversionError::TypeMismatch {
        expected: tag.clone(),
        got: value.type_name(),
    }
}

/// Converts values for one context
#[derive(Debug, Clone, Copy)]
pub struct Marshaller<'a> {
    cx: &'a Context,
}

impl<'a> Marshaller<'a> {
    /// Create a marshaller
    pub fn new(cx: &'a Context) -> Self {
        Self { cx }
    }

    /// Convert one script value to the native representation of `tag`
    ///
    /// Host objects created to box script primitives or wrap script
    /// functions are appended to `temps`; the caller releases them once the
    /// native side is done with the value.
    pub fn to_native(
        &self,
        state: &mut ScriptState,
        tag: &TypeTag,
        value: &ScriptValue,
        temps: &mut Vec<HostRef>,
    ) -> Result<NativeValue, BridgeError> {
        let size = self.cx.layout().size_of(tag);
        if size > MAX_NATIVE_SIZE {
            return Err(ConversionError::TooLarge {
                size,
                limit: MAX_NATIVE_SIZE,
            }
            .into());
        }
        let mut out = NativeValue::zeroed(size);
        self.write(state, tag, value, &mut out, 0, temps)?;
        Ok(out)
    }

    /// Marshal call arguments for `signature`
    ///
    /// Variadic methods take any number of extra arguments, passed as
    /// objects and followed by a nil terminator. Temporaries created before
    /// a failing argument are released.
    pub fn arguments(
        &self,
        state: &mut ScriptState,
        signature: &Signature,
        args: &[ScriptValue],
        variadic: bool,
    ) -> Result<NativeArgs, BridgeError> {
        let fixed = signature.arity();
        if args.len() < fixed || (!variadic && args.len() != fixed) {
            return Err(ConversionError::ArityMismatch {
                expected: fixed,
                got: args.len(),
            }
            .into());
        }

        let mut native = NativeArgs::new();
        let mut temps = Vec::new();
        let params = signature.params().iter().chain(std::iter::repeat(&TypeTag::Object));
        for (tag, value) in params.zip(args) {
            match self.to_native(state, tag, value, &mut temps) {
                Ok(v) => native.push(v),
                Err(err) => {
                    self.release_all(temps);
                    return Err(err);
                }
            }
        }
        if variadic {
            native.push(NativeValue::pointer(self.cx.layout().pointer_width(), 0));
        }
        *native.temporaries_mut() = temps;
        Ok(native)
    }

    /// Release host temporaries created while marshalling
    pub fn release_all(&self, temps: Vec<HostRef>) {
        for object in temps {
            self.cx.host().release(object);
        }
    }

    fn write(
        &self,
        state: &mut ScriptState,
        tag: &TypeTag,
        value: &ScriptValue,
        out: &mut NativeValue,
        offset: usize,
        temps: &mut Vec<HostRef>,
    ) -> Result<(), BridgeError> {
        let layout = self.cx.layout();
        let width = layout.pointer_width();
        let size = layout.size_of(tag);
        match tag {
            TypeTag::Bool => {
                let b = match value {
                    ScriptValue::Boolean(b) => *b,
                    ScriptValue::Nil => false,
                    other => other.to_number().ok_or_else(|| mismatch(tag, value))? != 0.0,
                };
                out.write_uint(offset, 1, u64::from(b));
            }
            t if t.is_integer() => {
                let bits = self.integer_bits(tag, value)?;
                out.write_uint(offset, size, bits);
            }
            TypeTag::Float => {
                let n = value.to_number().ok_or_else(|| mismatch(tag, value))?;
                out.write_uint(offset, 4, u64::from((n as f32).to_bits()));
            }
            TypeTag::Double => {
                let n = value.to_number().ok_or_else(|| mismatch(tag, value))?;
                out.write_uint(offset, 8, n.to_bits());
            }
            TypeTag::CString => {
                let address = match value {
                    ScriptValue::Nil => 0,
                    ScriptValue::LightPointer(a) => *a,
                    ScriptValue::String(s) => self.adopt(out, s)?,
                    other => return Err(mismatch(tag, other).into()),
                };
                out.write_uint(offset, width.bytes(), address as u64);
            }
            TypeTag::Object => {
                let address = self.object_address(state, tag, value, temps)?;
                out.write_uint(offset, width.bytes(), address as u64);
            }
            TypeTag::Class => {
                let address = match value {
                    ScriptValue::Nil => 0,
                    ScriptValue::LightPointer(a) => *a,
                    ScriptValue::Proxy(p) => match p.unwrap()? {
                        Receiver::Class(class) => class.address(),
                        Receiver::Instance(_) => return Err(mismatch(tag, value).into()),
                    },
                    ScriptValue::String(name) => self
                        .cx
                        .host()
                        .lookup_class(name)
                        .map(ClassRef::address)
                        .ok_or_else(|| mismatch(tag, value))?,
                    other => return Err(mismatch(tag, other).into()),
                };
                out.write_uint(offset, width.bytes(), address as u64);
            }
            TypeTag::Selector => {
                let address = match value {
                    ScriptValue::Nil => 0,
                    ScriptValue::LightPointer(a) => *a,
                    ScriptValue::String(name) => self.cx.host().register_selector(name).address(),
                    other => return Err(mismatch(tag, other).into()),
                };
                out.write_uint(offset, width.bytes(), address as u64);
            }
            TypeTag::Pointer(pointee) => {
                let address = match value {
                    ScriptValue::Nil => 0,
                    ScriptValue::LightPointer(a) => *a,
                    ScriptValue::Proxy(p) => p.unwrap()?.address(),
                    ScriptValue::String(s)
                        if matches!(**pointee, TypeTag::Char | TypeTag::UChar | TypeTag::Void) =>
                    {
                        self.adopt(out, s)?
                    }
                    other => return Err(mismatch(tag, other).into()),
                };
                out.write_uint(offset, width.bytes(), address as u64);
            }
            TypeTag::Struct(c) => {
                let ScriptValue::Table(items) = value else {
                    return Err(mismatch(tag, value).into());
                };
                if items.len() > c.fields.len() {
                    return Err(ConversionError::ArityMismatch {
                        expected: c.fields.len(),
                        got: items.len(),
                    }
                    .into());
                }
                let offsets = layout.field_offsets(&c.fields);
                for ((field, field_offset), item) in c.fields.iter().zip(offsets).zip(items) {
                    self.write(state, &field.tag, item, out, offset + field_offset, temps)?;
                }
            }
            TypeTag::Union(c) => {
                let Some(first) = c.fields.first() else {
                    return Ok(());
                };
                let member = match value {
                    ScriptValue::Table(items) => items.first().unwrap_or(&ScriptValue::Nil),
                    other => other,
                };
                self.write(state, &first.tag, member, out, offset, temps)?;
            }
            TypeTag::Array { len, element } => {
                let ScriptValue::Table(items) = value else {
                    return Err(mismatch(tag, value).into());
                };
                if items.len() > *len {
                    return Err(ConversionError::ArityMismatch {
                        expected: *len,
                        got: items.len(),
                    }
                    .into());
                }
                let stride = layout.size_of(element);
                for (i, item) in items.iter().enumerate() {
                    self.write(state, element, item, out, offset + i * stride, temps)?;
                }
            }
            TypeTag::Void | TypeTag::Unknown => {
                return Err(ConversionError::Unsupported(tag.clone()).into());
            }
            // Every integer tag is caught by the guard above
            _ => return Err(ConversionError::Unsupported(tag.clone()).into()),
        }
        Ok(())
    }

    fn integer_bits(&self, tag: &TypeTag, value: &ScriptValue) -> Result<u64, ConversionError> {
        match (tag, value) {
            (TypeTag::Char | TypeTag::UChar, ScriptValue::Boolean(b)) => Ok(u64::from(*b)),
            (TypeTag::ULongLong, ScriptValue::Number(n)) if *n >= 9_223_372_036_854_775_808.0 => {
                Ok(*n as u64)
            }
            (_, v) => v.to_integer().map(|i| i as u64).ok_or_else(|| mismatch(tag, value)),
        }
    }

    fn adopt(&self, out: &mut NativeValue, s: &str) -> Result<usize, ConversionError> {
        let owned = CString::new(s).map_err(|e| ConversionError::InteriorNul(e.nul_position()))?;
        Ok(out.adopt_string(owned))
    }

    fn object_address(
        &self,
        state: &mut ScriptState,
        tag: &TypeTag,
        value: &ScriptValue,
        temps: &mut Vec<HostRef>,
    ) -> Result<usize, BridgeError> {
        let host = self.cx.host();
        let primitive = match value {
            ScriptValue::Nil => return Ok(0),
            ScriptValue::LightPointer(a) => return Ok(*a),
            ScriptValue::Proxy(p) => return Ok(p.unwrap()?.address()),
            ScriptValue::Function(f) => {
                let id = state.register_handler(f.clone());
                let Some(object) = host.wrap_handler(id) else {
                    state.release_handler(id);
                    return Err(ConversionError::Unboxable("function").into());
                };
                temps.push(object);
                return Ok(object.address());
            }
            ScriptValue::String(s) => HostPrimitive::String(s.to_string()),
            ScriptValue::Integer(i) => HostPrimitive::Integer(*i),
            ScriptValue::Number(n) => HostPrimitive::Number(*n),
            ScriptValue::Boolean(b) => HostPrimitive::Boolean(*b),
            ScriptValue::Table(_) => return Err(mismatch(tag, value).into()),
        };
        let object = host
            .box_primitive(&primitive)
            .ok_or(ConversionError::Unboxable(value.type_name()))?;
        temps.push(object);
        Ok(object.address())
    }

    /// Convert a native value of type `tag` to a script value
    ///
    /// `ownership` says whether a returned object reference carries a
    /// reference for the caller.
    pub fn to_script(
        &self,
        tag: &TypeTag,
        native: &NativeValue,
        ownership: Ownership,
    ) -> Result<ScriptValue, ConversionError> {
        self.read(tag, native, 0, ownership)
    }

    fn read(
        &self,
        tag: &TypeTag,
        native: &NativeValue,
        offset: usize,
        ownership: Ownership,
    ) -> Result<ScriptValue, ConversionError> {
        let layout = self.cx.layout();
        let width = layout.pointer_width();
        let size = layout.size_of(tag);
        let need = offset.saturating_add(size);
        if native.len() < need {
            return Err(ConversionError::BufferTooShort {
                need,
                have: native.len(),
            });
        }
        let short = || ConversionError::BufferTooShort {
            need,
            have: native.len(),
        };
        let value = match tag {
            TypeTag::Char | TypeTag::Short | TypeTag::Int | TypeTag::Long | TypeTag::LongLong => {
                ScriptValue::Integer(native.read_int(offset, size).ok_or_else(short)?)
            }
            TypeTag::UChar | TypeTag::UShort | TypeTag::UInt | TypeTag::ULong | TypeTag::ULongLong => {
                ScriptValue::Integer(native.read_uint(offset, size).ok_or_else(short)? as i64)
            }
            TypeTag::Bitfield(bits) => {
                let raw = native.read_uint(offset, size).ok_or_else(short)?;
                let mask = if *bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
                ScriptValue::Integer((raw & mask) as i64)
            }
            TypeTag::Bool => ScriptValue::Boolean(native.read_uint(offset, 1).ok_or_else(short)? != 0),
            TypeTag::Float => ScriptValue::Number(f64::from(native.read_f32(offset).ok_or_else(short)?)),
            TypeTag::Double => ScriptValue::Number(native.read_f64(offset).ok_or_else(short)?),
            TypeTag::CString => {
                let address = native.read_pointer(width, offset).ok_or_else(short)?;
                if address == 0 {
                    ScriptValue::Nil
                } else if let Some(s) = native.c_string_at(address) {
                    ScriptValue::from(s.to_string_lossy().into_owned())
                } else if let Some(s) = self.cx.host().read_c_string(address) {
                    ScriptValue::from(s)
                } else {
                    ScriptValue::LightPointer(address)
                }
            }
            TypeTag::Object => {
                let address = native.read_pointer(width, offset).ok_or_else(short)?;
                match HostRef::new(address) {
                    Some(object) => self.object_value(object, ownership),
                    None => ScriptValue::Nil,
                }
            }
            TypeTag::Class => {
                let address = native.read_pointer(width, offset).ok_or_else(short)?;
                match ClassRef::new(address) {
                    Some(class) => ScriptValue::Proxy(self.cx.proxies().wrap_class(class)),
                    None => ScriptValue::Nil,
                }
            }
            TypeTag::Selector => {
                let address = native.read_pointer(width, offset).ok_or_else(short)?;
                match SelectorRef::new(address) {
                    Some(sel) => match self.cx.host().selector_name(sel) {
                        Some(name) => ScriptValue::from(name),
                        None => ScriptValue::LightPointer(address),
                    },
                    None => ScriptValue::Nil,
                }
            }
            TypeTag::Pointer(_) => match native.read_pointer(width, offset).ok_or_else(short)? {
                0 => ScriptValue::Nil,
                address => ScriptValue::LightPointer(address),
            },
            TypeTag::Struct(c) => {
                let offsets = layout.field_offsets(&c.fields);
                let items = c
                    .fields
                    .iter()
                    .zip(offsets)
                    .map(|(field, field_offset)| {
                        self.read(&field.tag, native, offset + field_offset, Ownership::Borrowed)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                ScriptValue::Table(items)
            }
            TypeTag::Union(c) => match c.fields.first() {
                Some(first) => ScriptValue::Table(vec![self.read(&first.tag, native, offset, Ownership::Borrowed)?]),
                None => ScriptValue::Table(Vec::new()),
            },
            TypeTag::Array { len, element } => {
                let stride = layout.size_of(element);
                let items = (0..*len)
                    .map(|i| self.read(element, native, offset + i * stride, Ownership::Borrowed))
                    .collect::<Result<Vec<_>, _>>()?;
                ScriptValue::Table(items)
            }
            TypeTag::Void => ScriptValue::Nil,
            TypeTag::Unknown => return Err(ConversionError::Unsupported(tag.clone())),
        };
        Ok(value)
    }

    fn object_value(&self, object: HostRef, ownership: Ownership) -> ScriptValue {
        let host = self.cx.host();
        if self.cx.options().unbox_primitives {
            if let Some(primitive) = host.unbox(object) {
                if ownership == Ownership::Owned {
                    host.release(object);
                }
                return match primitive {
                    HostPrimitive::String(s) => ScriptValue::from(s),
                    HostPrimitive::Integer(i) => ScriptValue::Integer(i),
                    HostPrimitive::Number(n) => ScriptValue::Number(n),
                    HostPrimitive::Boolean(b) => ScriptValue::Boolean(b),
                };
            }
        }
        ScriptValue::Proxy(self.cx.proxies().wrap(object, ownership))
    }
}
