//! Native call buffers
//!
//! A [`NativeValue`] is the byte image of one argument or return value, laid
//! out exactly as the host ABI stores it. C strings written by the marshaller
//! are copied into an arena owned by the value, so the buffer never borrows
//! script memory; the pointer slot holds the arena copy's address.

use crate::encoding::PointerWidth;
use crate::host::HostRef;
use std::ffi::{CStr, CString};

/// Byte image of one native value plus the C strings it points at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NativeValue {
    bytes: Vec<u8>,
    strings: Vec<CString>,
}

impl NativeValue {
    /// Wrap raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            strings: Vec::new(),
        }
    }

    /// Empty value (void return)
    pub fn void() -> Self {
        Self::default()
    }

    /// Zero-filled value of `size` bytes
    pub fn zeroed(size: usize) -> Self {
        Self::new(vec![0; size])
    }

    /// `i8` value
    pub fn i8(v: i8) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `i16` value
    pub fn i16(v: i16) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `i32` value
    pub fn i32(v: i32) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `i64` value
    pub fn i64(v: i64) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `u64` value
    pub fn u64(v: u64) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `f32` value
    pub fn f32(v: f32) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// `f64` value
    pub fn f64(v: f64) -> Self {
        Self::new(v.to_ne_bytes().to_vec())
    }

    /// One-byte boolean
    pub fn bool(v: bool) -> Self {
        Self::new(vec![u8::from(v)])
    }

    /// Pointer-sized address
    pub fn pointer(width: PointerWidth, address: usize) -> Self {
        let mut value = Self::zeroed(width.bytes());
        value.write_uint(0, width.bytes(), address as u64);
        value
    }

    /// Object reference (`None` is nil)
    pub fn object(width: PointerWidth, object: Option<HostRef>) -> Self {
        Self::pointer(width, object.map_or(0, HostRef::address))
    }

    /// C string owned by this value
    ///
    /// Returns `None` if `s` contains NUL.
    pub fn c_string(width: PointerWidth, s: &str) -> Option<Self> {
        let owned = CString::new(s).ok()?;
        let mut value = Self::zeroed(width.bytes());
        let address = value.adopt_string(owned);
        value.write_uint(0, width.bytes(), address as u64);
        Some(value)
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Byte length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the value has no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Move a C string into the arena and return its address
    ///
    /// Moving a `CString` does not move its heap buffer, so the address stays
    /// valid for as long as this value lives.
    pub fn adopt_string(&mut self, s: CString) -> usize {
        let address = s.as_ptr() as usize;
        self.strings.push(s);
        address
    }

    /// Arena string at `address`, if this value owns one there
    pub fn c_string_at(&self, address: usize) -> Option<&CStr> {
        self.strings
            .iter()
            .find(|s| s.as_ptr() as usize == address)
            .map(CString::as_c_str)
    }

    /// Copy another value's bytes to `offset` and take over its strings
    pub fn splice(&mut self, offset: usize, other: NativeValue) {
        let end = offset + other.bytes.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(&other.bytes);
        self.strings.extend(other.strings);
    }

    /// Write the low `size` bytes of `bits` at `offset` in native byte order
    ///
    /// Sizes other than 1, 2, 4 and 8 are written least significant byte
    /// first.
    pub fn write_uint(&mut self, offset: usize, size: usize, bits: u64) {
        let end = offset + size;
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        let dst = &mut self.bytes[offset..end];
        match size {
            1 => dst.copy_from_slice(&(bits as u8).to_ne_bytes()),
            2 => dst.copy_from_slice(&(bits as u16).to_ne_bytes()),
            4 => dst.copy_from_slice(&(bits as u32).to_ne_bytes()),
            8 => dst.copy_from_slice(&bits.to_ne_bytes()),
            _ => dst.copy_from_slice(&bits.to_le_bytes()[..size.min(8)]),
        }
    }

    /// Read `size` bytes at `offset` as an unsigned integer
    pub fn read_uint(&self, offset: usize, size: usize) -> Option<u64> {
        let src = self.bytes.get(offset..offset.checked_add(size)?)?;
        Some(match size {
            1 => u64::from(src[0]),
            2 => u64::from(u16::from_ne_bytes([src[0], src[1]])),
            4 => u64::from(u32::from_ne_bytes([src[0], src[1], src[2], src[3]])),
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(src);
                u64::from_ne_bytes(b)
            }
            _ => {
                let mut b = [0u8; 8];
                let n = size.min(8);
                b[..n].copy_from_slice(&src[..n]);
                u64::from_le_bytes(b)
            }
        })
    }

    /// Read `size` bytes at `offset` as a sign-extended integer
    pub fn read_int(&self, offset: usize, size: usize) -> Option<i64> {
        let bits = self.read_uint(offset, size)?;
        Some(match size {
            1 => i64::from(bits as u8 as i8),
            2 => i64::from(bits as u16 as i16),
            4 => i64::from(bits as u32 as i32),
            _ => bits as i64,
        })
    }

    /// Read an `f32` at `offset`
    pub fn read_f32(&self, offset: usize) -> Option<f32> {
        self.read_uint(offset, 4).map(|b| f32::from_bits(b as u32))
    }

    /// Read an `f64` at `offset`
    pub fn read_f64(&self, offset: usize) -> Option<f64> {
        self.read_uint(offset, 8).map(f64::from_bits)
    }

    /// Read a pointer-sized address at `offset`
    pub fn read_pointer(&self, width: PointerWidth, offset: usize) -> Option<usize> {
        self.read_uint(offset, width.bytes()).map(|b| b as usize)
    }

    /// Interpret the whole value as a signed integer of its own width
    pub fn as_i64(&self) -> Option<i64> {
        match self.len() {
            1 | 2 | 4 | 8 => self.read_int(0, self.len()),
            _ => None,
        }
    }

    /// Interpret the whole value as a float of its own width
    pub fn as_f64(&self) -> Option<f64> {
        match self.len() {
            4 => self.read_f32(0).map(f64::from),
            8 => self.read_f64(0),
            _ => None,
        }
    }

    /// Interpret the whole value as an address
    pub fn as_address(&self) -> Option<usize> {
        match self.len() {
            4 | 8 => self.read_uint(0, self.len()).map(|b| b as usize),
            _ => None,
        }
    }

    /// String this value points at, if the pointer targets its own arena
    pub fn as_c_str(&self) -> Option<&CStr> {
        self.c_string_at(self.as_address()?)
    }
}

/// Marshalled arguments of one native call
///
/// Host objects created to box script primitives for the call are listed in
/// `temporaries` and released once the call returns.
#[derive(Debug, Default)]
pub struct NativeArgs {
    values: Vec<NativeValue>,
    temporaries: Vec<HostRef>,
}

impl NativeArgs {
    /// Empty argument list
    pub fn new() -> Self {
        Self::default()
    }

    /// Arguments from pre-built values
    pub fn from_values(values: Vec<NativeValue>) -> Self {
        Self {
            values,
            temporaries: Vec::new(),
        }
    }

    /// Append an argument
    pub fn push(&mut self, value: NativeValue) {
        self.values.push(value);
    }

    /// Argument at `index`
    pub fn get(&self, index: usize) -> Option<&NativeValue> {
        self.values.get(index)
    }

    /// All arguments
    pub fn values(&self) -> &[NativeValue] {
        &self.values
    }

    /// Number of arguments
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no arguments
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Temporaries to release after the call
    pub fn temporaries_mut(&mut self) -> &mut Vec<HostRef> {
        &mut self.temporaries
    }

    /// Take the temporaries out for release
    pub fn take_temporaries(&mut self) -> Vec<HostRef> {
        std::mem::take(&mut self.temporaries)
    }
}
