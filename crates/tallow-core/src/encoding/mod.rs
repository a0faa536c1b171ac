//! Runtime type encodings
//!
//! The host runtime publishes a type-encoding string for every method
//! (`v24@0:8i16` is "returns void, takes self, _cmd and an int"). This module
//! decodes those strings into [`TypeTag`] trees, computes native storage
//! layout for them and caches parsed signatures by their encoding.
//!
//! # Grammar
//!
//! ```text
//! type      := qualifier* base offset?
//! qualifier := 'r' | 'n' | 'N' | 'o' | 'O' | 'R' | 'V' | 'A'
//! base      := 'c' | 'i' | 's' | 'l' | 'q' | 'C' | 'I' | 'S' | 'L' | 'Q'
//!            | 'f' | 'd' | 'B' | 'v' | '*' | '#' | ':' | '?'
//!            | '@' ( '?' | '"' name '"' )?
//!            | '^' type
//!            | '[' count type ']'
//!            | '{' name ( '=' member* )? '}'
//!            | '(' name ( '=' member* )? ')'
//!            | 'b' width
//! member    := ( '"' name '"' )? type
//! offset    := [+-]? digit+
//! ```

mod cache;
mod layout;
mod parser;
mod simplify;

pub use cache::{CacheStats, SignatureCache};
pub use layout::{Layout, PointerWidth};
pub use parser::{fixed_argument_count, parse, parse_strict, parse_type};
pub use simplify::{encode, encode_signature, simplify};

use std::fmt;

/// One member of a struct or union
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Member name, present only in ivar-style encodings (`{P="x"d}`)
    pub name: Option<String>,

    /// Member type
    pub tag: TypeTag,
}

impl Field {
    /// Create an unnamed member
    pub fn new(tag: TypeTag) -> Self {
        Self { name: None, tag }
    }

    /// Create a named member
    pub fn named(name: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: Some(name.into()),
            tag,
        }
    }
}

/// Struct or union body
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Composite {
    /// Type name (`None` for anonymous `?` names)
    pub name: Option<String>,

    /// Members in declaration order (empty for opaque types)
    pub fields: Vec<Field>,
}

impl Composite {
    /// Create a composite from a name and member types
    pub fn new(name: Option<&str>, tags: impl IntoIterator<Item = TypeTag>) -> Self {
        Self {
            name: name.map(str::to_string),
            fields: tags.into_iter().map(Field::new).collect(),
        }
    }
}

/// Canonical representation of one type from an encoding string
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// `c` signed char (also the 32-bit boolean encoding)
    Char,
    /// `s` short
    Short,
    /// `i` int
    Int,
    /// `l` long (always 32 bits in encodings)
    Long,
    /// `q` long long
    LongLong,
    /// `C` unsigned char
    UChar,
    /// `S` unsigned short
    UShort,
    /// `I` unsigned int
    UInt,
    /// `L` unsigned long (always 32 bits in encodings)
    ULong,
    /// `Q` unsigned long long
    ULongLong,
    /// `f` float
    Float,
    /// `d` double
    Double,
    /// `B` C99 bool
    Bool,
    /// `v` void
    Void,
    /// `*` NUL-terminated C string
    CString,
    /// `@` object reference (including blocks and class-hinted objects)
    Object,
    /// `#` class reference
    Class,
    /// `:` selector
    Selector,
    /// `^type` raw pointer
    Pointer(Box<TypeTag>),
    /// `{name=...}` struct
    Struct(Composite),
    /// `(name=...)` union
    Union(Composite),
    /// `[count type]` fixed-size array
    Array {
        /// Element count
        len: usize,
        /// Element type
        element: Box<TypeTag>,
    },
    /// `bN` bitfield of N bits
    Bitfield(u32),
    /// Unrecognized or malformed input
    Unknown,
}

impl TypeTag {
    /// Single-character code of this tag's outermost type
    pub fn code(&self) -> char {
        match self {
            TypeTag::Char => 'c',
            TypeTag::Short => 's',
            TypeTag::Int => 'i',
            TypeTag::Long => 'l',
            TypeTag::LongLong => 'q',
            TypeTag::UChar => 'C',
            TypeTag::UShort => 'S',
            TypeTag::UInt => 'I',
            TypeTag::ULong => 'L',
            TypeTag::ULongLong => 'Q',
            TypeTag::Float => 'f',
            TypeTag::Double => 'd',
            TypeTag::Bool => 'B',
            TypeTag::Void => 'v',
            TypeTag::CString => '*',
            TypeTag::Object => '@',
            TypeTag::Class => '#',
            TypeTag::Selector => ':',
            TypeTag::Pointer(_) => '^',
            TypeTag::Struct(_) => '{',
            TypeTag::Union(_) => '(',
            TypeTag::Array { .. } => '[',
            TypeTag::Bitfield(_) => 'b',
            TypeTag::Unknown => '?',
        }
    }

    /// Whether this is one of the integer-family tags
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            TypeTag::Char
                | TypeTag::Short
                | TypeTag::Int
                | TypeTag::Long
                | TypeTag::LongLong
                | TypeTag::UChar
                | TypeTag::UShort
                | TypeTag::UInt
                | TypeTag::ULong
                | TypeTag::ULongLong
                | TypeTag::Bitfield(_)
        )
    }

    /// Whether this is a floating-point tag
    pub fn is_float(&self) -> bool {
        matches!(self, TypeTag::Float | TypeTag::Double)
    }

    /// Whether values of this tag are host object references
    pub fn is_object(&self) -> bool {
        matches!(self, TypeTag::Object | TypeTag::Class)
    }

    /// Whether this is the void tag
    pub fn is_void(&self) -> bool {
        matches!(self, TypeTag::Void)
    }

    /// Whether any storage-relevant part of this tag is unknown.
    ///
    /// Pointees are not inspected: a pointer is marshalled as an address no
    /// matter what it points to.
    pub fn has_unknown_storage(&self) -> bool {
        match self {
            TypeTag::Unknown => true,
            TypeTag::Struct(c) | TypeTag::Union(c) => {
                c.fields.iter().any(|f| f.tag.has_unknown_storage())
            }
            TypeTag::Array { element, .. } => element.has_unknown_storage(),
            _ => false,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self))
    }
}

/// Ordered type list of a method: return type first, then parameters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    tags: Vec<TypeTag>,
}

impl Signature {
    /// Create a signature from a return type and parameters
    pub fn new(ret: TypeTag, params: impl IntoIterator<Item = TypeTag>) -> Self {
        let mut tags = vec![ret];
        tags.extend(params);
        Self { tags }
    }

    /// Create a signature from a raw tag list (index 0 is the return type)
    ///
    /// An empty list becomes a single unknown return type.
    pub fn from_tags(mut tags: Vec<TypeTag>) -> Self {
        if tags.is_empty() {
            tags.push(TypeTag::Unknown);
        }
        Self { tags }
    }

    /// Drop the implicit receiver and selector parameters of a method
    /// encoding, if present
    pub fn into_method(mut self) -> Self {
        let implicit = self.tags.len() >= 3
            && self.tags[1].is_object()
            && matches!(self.tags[2], TypeTag::Selector);
        if implicit {
            self.tags.drain(1..3);
        }
        self
    }

    /// All tags, return type first
    pub fn tags(&self) -> &[TypeTag] {
        &self.tags
    }

    /// Return type
    pub fn return_type(&self) -> &TypeTag {
        &self.tags[0]
    }

    /// Parameter types in declaration order
    pub fn params(&self) -> &[TypeTag] {
        &self.tags[1..]
    }

    /// Number of declared parameters
    pub fn arity(&self) -> usize {
        self.tags.len() - 1
    }

    /// Number of results a call with this signature pushes
    pub fn result_count(&self) -> usize {
        usize::from(!self.return_type().is_void())
    }

    /// Whether any storage-relevant tag is unknown
    pub fn has_unknown(&self) -> bool {
        self.tags.iter().any(TypeTag::has_unknown_storage)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_signature(self))
    }
}
