//! Type-encoding parser
//!
//! Parsing never fails outright: anything the grammar does not recognize
//! becomes [`TypeTag::Unknown`] and parsing resumes after it, so a usable
//! prefix of a signature survives a single unsupported field.
//! [`parse_strict`] turns the first storage-relevant unknown into a
//! [`ParseError`] for callers that need the whole signature.

use super::{Composite, Field, Signature, TypeTag};
use crate::error::ParseError;

/// Composite nesting limit; deeper input is treated as malformed
const MAX_DEPTH: usize = 64;

/// Parse a full encoding into a signature (index 0 is the return type)
///
/// Empty or wholly malformed input yields a signature containing
/// [`TypeTag::Unknown`].
pub fn parse(encoding: &str) -> Signature {
    let mut parser = Parser::new(encoding);
    Signature::from_tags(parser.parse_all())
}

/// Parse a full encoding, rejecting any storage-relevant unknown type
pub fn parse_strict(encoding: &str) -> Result<Signature, ParseError> {
    if encoding.is_empty() {
        return Err(ParseError {
            encoding: String::new(),
            offset: 0,
            reason: "empty encoding".to_string(),
        });
    }
    let mut parser = Parser::new(encoding);
    let tags = parser.parse_all();
    match parser.first_error.take() {
        Some((offset, reason)) => Err(ParseError {
            encoding: encoding.to_string(),
            offset,
            reason: reason.to_string(),
        }),
        None => Ok(Signature::from_tags(tags)),
    }
}

/// Parse exactly one type from the start of `encoding`
///
/// Trailing input is ignored.
pub fn parse_type(encoding: &str) -> TypeTag {
    Parser::new(encoding).parse_type()
}

/// Number of declared parameters of a method encoding
///
/// The implicit receiver and selector are not counted. Unknown trailing
/// fields still count as one parameter each, which is all a variadic call
/// needs to know where its fixed arguments end.
pub fn fixed_argument_count(encoding: &str) -> usize {
    parse(encoding).into_method().arity()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    /// Nesting level inside pointees, where unknowns do not matter
    pointee: usize,
    first_error: Option<(usize, &'static str)>,
}

impl<'a> Parser<'a> {
    fn new(encoding: &'a str) -> Self {
        Self {
            bytes: encoding.as_bytes(),
            pos: 0,
            depth: 0,
            pointee: 0,
            first_error: None,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn unknown(&mut self, offset: usize, reason: &'static str) -> TypeTag {
        if self.pointee == 0 && self.first_error.is_none() {
            self.first_error = Some((offset, reason));
        }
        TypeTag::Unknown
    }

    fn parse_all(&mut self) -> Vec<TypeTag> {
        let mut tags = Vec::new();
        loop {
            self.skip_offset();
            if self.at_end() {
                break;
            }
            tags.push(self.parse_type());
        }
        if tags.is_empty() {
            tags.push(self.unknown(0, "empty encoding"));
        }
        tags
    }

    /// Skip a stack-offset annotation (`8`, `-4`, `+12`)
    fn skip_offset(&mut self) {
        if matches!(self.peek(), Some(b'+' | b'-'))
            && self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit)
        {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn skip_qualifiers(&mut self) {
        while matches!(
            self.peek(),
            Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V' | b'A')
        ) {
            self.pos += 1;
        }
    }

    fn parse_number(&mut self) -> Option<usize> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()?
            .parse()
            .ok()
    }

    /// Read up to (not including) `end`; `None` if input runs out first
    fn read_until(&mut self, end: u8) -> Option<String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == end {
                let text = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
                self.pos += 1;
                return Some(text);
            }
            self.pos += 1;
        }
        None
    }

    fn parse_type(&mut self) -> TypeTag {
        self.skip_qualifiers();
        let start = self.pos;
        let Some(b) = self.bump() else {
            return self.unknown(start, "unexpected end of encoding");
        };
        match b {
            b'c' => TypeTag::Char,
            b's' => TypeTag::Short,
            b'i' => TypeTag::Int,
            b'l' => TypeTag::Long,
            b'q' => TypeTag::LongLong,
            b'C' => TypeTag::UChar,
            b'S' => TypeTag::UShort,
            b'I' => TypeTag::UInt,
            b'L' => TypeTag::ULong,
            b'Q' => TypeTag::ULongLong,
            b'f' => TypeTag::Float,
            b'd' => TypeTag::Double,
            b'B' => TypeTag::Bool,
            b'v' => TypeTag::Void,
            b'*' => TypeTag::CString,
            b'#' => TypeTag::Class,
            b':' => TypeTag::Selector,
            b'@' => self.parse_object(start),
            b'^' => {
                if self.depth >= MAX_DEPTH {
                    while self.peek() == Some(b'^') {
                        self.pos += 1;
                    }
                    return self.unknown(start, "nesting too deep");
                }
                self.depth += 1;
                self.pointee += 1;
                let pointee = self.parse_type();
                self.pointee -= 1;
                self.depth -= 1;
                TypeTag::Pointer(Box::new(pointee))
            }
            b'[' => self.parse_array(start),
            b'{' => self.parse_composite(start, b'}', TypeTag::Struct),
            b'(' => self.parse_composite(start, b')', TypeTag::Union),
            b'b' => match self.parse_number() {
                Some(width) if width > 0 && width <= 64 => TypeTag::Bitfield(width as u32),
                _ => self.unknown(start, "bitfield without a valid width"),
            },
            b'?' => self.unknown(start, "undefined type"),
            _ => self.unknown(start, "unrecognized type character"),
        }
    }

    fn parse_object(&mut self, start: usize) -> TypeTag {
        match self.peek() {
            // Block
            Some(b'?') => {
                self.pos += 1;
                TypeTag::Object
            }
            // Class hint: @"NSString"
            Some(b'"') => {
                self.pos += 1;
                match self.read_until(b'"') {
                    Some(_) => TypeTag::Object,
                    None => self.unknown(start, "unterminated class name"),
                }
            }
            _ => TypeTag::Object,
        }
    }

    fn parse_array(&mut self, start: usize) -> TypeTag {
        let Some(len) = self.parse_number() else {
            // Still consume the rest so the caller resumes after it
            self.skip_to_close(b'[', b']');
            return self.unknown(start, "array without a count");
        };
        if self.depth >= MAX_DEPTH {
            self.skip_to_close(b'[', b']');
            return self.unknown(start, "nesting too deep");
        }
        self.depth += 1;
        let element = self.parse_type();
        self.depth -= 1;
        if self.bump() != Some(b']') {
            return self.unknown(start, "unterminated array");
        }
        TypeTag::Array {
            len,
            element: Box::new(element),
        }
    }

    fn parse_composite(
        &mut self,
        start: usize,
        close: u8,
        make: fn(Composite) -> TypeTag,
    ) -> TypeTag {
        let open = self.bytes[start];
        if self.depth >= MAX_DEPTH {
            self.skip_to_close(open, close);
            return self.unknown(start, "nesting too deep");
        }

        // Name runs up to '=' (member list follows) or the closer (opaque)
        let name_start = self.pos;
        loop {
            match self.peek() {
                None => return self.unknown(start, "unterminated struct or union"),
                Some(b'=') => break,
                Some(b) if b == close => break,
                Some(b'{' | b'(' | b'[' | b'"') => {
                    return self.unknown(start, "malformed struct or union name")
                }
                Some(_) => self.pos += 1,
            }
        }
        let raw_name = String::from_utf8_lossy(&self.bytes[name_start..self.pos]).into_owned();
        let name = if raw_name.is_empty() || raw_name == "?" {
            None
        } else {
            Some(raw_name)
        };

        let mut fields = Vec::new();
        if self.bump() == Some(b'=') {
            self.depth += 1;
            loop {
                match self.peek() {
                    None => {
                        self.depth -= 1;
                        return self.unknown(start, "unterminated struct or union");
                    }
                    Some(b) if b == close => {
                        self.pos += 1;
                        break;
                    }
                    Some(b'"') => {
                        self.pos += 1;
                        let Some(field_name) = self.read_until(b'"') else {
                            self.depth -= 1;
                            return self.unknown(start, "unterminated member name");
                        };
                        let tag = self.parse_type();
                        fields.push(Field::named(field_name, tag));
                    }
                    Some(_) => {
                        let tag = self.parse_type();
                        fields.push(Field::new(tag));
                    }
                }
            }
            self.depth -= 1;
        }
        make(Composite { name, fields })
    }

    /// Skip to the delimiter closing an already-opened `open`
    fn skip_to_close(&mut self, open: u8, close: u8) {
        let mut level = 1usize;
        while let Some(b) = self.bump() {
            if b == open {
                level += 1;
            } else if b == close {
                level -= 1;
                if level == 0 {
                    return;
                }
            }
        }
    }
}
