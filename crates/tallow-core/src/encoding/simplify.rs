//! Re-encoding and simplification of parsed types

use super::{parse, Composite, Signature, TypeTag};
use std::fmt::Write;

/// Canonical encoding of one tag
///
/// Qualifiers and offsets are never emitted; parsing the result yields the
/// same tag.
pub fn encode(tag: &TypeTag) -> String {
    let mut out = String::new();
    encode_into(tag, &mut out);
    out
}

/// Canonical encoding of a whole signature
pub fn encode_signature(signature: &Signature) -> String {
    let mut out = String::new();
    for tag in signature.tags() {
        encode_into(tag, &mut out);
    }
    out
}

fn encode_into(tag: &TypeTag, out: &mut String) {
    match tag {
        TypeTag::Pointer(pointee) => {
            out.push('^');
            encode_into(pointee, out);
        }
        TypeTag::Struct(c) => encode_composite(c, '{', '}', out),
        TypeTag::Union(c) => encode_composite(c, '(', ')', out),
        TypeTag::Array { len, element } => {
            let _ = write!(out, "[{}", len);
            encode_into(element, out);
            out.push(']');
        }
        TypeTag::Bitfield(width) => {
            let _ = write!(out, "b{}", width);
        }
        other => out.push(other.code()),
    }
}

fn encode_composite(c: &Composite, open: char, close: char, out: &mut String) {
    out.push(open);
    out.push_str(c.name.as_deref().unwrap_or("?"));
    out.push('=');
    for field in &c.fields {
        if let Some(name) = &field.name {
            let _ = write!(out, "\"{}\"", name);
        }
        encode_into(&field.tag, out);
    }
    out.push(close);
}

/// Collapse an encoding to the tags scalar marshalling needs
///
/// Qualifiers, offsets, type names, member names and pointees are dropped;
/// struct and union members are flattened in place; array counts are kept.
///
/// ```
/// use tallow_core::encoding::simplify;
///
/// assert_eq!(simplify("r^{CGRect={CGPoint=dd}{CGSize=dd}}16@0:8"), "^@:");
/// assert_eq!(simplify("v24@0:8{CGPoint=dd}16"), "v@:dd");
/// ```
pub fn simplify(encoding: &str) -> String {
    let mut out = String::new();
    for tag in parse(encoding).tags() {
        simplify_into(tag, &mut out);
    }
    out
}

fn simplify_into(tag: &TypeTag, out: &mut String) {
    match tag {
        TypeTag::Pointer(_) => out.push('^'),
        TypeTag::Struct(c) | TypeTag::Union(c) => {
            for field in &c.fields {
                simplify_into(&field.tag, out);
            }
        }
        TypeTag::Array { len, element } => {
            let _ = write!(out, "[{}", len);
            simplify_into(element, out);
            out.push(']');
        }
        TypeTag::Bitfield(width) => {
            let _ = write!(out, "b{}", width);
        }
        other => out.push(other.code()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::parse_type;

    #[test]
    fn test_round_trip_well_formed() {
        let inputs = [
            "v24@0:8i16",
            "{CGRect={CGPoint=dd}{CGSize=dd}}16@0:8",
            "r^{__CFString}@?",
            "(Value=id)[4{?=ii}]b5",
            "^^v@\"NSString\"#:*B",
            "{Pair=\"first\"i\"second\"d}",
            "^?",
        ];
        for input in inputs {
            let once = parse(input);
            let again = parse(&encode_signature(&once));
            assert_eq!(once, again, "round trip of {:?}", input);
        }
    }

    #[test]
    fn test_encode_is_canonical() {
        assert_eq!(encode(&parse_type("r^{P}")), "^{P=}");
        assert_eq!(encode(&parse_type("{?=ii}")), "{?=ii}");
        assert_eq!(encode(&parse_type("@\"NSString\"")), "@");
    }

    #[test]
    fn test_simplify() {
        assert_eq!(simplify("Vv40@0:8r*16"), "v@:*");
        assert_eq!(simplify("[2(U=cd)]"), "[2cd]");
        assert_eq!(simplify("^^{Deep={Inner=ii}}"), "^");
        assert_eq!(simplify("{Bits=b1b7}"), "b1b7");
    }
}
