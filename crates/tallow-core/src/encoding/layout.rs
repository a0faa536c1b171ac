//! Native storage layout of type tags

use super::{Field, Signature, TypeTag};

/// Width of native pointers in the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerWidth {
    /// 4-byte pointers
    Bits32,
    /// 8-byte pointers
    Bits64,
}

impl PointerWidth {
    /// Pointer width of the current process
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            PointerWidth::Bits64
        } else {
            PointerWidth::Bits32
        }
    }

    /// Pointer size in bytes
    pub const fn bytes(self) -> usize {
        match self {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }
}

impl Default for PointerWidth {
    fn default() -> Self {
        Self::native()
    }
}

/// Size and alignment rules for one target
///
/// Scalars align naturally, capped at 8 bytes on 64-bit targets and 4 bytes
/// on 32-bit ones. Structs pad each member to its alignment and round their
/// size up to the largest member alignment. Bitfields occupy whole bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Layout {
    width: PointerWidth,
}

impl Layout {
    /// Layout for the given pointer width
    pub const fn new(width: PointerWidth) -> Self {
        Self { width }
    }

    /// Layout of the current process
    pub const fn native() -> Self {
        Self::new(PointerWidth::native())
    }

    /// Pointer width this layout uses
    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    /// Pointer size in bytes
    pub fn pointer_size(&self) -> usize {
        self.width.bytes()
    }

    fn max_align(&self) -> usize {
        match self.width {
            PointerWidth::Bits32 => 4,
            PointerWidth::Bits64 => 8,
        }
    }

    /// Native storage size of `tag` in bytes
    ///
    /// Saturates at `usize::MAX` for array counts no buffer could hold.
    pub fn size_of(&self, tag: &TypeTag) -> usize {
        match tag {
            TypeTag::Char | TypeTag::UChar | TypeTag::Bool => 1,
            TypeTag::Short | TypeTag::UShort => 2,
            TypeTag::Int | TypeTag::UInt | TypeTag::Long | TypeTag::ULong | TypeTag::Float => 4,
            TypeTag::LongLong | TypeTag::ULongLong | TypeTag::Double => 8,
            TypeTag::CString
            | TypeTag::Object
            | TypeTag::Class
            | TypeTag::Selector
            | TypeTag::Pointer(_) => self.pointer_size(),
            TypeTag::Bitfield(width) => (*width as usize).div_ceil(8),
            TypeTag::Array { len, element } => len.saturating_mul(self.size_of(element)),
            TypeTag::Struct(c) => {
                let (end, align) = self.struct_extent(&c.fields);
                round_up(end, align)
            }
            TypeTag::Union(c) => {
                let size = c
                    .fields
                    .iter()
                    .map(|f| self.size_of(&f.tag))
                    .max()
                    .unwrap_or(0);
                round_up(size, self.align_of(tag))
            }
            TypeTag::Void | TypeTag::Unknown => 0,
        }
    }

    /// Native alignment of `tag` in bytes
    pub fn align_of(&self, tag: &TypeTag) -> usize {
        match tag {
            TypeTag::Struct(c) | TypeTag::Union(c) => c
                .fields
                .iter()
                .map(|f| self.align_of(&f.tag))
                .max()
                .unwrap_or(1),
            TypeTag::Array { element, .. } => self.align_of(element),
            TypeTag::Bitfield(_) | TypeTag::Void | TypeTag::Unknown => 1,
            scalar => self.size_of(scalar).clamp(1, self.max_align()),
        }
    }

    /// Byte offset of every member of a struct, in declaration order
    pub fn field_offsets(&self, fields: &[Field]) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(fields.len());
        let mut offset = 0;
        for field in fields {
            offset = round_up(offset, self.align_of(&field.tag));
            offsets.push(offset);
            offset = offset.saturating_add(self.size_of(&field.tag));
        }
        offsets
    }

    /// End of the last member and the struct alignment
    fn struct_extent(&self, fields: &[Field]) -> (usize, usize) {
        let mut offset = 0;
        let mut align = 1;
        for field in fields {
            let a = self.align_of(&field.tag);
            align = align.max(a);
            offset = round_up(offset, a).saturating_add(self.size_of(&field.tag));
        }
        (offset, align)
    }

    /// Total bytes needed to hold every parameter of `signature` in its own
    /// pointer-aligned slot
    pub fn frame_size(&self, signature: &Signature) -> usize {
        signature
            .params()
            .iter()
            .map(|tag| round_up(self.size_of(tag), self.pointer_size()))
            .fold(0, usize::saturating_add)
    }
}

fn round_up(value: usize, align: usize) -> usize {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align).saturating_mul(align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{parse, parse_type};

    const L64: Layout = Layout::new(PointerWidth::Bits64);
    const L32: Layout = Layout::new(PointerWidth::Bits32);

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(L64.size_of(&TypeTag::Char), 1);
        assert_eq!(L64.size_of(&TypeTag::Short), 2);
        assert_eq!(L64.size_of(&TypeTag::Long), 4);
        assert_eq!(L64.size_of(&TypeTag::LongLong), 8);
        assert_eq!(L64.size_of(&TypeTag::Void), 0);
    }

    #[test]
    fn test_pointer_sized_tags_follow_width() {
        for tag in ["@", "#", ":", "*", "^i"] {
            assert_eq!(L64.size_of(&parse_type(tag)), 8, "{}", tag);
            assert_eq!(L32.size_of(&parse_type(tag)), 4, "{}", tag);
        }
    }

    #[test]
    fn test_struct_padding() {
        // char, then int aligned to 4, then double aligned to 8
        let tag = parse_type("{Mixed=cid}");
        let TypeTag::Struct(c) = &tag else {
            panic!("expected struct");
        };
        assert_eq!(L64.field_offsets(&c.fields), vec![0, 4, 8]);
        assert_eq!(L64.size_of(&tag), 16);
        assert_eq!(L64.align_of(&tag), 8);
    }

    #[test]
    fn test_struct_padding_32bit_caps_alignment() {
        let tag = parse_type("{Mixed=cd}");
        let TypeTag::Struct(c) = &tag else {
            panic!("expected struct");
        };
        assert_eq!(L32.field_offsets(&c.fields), vec![0, 4]);
        assert_eq!(L32.size_of(&tag), 12);
        assert_eq!(L64.size_of(&tag), 16);
    }

    #[test]
    fn test_tail_padding() {
        assert_eq!(L64.size_of(&parse_type("{T=dc}")), 16);
        assert_eq!(L64.size_of(&parse_type("{T=sc}")), 4);
    }

    #[test]
    fn test_union_array_bitfield() {
        assert_eq!(L64.size_of(&parse_type("(U=cd)")), 8);
        assert_eq!(L64.size_of(&parse_type("[3s]")), 6);
        assert_eq!(L64.size_of(&parse_type("[2{P=dd}]")), 32);
        assert_eq!(L64.size_of(&TypeTag::Bitfield(9)), 2);
    }

    #[test]
    fn test_huge_arrays_saturate() {
        let tag = parse_type("[4294967296[4294967296[4294967296i]]]");
        assert_eq!(L64.size_of(&tag), usize::MAX);
        let tag = parse_type("{S=c[18446744073709551615d]}");
        assert_eq!(L64.size_of(&tag), usize::MAX);
    }

    #[test]
    fn test_frame_size() {
        let sig = parse("v@:ic{P=dd}").into_method();
        assert_eq!(L64.frame_size(&sig), 8 + 8 + 16);
    }
}
