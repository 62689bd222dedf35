/// A canonical C type, reduced to the surface the ABI classifier needs.
///
/// `ia2-rewriter` produces this from a parsed `lang_c` declaration; it is
/// deliberately much smaller than a full Clang `QualType` because the
/// classifier only needs size, alignment, and field layout.
#[derive(Debug, Clone, PartialEq)]
pub enum CType {
    Void,
    /// Pointers, `_Bool`, integral types, and `_Fixed` types all classify
    /// as `Integer`.
    Integer { size: usize },
    /// Real floating types (`float`, `double`, `long double`).
    Float { size: usize },
    /// A struct or union. Unions are modeled by giving every field offset
    /// `0`; a struct's fields carry their natural layout offsets.
    Aggregate(CAggregate),
    /// `_Complex` scalars. The classifier refuses these.
    Complex,
    /// ObjC object/block pointers or C++ member pointers. The classifier
    /// refuses these.
    ObjectPointerLike,
}

impl CType {
    pub fn size(&self) -> usize {
        match self {
            CType::Void => 0,
            CType::Integer { size } | CType::Float { size } => *size,
            CType::Aggregate(agg) => agg.size,
            CType::Complex | CType::ObjectPointerLike => 0,
        }
    }

    pub fn eightbytes(&self) -> usize {
        self.size().div_ceil(8)
    }
}

/// A single field of a struct/union, with its byte offset within the
/// aggregate.
#[derive(Debug, Clone, PartialEq)]
pub struct CField {
    pub offset: usize,
    pub ty: CType,
}

/// A struct or union type: total size/alignment plus its fields in layout
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct CAggregate {
    pub size: usize,
    pub align: usize,
    pub fields: Vec<CField>,
    pub is_union: bool,
}

impl CAggregate {
    /// A homogeneous floating aggregate candidate: every field (only one
    /// level deep — nested HFAs are not produced by the rewriter's
    /// field-flattening) is a real-floating type of the same width, and
    /// there are at most 4 of them.
    pub fn homogeneous_float_members(&self) -> Option<(usize, usize)> {
        if self.is_union || self.fields.is_empty() || self.fields.len() > 4 {
            return None;
        }
        let width = match &self.fields[0].ty {
            CType::Float { size } => *size,
            _ => return None,
        };
        for f in &self.fields {
            match &f.ty {
                CType::Float { size } if *size == width => {}
                _ => return None,
            }
        }
        Some((self.fields.len(), width))
    }
}
