//! Native value representation and PostgreSQL type OIDs.
//!
//! `PgValue` is the tagged union handed to callers: every result column is
//! decoded into one of these variants, and bind parameters are encoded from
//! them. Binary wire rules live in the codec registry (`codec` module).

use std::fmt;

use serde_json::Value as JsonValue;
use uuid::Uuid;

// ============================================================================
// Type OIDs
// ============================================================================

/// PostgreSQL type object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Oid(pub i32);

impl Oid {
    /// Placeholder for "let the server infer" in Parse parameter lists.
    pub const UNSPECIFIED: Oid = Oid(0);

    pub const BOOL: Oid = Oid(16);
    pub const CHAR: Oid = Oid(18);
    pub const NAME: Oid = Oid(19);
    pub const INT8: Oid = Oid(20);
    pub const INT2: Oid = Oid(21);
    pub const INT4: Oid = Oid(23);
    pub const TEXT: Oid = Oid(25);
    pub const JSON: Oid = Oid(114);
    pub const BPCHAR: Oid = Oid(1042);
    pub const VARCHAR: Oid = Oid(1043);
    pub const UUID: Oid = Oid(2950);
    pub const JSONB: Oid = Oid(3802);

    // Array types, paired with the element types above
    pub const BOOL_ARRAY: Oid = Oid(1000);
    pub const CHAR_ARRAY: Oid = Oid(1002);
    pub const INT2_ARRAY: Oid = Oid(1005);
    pub const INT4_ARRAY: Oid = Oid(1007);
    pub const TEXT_ARRAY: Oid = Oid(1009);
    pub const BPCHAR_ARRAY: Oid = Oid(1014);
    pub const VARCHAR_ARRAY: Oid = Oid(1015);
    pub const INT8_ARRAY: Oid = Oid(1016);
    pub const JSON_ARRAY: Oid = Oid(199);
    pub const UUID_ARRAY: Oid = Oid(2951);
    pub const JSONB_ARRAY: Oid = Oid(3807);

    #[inline]
    pub fn from_i32(oid: i32) -> Self {
        Oid(oid)
    }

    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Native values
// ============================================================================

/// A decoded PostgreSQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Null,
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Text(String),
    Uuid(Uuid),
    /// A decoded JSON document tree (from `json` or `jsonb`). Object key
    /// order is preserved as received; a top-level JSON `null` decodes to
    /// `PgValue::Null` instead.
    Json(JsonValue),
    Array(PgArray),
}

impl PgValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, PgValue::Null)
    }

    /// The OID used when this value is sent as a bind parameter.
    ///
    /// NULL has no inherent type; the server infers it from context.
    pub fn type_oid(&self) -> Oid {
        match self {
            PgValue::Null => Oid::UNSPECIFIED,
            PgValue::Bool(_) => Oid::BOOL,
            PgValue::Int2(_) => Oid::INT2,
            PgValue::Int4(_) => Oid::INT4,
            PgValue::Int8(_) => Oid::INT8,
            PgValue::Text(_) => Oid::TEXT,
            PgValue::Uuid(_) => Oid::UUID,
            PgValue::Json(_) => Oid::JSONB,
            PgValue::Array(a) => a.array_oid(),
        }
    }
}

/// One dimension of a PostgreSQL array: element count and lower bound
/// (PostgreSQL arrays are 1-based by default but any bound is legal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayDim {
    pub len: i32,
    pub lower_bound: i32,
}

/// A decoded PostgreSQL array, preserving declared dimensionality and
/// per-slot NULLs. Elements are stored flat in row-major order, exactly as
/// they appear on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct PgArray {
    pub element_oid: Oid,
    pub dims: Vec<ArrayDim>,
    pub elements: Vec<PgValue>,
}

impl PgArray {
    /// Build a one-dimensional array with the conventional lower bound of 1.
    pub fn from_vec(element_oid: Oid, elements: Vec<PgValue>) -> Self {
        let dims = if elements.is_empty() {
            Vec::new()
        } else {
            vec![ArrayDim {
                len: elements.len() as i32,
                lower_bound: 1,
            }]
        };
        Self {
            element_oid,
            dims,
            elements,
        }
    }

    /// The array-type OID corresponding to the element type.
    pub fn array_oid(&self) -> Oid {
        match self.element_oid {
            Oid::BOOL => Oid::BOOL_ARRAY,
            Oid::CHAR => Oid::CHAR_ARRAY,
            Oid::INT2 => Oid::INT2_ARRAY,
            Oid::INT4 => Oid::INT4_ARRAY,
            Oid::INT8 => Oid::INT8_ARRAY,
            Oid::TEXT => Oid::TEXT_ARRAY,
            Oid::BPCHAR => Oid::BPCHAR_ARRAY,
            Oid::VARCHAR => Oid::VARCHAR_ARRAY,
            Oid::UUID => Oid::UUID_ARRAY,
            Oid::JSON => Oid::JSON_ARRAY,
            Oid::JSONB => Oid::JSONB_ARRAY,
            _ => Oid::UNSPECIFIED,
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
