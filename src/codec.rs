//! The binary type-codec registry.
//!
//! A process-wide, immutable table maps a type OID to a tagged codec
//! variant. It is built once on first use and never mutated afterward, so
//! any number of connections may read it concurrently. A lookup miss is a
//! decode failure naming the unsupported OID — never a silent fallback to
//! raw bytes or text.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{PgError, PgResult};
use crate::types::{ArrayDim, Oid, PgArray, PgValue};

/// Hard cap on array elements, so a corrupt dimension header cannot drive
/// an unbounded allocation.
const MAX_ARRAY_ELEMENTS: usize = 1 << 24;

/// A codec for one registered type. Array codecs recurse through the
/// registry for their element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Bool,
    Int2,
    Int4,
    Int8,
    Text,
    Uuid,
    Json,
    Jsonb,
    Array { element: Oid },
}

static CODECS: Lazy<HashMap<Oid, Codec>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(Oid::BOOL, Codec::Bool);
    m.insert(Oid::INT2, Codec::Int2);
    m.insert(Oid::INT4, Codec::Int4);
    m.insert(Oid::INT8, Codec::Int8);
    m.insert(Oid::TEXT, Codec::Text);
    m.insert(Oid::VARCHAR, Codec::Text);
    m.insert(Oid::BPCHAR, Codec::Text);
    m.insert(Oid::CHAR, Codec::Text);
    m.insert(Oid::NAME, Codec::Text);
    m.insert(Oid::UUID, Codec::Uuid);
    m.insert(Oid::JSON, Codec::Json);
    m.insert(Oid::JSONB, Codec::Jsonb);

    m.insert(Oid::BOOL_ARRAY, Codec::Array { element: Oid::BOOL });
    m.insert(Oid::CHAR_ARRAY, Codec::Array { element: Oid::CHAR });
    m.insert(Oid::INT2_ARRAY, Codec::Array { element: Oid::INT2 });
    m.insert(Oid::INT4_ARRAY, Codec::Array { element: Oid::INT4 });
    m.insert(Oid::INT8_ARRAY, Codec::Array { element: Oid::INT8 });
    m.insert(Oid::TEXT_ARRAY, Codec::Array { element: Oid::TEXT });
    m.insert(
        Oid::BPCHAR_ARRAY,
        Codec::Array {
            element: Oid::BPCHAR,
        },
    );
    m.insert(
        Oid::VARCHAR_ARRAY,
        Codec::Array {
            element: Oid::VARCHAR,
        },
    );
    m.insert(Oid::UUID_ARRAY, Codec::Array { element: Oid::UUID });
    m.insert(Oid::JSON_ARRAY, Codec::Array { element: Oid::JSON });
    m.insert(
        Oid::JSONB_ARRAY,
        Codec::Array {
            element: Oid::JSONB,
        },
    );
    m
});

/// Look up the codec for a type OID.
pub fn lookup(oid: Oid) -> Option<Codec> {
    CODECS.get(&oid).copied()
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a non-NULL binary payload of the given type into a native value.
///
/// NULL columns never reach this function; the DataRow NULL marker is
/// handled by the row assembler.
pub fn decode(oid: Oid, data: &[u8]) -> PgResult<PgValue> {
    let codec =
        lookup(oid).ok_or_else(|| PgError::decode(oid, "no codec registered for this type"))?;

    match codec {
        Codec::Bool => match data {
            [0] => Ok(PgValue::Bool(false)),
            [1] => Ok(PgValue::Bool(true)),
            [b] => Err(PgError::decode(oid, format!("invalid bool byte {}", b))),
            _ => Err(PgError::decode(
                oid,
                format!("invalid bool length {}", data.len()),
            )),
        },

        Codec::Int2 => {
            let raw: [u8; 2] = data
                .try_into()
                .map_err(|_| PgError::decode(oid, format!("invalid int2 length {}", data.len())))?;
            Ok(PgValue::Int2(i16::from_be_bytes(raw)))
        }

        Codec::Int4 => {
            let raw: [u8; 4] = data
                .try_into()
                .map_err(|_| PgError::decode(oid, format!("invalid int4 length {}", data.len())))?;
            Ok(PgValue::Int4(i32::from_be_bytes(raw)))
        }

        Codec::Int8 => {
            let raw: [u8; 8] = data
                .try_into()
                .map_err(|_| PgError::decode(oid, format!("invalid int8 length {}", data.len())))?;
            Ok(PgValue::Int8(i64::from_be_bytes(raw)))
        }

        // The payload is used as-is; fixed-width char padding is preserved
        // exactly as it appears on the wire.
        Codec::Text => match std::str::from_utf8(data) {
            Ok(s) => Ok(PgValue::Text(s.to_owned())),
            Err(e) => Err(PgError::decode(oid, format!("invalid UTF-8: {}", e))),
        },

        Codec::Uuid => Uuid::from_slice(data)
            .map(PgValue::Uuid)
            .map_err(|_| PgError::decode(oid, format!("invalid uuid length {}", data.len()))),

        Codec::Json => decode_json(oid, data),

        Codec::Jsonb => {
            // jsonb carries a one-byte version marker; only version 1 exists.
            match data.split_first() {
                Some((1, rest)) => decode_json(oid, rest),
                Some((v, _)) => Err(PgError::decode(oid, format!("unknown jsonb version {}", v))),
                None => Err(PgError::decode(oid, "empty jsonb payload")),
            }
        }

        Codec::Array { .. } => decode_array(oid, data),
    }
}

fn decode_json(oid: Oid, data: &[u8]) -> PgResult<PgValue> {
    let value: JsonValue =
        serde_json::from_slice(data).map_err(|e| PgError::decode(oid, format!("{}", e)))?;
    // A JSON `null` document maps to the native null.
    if value.is_null() {
        Ok(PgValue::Null)
    } else {
        Ok(PgValue::Json(value))
    }
}

/// Array wire layout: ndims, flags, element OID, then (len, lower bound)
/// per dimension, then a flat sequence of length-prefixed element payloads
/// with -1 marking a NULL slot.
fn decode_array(oid: Oid, data: &[u8]) -> PgResult<PgValue> {
    let mut buf = Reader::new(oid, data);

    let ndims = buf.i32()?;
    let _flags = buf.i32()?;
    let element_oid = Oid::from_i32(buf.i32()?);

    if !(0..=6).contains(&ndims) {
        return Err(PgError::decode(
            oid,
            format!("invalid array dimension count {}", ndims),
        ));
    }

    // The payload names its own element type; it is authoritative over the
    // registered pairing, but must itself be registered.
    if lookup(element_oid).is_none() {
        return Err(PgError::decode(
            element_oid,
            "no codec registered for array element type",
        ));
    }

    let mut dims = Vec::with_capacity(ndims as usize);
    let mut total: usize = if ndims == 0 { 0 } else { 1 };
    for _ in 0..ndims {
        let len = buf.i32()?;
        let lower_bound = buf.i32()?;
        if len < 0 {
            return Err(PgError::decode(oid, format!("negative dimension {}", len)));
        }
        total = total
            .checked_mul(len as usize)
            .filter(|&t| t <= MAX_ARRAY_ELEMENTS)
            .ok_or_else(|| PgError::decode(oid, "array element count exceeds sane maximum"))?;
        dims.push(ArrayDim { len, lower_bound });
    }

    // Each element carries at least a 4-byte length prefix, so a dimension
    // header cannot demand more slots than the payload could hold.
    if total > buf.remaining() / 4 {
        return Err(PgError::decode(
            oid,
            "array element count exceeds payload size",
        ));
    }

    let mut elements = Vec::with_capacity(total);
    for _ in 0..total {
        let len = buf.i32()?;
        if len < 0 {
            // NULL slot, not a decode failure.
            elements.push(PgValue::Null);
        } else {
            let payload = buf.take(len as usize)?;
            elements.push(decode(element_oid, payload)?);
        }
    }

    Ok(PgValue::Array(PgArray {
        element_oid,
        dims,
        elements,
    }))
}

/// Bounds-checked cursor over a binary payload. Truncation is reported as
/// a decode failure rather than a panic.
struct Reader<'a> {
    oid: Oid,
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(oid: Oid, data: &'a [u8]) -> Self {
        Self { oid, data }
    }

    fn i32(&mut self) -> PgResult<i32> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn remaining(&self) -> usize {
        self.data.len()
    }

    fn take(&mut self, n: usize) -> PgResult<&'a [u8]> {
        if self.data.len() < n {
            return Err(PgError::decode(self.oid, "truncated binary payload"));
        }
        let (head, rest) = self.data.split_at(n);
        self.data = rest;
        Ok(head)
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a non-NULL native value into its binary wire payload, used when
/// binding query parameters. Mirrors `decode` for every registered type.
pub fn encode(value: &PgValue) -> PgResult<Vec<u8>> {
    match value {
        // The Bind encoder writes the NULL marker (-1) itself.
        PgValue::Null => Err(PgError::Protocol(
            "NULL has no binary payload; use the Bind NULL marker".to_string(),
        )),
        PgValue::Bool(v) => Ok(vec![u8::from(*v)]),
        PgValue::Int2(v) => Ok(v.to_be_bytes().to_vec()),
        PgValue::Int4(v) => Ok(v.to_be_bytes().to_vec()),
        PgValue::Int8(v) => Ok(v.to_be_bytes().to_vec()),
        PgValue::Text(v) => Ok(v.as_bytes().to_vec()),
        PgValue::Uuid(v) => Ok(v.as_bytes().to_vec()),
        PgValue::Json(v) => {
            // Values bind as jsonb (see PgValue::type_oid): version byte,
            // then the document text.
            let mut out = vec![1u8];
            out.extend_from_slice(v.to_string().as_bytes());
            Ok(out)
        }
        PgValue::Array(a) => encode_array(a),
    }
}

fn encode_array(array: &PgArray) -> PgResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(&(array.dims.len() as i32).to_be_bytes());
    let has_nulls = array.elements.iter().any(PgValue::is_null);
    out.extend_from_slice(&i32::from(has_nulls).to_be_bytes());
    out.extend_from_slice(&array.element_oid.as_i32().to_be_bytes());

    for dim in &array.dims {
        out.extend_from_slice(&dim.len.to_be_bytes());
        out.extend_from_slice(&dim.lower_bound.to_be_bytes());
    }

    for element in &array.elements {
        if element.is_null() {
            out.extend_from_slice(&(-1i32).to_be_bytes());
        } else {
            let payload = encode(element)?;
            out.extend_from_slice(&(payload.len() as i32).to_be_bytes());
            out.extend_from_slice(&payload);
        }
    }

    Ok(out)
}
