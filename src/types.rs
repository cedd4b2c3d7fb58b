//! Core identifiers and value types shared by every module.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Segment-local document id (0-based, dense).
pub type DocId = u32;

/// Partition-unique segment id.
pub type SegmentId = u32;

/// Schema attribute id.
pub type FieldId = u32;

/// Schema index id.
pub type IndexId = u32;

/// Separator between items of a multi-value raw field.
pub const MULTI_VALUE_SEPARATOR: char = '\x1D';

// ── Field Type ─────────────────────────────────────────────────────

/// Scalar type of an attribute or a computed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
    String,
}

impl FieldType {
    /// Encoded width of one element, `None` for strings.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            FieldType::Int8 | FieldType::UInt8 => Some(1),
            FieldType::Int16 | FieldType::UInt16 => Some(2),
            FieldType::Int32 | FieldType::UInt32 | FieldType::Float => Some(4),
            FieldType::Int64 | FieldType::UInt64 | FieldType::Double => Some(8),
            FieldType::String => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, FieldType::String)
    }

    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64
        )
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, FieldType::Float | FieldType::Double)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int8 => "int8",
            FieldType::UInt8 => "uint8",
            FieldType::Int16 => "int16",
            FieldType::UInt16 => "uint16",
            FieldType::Int32 => "int32",
            FieldType::UInt32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Float => "float",
            FieldType::Double => "double",
            FieldType::String => "string",
        };
        f.write_str(name)
    }
}

// ── Attribute Value ────────────────────────────────────────────────

/// Decoded attribute value.
///
/// Signed types decode to `Int`, unsigned to `UInt`, float/double to `Float`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    MultiInt(Vec<i64>),
    MultiUInt(Vec<u64>),
    MultiFloat(Vec<f64>),
    MultiString(Vec<String>),
}

impl AttributeValue {
    /// Numeric view used by TTL checks. `None` for strings and multi-values.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::UInt(v) => i64::try_from(*v).ok(),
            AttributeValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }
}
