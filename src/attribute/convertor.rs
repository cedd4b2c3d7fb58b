//! Raw-string to columnar-bytes conversion for attribute fields.
//!
//! ## Encoding
//!
//! ```text
//! single numeric   [value: fixed_size bytes LE]
//! single string    [utf8 bytes]
//! multi numeric    [count: u32 LE][value: fixed_size bytes LE] x count
//! multi string     [count: u32 LE]([len: u32 LE][utf8 bytes]) x count
//! ```
//!
//! Multi-value raw input is split on [`MULTI_VALUE_SEPARATOR`].

use crate::error::{Result, StoreError};
use crate::schema::AttributeConfig;
use crate::types::{AttributeValue, FieldType, MULTI_VALUE_SEPARATOR};

#[derive(Debug, Clone)]
pub struct AttributeConvertor {
    field: String,
    field_type: FieldType,
    multi_value: bool,
    default_value: Option<String>,
}

impl AttributeConvertor {
    pub fn new(field: &str, field_type: FieldType, multi_value: bool) -> Self {
        Self {
            field: field.to_string(),
            field_type,
            multi_value,
            default_value: None,
        }
    }

    pub fn for_config(config: &AttributeConfig) -> Self {
        Self {
            field: config.name.clone(),
            field_type: config.field_type,
            multi_value: config.multi_value,
            default_value: config.default_value.clone(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }

    /// Encoded width for fixed-length fields.
    pub fn fixed_size(&self) -> Option<usize> {
        if self.multi_value {
            None
        } else {
            self.field_type.fixed_size()
        }
    }

    /// Strict conversion. Fails on any unparsable element.
    pub fn try_encode(&self, raw: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if !self.multi_value {
            if self.field_type == FieldType::String {
                out.extend_from_slice(raw.as_bytes());
            } else {
                self.encode_element(raw.trim(), &mut out)?;
            }
            return Ok(out);
        }

        let items: Vec<&str> = raw
            .split(MULTI_VALUE_SEPARATOR)
            .filter(|s| !s.is_empty())
            .collect();
        out.extend_from_slice(&(items.len() as u32).to_le_bytes());
        for item in items {
            if self.field_type == FieldType::String {
                out.extend_from_slice(&(item.len() as u32).to_le_bytes());
                out.extend_from_slice(item.as_bytes());
            } else {
                self.encode_element(item.trim(), &mut out)?;
            }
        }
        Ok(out)
    }

    /// Lenient conversion: falls back to the configured default, then to
    /// the zero value of the type.
    pub fn encode(&self, raw: &str) -> Vec<u8> {
        match self.try_encode(raw) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::debug!(
                    field = self.field.as_str(),
                    raw,
                    error = %err,
                    "attribute conversion failed, using default value"
                );
                self.default_encoded()
            }
        }
    }

    /// Encoded form of the field's default value.
    pub fn default_encoded(&self) -> Vec<u8> {
        if let Some(default) = &self.default_value {
            if let Ok(bytes) = self.try_encode(default) {
                return bytes;
            }
        }
        if self.multi_value {
            0u32.to_le_bytes().to_vec()
        } else {
            vec![0u8; self.field_type.fixed_size().unwrap_or(0)]
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<AttributeValue> {
        if !self.multi_value {
            if self.field_type == FieldType::String {
                return String::from_utf8(bytes.to_vec())
                    .map(AttributeValue::String)
                    .map_err(|_| self.corrupt("invalid utf-8"));
            }
            let size = self.field_type.fixed_size().unwrap_or(0);
            if bytes.len() != size {
                return Err(self.corrupt("wrong element width"));
            }
            return Ok(self.decode_element(bytes));
        }

        if bytes.len() < 4 {
            return Err(self.corrupt("missing multi-value count"));
        }
        let count = read_u32(bytes, 0) as usize;
        let mut pos = 4;

        if self.field_type == FieldType::String {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                if pos + 4 > bytes.len() {
                    return Err(self.corrupt("truncated string length"));
                }
                let len = read_u32(bytes, pos) as usize;
                pos += 4;
                if pos + len > bytes.len() {
                    return Err(self.corrupt("truncated string item"));
                }
                let s = std::str::from_utf8(&bytes[pos..pos + len])
                    .map_err(|_| self.corrupt("invalid utf-8"))?;
                values.push(s.to_string());
                pos += len;
            }
            return Ok(AttributeValue::MultiString(values));
        }

        let size = self.field_type.fixed_size().unwrap_or(0);
        if bytes.len() != 4 + count * size {
            return Err(self.corrupt("multi-value length does not match count"));
        }
        let elements = bytes[4..].chunks_exact(size).map(|c| self.decode_element(c));
        let value = if self.field_type.is_floating() {
            AttributeValue::MultiFloat(
                elements
                    .map(|v| match v {
                        AttributeValue::Float(f) => f,
                        _ => 0.0,
                    })
                    .collect(),
            )
        } else if self.field_type.is_signed_integer() {
            AttributeValue::MultiInt(
                elements
                    .map(|v| match v {
                        AttributeValue::Int(i) => i,
                        _ => 0,
                    })
                    .collect(),
            )
        } else {
            AttributeValue::MultiUInt(
                elements
                    .map(|v| match v {
                        AttributeValue::UInt(u) => u,
                        _ => 0,
                    })
                    .collect(),
            )
        };
        Ok(value)
    }

    // -- Element helpers ------------------------------------------------------

    fn encode_element(&self, s: &str, out: &mut Vec<u8>) -> Result<()> {
        let bad = || StoreError::InvalidFormat(format!(
            "cannot convert '{}' to {} for field '{}'",
            s, self.field_type, self.field
        ));
        match self.field_type {
            FieldType::Int8 => out.extend_from_slice(&s.parse::<i8>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::UInt8 => out.extend_from_slice(&s.parse::<u8>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::Int16 => out.extend_from_slice(&s.parse::<i16>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::UInt16 => out.extend_from_slice(&s.parse::<u16>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::Int32 => out.extend_from_slice(&s.parse::<i32>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::UInt32 => out.extend_from_slice(&s.parse::<u32>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::Int64 => out.extend_from_slice(&s.parse::<i64>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::UInt64 => out.extend_from_slice(&s.parse::<u64>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::Float => out.extend_from_slice(&s.parse::<f32>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::Double => out.extend_from_slice(&s.parse::<f64>().map_err(|_| bad())?.to_le_bytes()),
            FieldType::String => out.extend_from_slice(s.as_bytes()),
        }
        Ok(())
    }

    /// Decode one numeric element. `bytes.len()` must equal the fixed size.
    fn decode_element(&self, bytes: &[u8]) -> AttributeValue {
        decode_numeric(self.field_type, bytes)
    }

    fn corrupt(&self, what: &str) -> StoreError {
        StoreError::InvalidFormat(format!("attribute '{}': {}", self.field, what))
    }
}

/// Decode one little-endian numeric element of `field_type`.
pub(crate) fn decode_numeric(field_type: FieldType, bytes: &[u8]) -> AttributeValue {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    match field_type {
        FieldType::Int8 => AttributeValue::Int(buf[0] as i8 as i64),
        FieldType::UInt8 => AttributeValue::UInt(buf[0] as u64),
        FieldType::Int16 => AttributeValue::Int(i16::from_le_bytes([buf[0], buf[1]]) as i64),
        FieldType::UInt16 => AttributeValue::UInt(u16::from_le_bytes([buf[0], buf[1]]) as u64),
        FieldType::Int32 => {
            AttributeValue::Int(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        }
        FieldType::UInt32 => {
            AttributeValue::UInt(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as u64)
        }
        FieldType::Int64 => AttributeValue::Int(i64::from_le_bytes(buf)),
        FieldType::UInt64 => AttributeValue::UInt(u64::from_le_bytes(buf)),
        FieldType::Float => {
            AttributeValue::Float(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64)
        }
        FieldType::Double => AttributeValue::Float(f64::from_le_bytes(buf)),
        FieldType::String => AttributeValue::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

#[inline]
fn read_u32(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

// ── Tests ──────────────────────────────────────────────────────────
