//! Append-only per-field attribute writer.
//!
//! One writer per field per building segment, single-writer access.
//! `set_convertor` must be called exactly once before the first append.
//!
//! Fixed-length fields write value `i` at `i * element_size`.
//! Variable-length fields append to the data buffer and record the end
//! offset of each value; `offsets[i]..offsets[i + 1]` spans doc `i`.

use std::sync::Arc;

use crate::attribute::convertor::AttributeConvertor;
use crate::attribute::data::AttributeData;
use crate::error::{Result, StoreError};
use crate::schema::AttributeConfig;
use crate::types::{AttributeValue, DocId};

pub struct AttributeWriter {
    config: Arc<AttributeConfig>,
    convertor: Option<AttributeConvertor>,
    data: Vec<u8>,
    /// Variable-length only. Starts as `[0]`, one entry pushed per append.
    offsets: Vec<u64>,
    doc_count: u32,
}

impl AttributeWriter {
    pub fn new(config: Arc<AttributeConfig>) -> Self {
        let offsets = if config.is_fixed_length() {
            Vec::new()
        } else {
            vec![0]
        };
        Self {
            config,
            convertor: None,
            data: Vec::new(),
            offsets,
            doc_count: 0,
        }
    }

    /// Writer with the convertor derived from its own config.
    pub fn with_default_convertor(config: Arc<AttributeConfig>) -> Self {
        let convertor = AttributeConvertor::for_config(&config);
        let mut writer = Self::new(config);
        writer.convertor = Some(convertor);
        writer
    }

    pub fn config(&self) -> &AttributeConfig {
        &self.config
    }

    pub fn set_convertor(&mut self, convertor: AttributeConvertor) -> Result<()> {
        if self.convertor.is_some() {
            return Err(StoreError::ConvertorAlreadySet {
                field: self.config.name.clone(),
            });
        }
        self.convertor = Some(convertor);
        Ok(())
    }

    pub fn has_convertor(&self) -> bool {
        self.convertor.is_some()
    }

    fn convertor(&self) -> Result<&AttributeConvertor> {
        self.convertor.as_ref().ok_or_else(|| StoreError::ConvertorNotSet {
            field: self.config.name.clone(),
        })
    }

    /// Convert and append one document's raw value. Returns its doc id.
    pub fn append(&mut self, raw: &str) -> Result<DocId> {
        let encoded = self.convertor()?.encode(raw);
        self.push(&encoded)
    }

    /// Append the field default (document omitted the field).
    pub fn append_default(&mut self) -> Result<DocId> {
        let encoded = self.convertor()?.default_encoded();
        self.push(&encoded)
    }

    /// Append an already-encoded value (merge re-pack path).
    pub fn append_encoded(&mut self, bytes: &[u8]) -> Result<DocId> {
        self.convertor()?;
        self.push(bytes)
    }

    fn push(&mut self, bytes: &[u8]) -> Result<DocId> {
        if let Some(size) = self.fixed_size() {
            if bytes.len() != size {
                return Err(StoreError::ValueSizeMismatch {
                    field: self.config.name.clone(),
                    expected: size,
                    actual: bytes.len(),
                });
            }
            debug_assert_eq!(self.data.len(), self.doc_count as usize * size);
            self.data.extend_from_slice(bytes);
        } else {
            self.data.extend_from_slice(bytes);
            self.offsets.push(self.data.len() as u64);
        }
        let doc_id = self.doc_count;
        self.doc_count += 1;
        Ok(doc_id)
    }

    fn fixed_size(&self) -> Option<usize> {
        if self.config.is_fixed_length() {
            self.config.field_type.fixed_size()
        } else {
            None
        }
    }

    // -- Read back ------------------------------------------------------------

    pub fn doc_count(&self) -> u32 {
        self.doc_count
    }

    pub fn raw(&self, doc_id: DocId) -> Option<&[u8]> {
        if doc_id >= self.doc_count {
            return None;
        }
        let doc = doc_id as usize;
        match self.fixed_size() {
            Some(size) => self.data.get(doc * size..(doc + 1) * size),
            None => {
                let start = self.offsets[doc] as usize;
                let end = self.offsets[doc + 1] as usize;
                self.data.get(start..end)
            }
        }
    }

    pub fn get(&self, doc_id: DocId) -> Result<Option<AttributeValue>> {
        let convertor = self.convertor()?;
        match self.raw(doc_id) {
            Some(bytes) => convertor.decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn memory_use(&self) -> usize {
        self.data.len() + self.offsets.len() * std::mem::size_of::<u64>()
    }

    /// Freeze into an immutable column.
    pub fn seal(self) -> AttributeData {
        let offsets = if self.config.is_fixed_length() {
            None
        } else {
            Some(self.offsets)
        };
        AttributeData::new(self.config, self.data, offsets, self.doc_count)
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FieldType, MULTI_VALUE_SEPARATOR};
    use proptest::prelude::*;

    fn int_writer() -> AttributeWriter {
        let config = Arc::new(AttributeConfig::new(0, "price", FieldType::Int64));
        let mut w = AttributeWriter::new(config.clone());
        w.set_convertor(AttributeConvertor::for_config(&config)).unwrap();
        w
    }

    #[test]
    fn test_append_before_convertor_is_precondition_error() {
        let config = Arc::new(AttributeConfig::new(0, "price", FieldType::Int64));
        let mut w = AttributeWriter::new(config);
        let err = w.append("1").unwrap_err();
        assert!(matches!(err, StoreError::ConvertorNotSet { .. }));
        assert!(err.is_precondition());
        assert!(w.append_encoded(&[0u8; 8]).is_err());
        assert!(w.append_default().is_err());
        assert_eq!(w.doc_count(), 0);
    }

    #[test]
    fn test_set_convertor_twice_fails() {
        let mut w = int_writer();
        let c = AttributeConvertor::new("price", FieldType::Int64, false);
        assert!(matches!(
            w.set_convertor(c),
            Err(StoreError::ConvertorAlreadySet { .. })
        ));
    }

    #[test]
    fn test_fixed_length_positions() {
        let mut w = int_writer();
        assert_eq!(w.append("10").unwrap(), 0);
        assert_eq!(w.append("-20").unwrap(), 1);
        assert_eq!(w.append_default().unwrap(), 2);
        assert_eq!(w.memory_use(), 24);
        assert_eq!(w.raw(1).unwrap(), &(-20i64).to_le_bytes());
        assert_eq!(w.get(0).unwrap(), Some(AttributeValue::Int(10)));
        assert_eq!(w.get(2).unwrap(), Some(AttributeValue::Int(0)));
        assert_eq!(w.get(3).unwrap(), None);
    }

    #[test]
    fn test_fixed_length_rejects_wrong_width() {
        let mut w = int_writer();
        let err = w.append_encoded(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, StoreError::ValueSizeMismatch { expected: 8, actual: 3, .. }));
    }

    #[test]
    fn test_variable_length_offsets() {
        let config = Arc::new(AttributeConfig::new(1, "title", FieldType::String));
        let mut w = AttributeWriter::with_default_convertor(config);
        w.append("ab").unwrap();
        w.append("").unwrap();
        w.append("cde").unwrap();
        assert_eq!(w.raw(0).unwrap(), b"ab");
        assert_eq!(w.raw(1).unwrap(), b"");
        assert_eq!(w.raw(2).unwrap(), b"cde");

        let sealed = w.seal();
        assert_eq!(sealed.doc_count(), 3);
        assert_eq!(sealed.raw(2).unwrap(), b"cde");
    }

    #[test]
    fn test_multi_value_append() {
        let config = Arc::new(AttributeConfig::new(2, "ids", FieldType::UInt32).multi());
        let mut w = AttributeWriter::with_default_convertor(config);
        let raw = format!("1{}2{}3", MULTI_VALUE_SEPARATOR, MULTI_VALUE_SEPARATOR);
        w.append(&raw).unwrap();
        w.append("").unwrap();
        assert_eq!(w.get(0).unwrap(), Some(AttributeValue::MultiUInt(vec![1, 2, 3])));
        assert_eq!(w.get(1).unwrap(), Some(AttributeValue::MultiUInt(vec![])));
    }

    proptest! {
        #[test]
        fn prop_append_then_read_back_in_order(values in proptest::collection::vec(any::<i64>(), 0..200)) {
            let mut w = int_writer();
            for v in &values {
                w.append(&v.to_string()).unwrap();
            }
            prop_assert_eq!(w.doc_count() as usize, values.len());
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(w.get(i as DocId).unwrap(), Some(AttributeValue::Int(*v)));
            }
        }

        #[test]
        fn prop_string_read_back(values in proptest::collection::vec("[a-z ]{0,12}", 0..50)) {
            let config = Arc::new(AttributeConfig::new(1, "s", FieldType::String));
            let mut w = AttributeWriter::with_default_convertor(config);
            for v in &values {
                w.append(v).unwrap();
            }
            let sealed = w.seal();
            for (i, v) in values.iter().enumerate() {
                prop_assert_eq!(sealed.raw(i as DocId).unwrap(), v.as_bytes());
            }
        }
    }
}
