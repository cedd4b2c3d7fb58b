//! Typed slots in a per-document scratch buffer.
//!
//! Truncation materializes the sort keys of each candidate document into a
//! small fixed-size buffer (`DocInfo`). A `Reference` is a plain
//! `(offset, type)` descriptor into that buffer; the allocator hands them
//! out once per sort key and sizes every buffer to fit them all.

use std::cmp::Ordering;

use crate::attribute::convertor::decode_numeric;
use crate::error::{Result, StoreError};
use crate::types::{AttributeValue, DocId, FieldType};

/// Offset + type of one value inside a [`DocInfo`] buffer. Holds no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    offset: usize,
    field_type: FieldType,
}

impl Reference {
    pub fn new(offset: usize, field_type: FieldType) -> Self {
        Self { offset, field_type }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn size(&self) -> usize {
        self.field_type.fixed_size().unwrap_or(0)
    }

    fn slot<'a>(&self, info: &'a DocInfo) -> &'a [u8] {
        &info.buf[self.offset..self.offset + self.size()]
    }

    /// Decoded value stored in `info`.
    pub fn get(&self, info: &DocInfo) -> AttributeValue {
        decode_numeric(self.field_type, self.slot(info))
    }

    /// Write encoded bytes into `info`. Width must match the type.
    pub fn set(&self, info: &mut DocInfo, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.size() {
            return Err(StoreError::ValueSizeMismatch {
                field: format!("reference@{}", self.offset),
                expected: self.size(),
                actual: bytes.len(),
            });
        }
        let end = self.offset + bytes.len();
        info.buf[self.offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Three-way compare of the values held by `a` and `b`.
    pub fn cmp_values(&self, a: &DocInfo, b: &DocInfo) -> Ordering {
        match (self.get(a), self.get(b)) {
            (AttributeValue::Int(x), AttributeValue::Int(y)) => x.cmp(&y),
            (AttributeValue::UInt(x), AttributeValue::UInt(y)) => x.cmp(&y),
            (AttributeValue::Float(x), AttributeValue::Float(y)) => x.total_cmp(&y),
            _ => Ordering::Equal,
        }
    }
}

/// Scratch row for one document.
#[derive(Debug, Clone)]
pub struct DocInfo {
    doc_id: DocId,
    buf: Vec<u8>,
}

impl DocInfo {
    pub fn doc_id(&self) -> DocId {
        self.doc_id
    }
}

/// Hands out references and allocates rows large enough to hold them.
#[derive(Debug, Default)]
pub struct DocInfoAllocator {
    references: Vec<(String, Reference)>,
    row_size: usize,
}

impl DocInfoAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for `name`. Declaring the same name twice returns the
    /// existing reference.
    pub fn declare(&mut self, name: &str, field_type: FieldType) -> Result<Reference> {
        if let Some(existing) = self.get(name) {
            return Ok(existing);
        }
        let size = field_type.fixed_size().ok_or_else(|| {
            StoreError::Config(format!("reference '{}' must be numeric, got {}", name, field_type))
        })?;
        let reference = Reference::new(self.row_size, field_type);
        self.row_size += size;
        self.references.push((name.to_string(), reference));
        Ok(reference)
    }

    pub fn get(&self, name: &str) -> Option<Reference> {
        self.references
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| *r)
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    /// Zeroed row for `doc_id`.
    pub fn allocate(&self, doc_id: DocId) -> DocInfo {
        DocInfo {
            doc_id,
            buf: vec![0; self.row_size],
        }
    }
}
