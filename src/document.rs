//! Incoming documents and the rewrite hook applied before an add.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::locator::Locator;
use crate::schema::Schema;

/// Operation tag carried by every document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocOperation {
    Add,
    Delete,
    Update,
    /// Carries nothing to apply.
    Skip,
    /// Advances the locator only.
    Checkpoint,
}

impl DocOperation {
    pub const ALL: [DocOperation; 5] = [
        DocOperation::Add,
        DocOperation::Delete,
        DocOperation::Update,
        DocOperation::Skip,
        DocOperation::Checkpoint,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub operation: DocOperation,
    #[serde(default)]
    pub primary_key: String,
    /// Raw field values, keyed by field name.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub locator: Locator,
    /// Source timestamp in microseconds.
    #[serde(default)]
    pub timestamp_us: i64,
}

impl Document {
    pub fn new(operation: DocOperation, primary_key: &str) -> Self {
        Self {
            operation,
            primary_key: primary_key.to_string(),
            fields: BTreeMap::new(),
            locator: Locator::invalid(),
            timestamp_us: 0,
        }
    }

    pub fn add(primary_key: &str) -> Self {
        Self::new(DocOperation::Add, primary_key)
    }

    pub fn delete(primary_key: &str) -> Self {
        Self::new(DocOperation::Delete, primary_key)
    }

    pub fn checkpoint(locator: Locator) -> Self {
        Self::new(DocOperation::Checkpoint, "").with_locator(locator)
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_locator(mut self, locator: Locator) -> Self {
        self.locator = locator;
        self
    }

    pub fn with_timestamp(mut self, timestamp_us: i64) -> Self {
        self.timestamp_us = timestamp_us;
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Fill an empty `primary_key` from the raw field `pk_field`. Errors
    /// when neither is set.
    pub fn resolve_primary_key(&mut self, pk_field: &str) -> Result<()> {
        if self.primary_key.is_empty() {
            if let Some(value) = self.fields.get(pk_field) {
                self.primary_key = value.clone();
            }
        }
        if self.primary_key.is_empty() {
            return Err(StoreError::MissingPrimaryKey(pk_field.to_string()));
        }
        Ok(())
    }

    pub fn pk_hash(&self) -> u128 {
        pk_hash(&self.primary_key)
    }
}

/// 128-bit primary-key hash (first 16 bytes of BLAKE3, little-endian).
pub fn pk_hash(primary_key: &str) -> u128 {
    let hash = blake3::hash(primary_key.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[0..16]);
    u128::from_le_bytes(bytes)
}

// ── Rewriters ──────────────────────────────────────────────────────

/// Enrichment applied to documents that need a rewrite before being
/// applied (see `partition::need_rewrite_document`).
pub trait DocumentRewriter: Send + Sync {
    fn rewrite(&self, doc: &mut Document) -> Result<()>;
}

/// Backfills the schema timestamp field from `Document::timestamp_us`
/// when the document does not carry it.
pub struct TimestampRewriter {
    field: String,
}

impl TimestampRewriter {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
        }
    }

    pub fn for_schema(schema: &Schema) -> Option<Self> {
        schema.timestamp_field.as_deref().map(Self::new)
    }
}

impl DocumentRewriter for TimestampRewriter {
    fn rewrite(&self, doc: &mut Document) -> Result<()> {
        if !doc.fields.contains_key(&self.field) {
            let ts = doc.timestamp_us.to_string();
            doc.fields.insert(self.field.clone(), ts);
        }
        Ok(())
    }
}
