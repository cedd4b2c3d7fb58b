//! Table schema: attribute and index descriptors.
//!
//! Schemas arrive already deserialized; `validate()` is the only check the
//! engine performs before handing configs to writers and readers.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::types::{FieldId, FieldType, IndexId};

/// Static per-field attribute descriptor. Shared read-only by all writers
/// and readers of the field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeConfig {
    pub field_id: FieldId,
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub multi_value: bool,
    /// Raw value used when a document omits the field or it fails to parse.
    #[serde(default)]
    pub default_value: Option<String>,
}

impl AttributeConfig {
    pub fn new(field_id: FieldId, name: &str, field_type: FieldType) -> Self {
        Self {
            field_id,
            name: name.to_string(),
            field_type,
            multi_value: false,
            default_value: None,
        }
    }

    pub fn multi(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn with_default(mut self, value: &str) -> Self {
        self.default_value = Some(value.to_string());
        self
    }

    /// Single-valued numeric fields are stored at `doc_id * size`.
    pub fn is_fixed_length(&self) -> bool {
        !self.multi_value && self.field_type.fixed_size().is_some()
    }
}

/// Inverted index over the whitespace-separated tokens of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub index_id: IndexId,
    pub name: String,
    pub field: String,
}

impl IndexConfig {
    pub fn new(index_id: IndexId, name: &str, field: &str) -> Self {
        Self {
            index_id,
            name: name.to_string(),
            field: field.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub table_name: String,
    /// Raw field holding the primary key.
    pub primary_key: String,
    /// Attribute holding the document timestamp (microseconds), if any.
    #[serde(default)]
    pub timestamp_field: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
}

impl Schema {
    pub fn new(table_name: &str, primary_key: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            primary_key: primary_key.to_string(),
            timestamp_field: None,
            attributes: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, config: AttributeConfig) -> Self {
        self.attributes.push(config);
        self
    }

    pub fn with_index(mut self, config: IndexConfig) -> Self {
        self.indexes.push(config);
        self
    }

    pub fn with_timestamp_field(mut self, field: &str) -> Self {
        self.timestamp_field = Some(field.to_string());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeConfig> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_by_id(&self, field_id: FieldId) -> Option<&AttributeConfig> {
        self.attributes.iter().find(|a| a.field_id == field_id)
    }

    pub fn index(&self, name: &str) -> Option<&IndexConfig> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.primary_key.is_empty() {
            return Err(StoreError::Config("primary_key must not be empty".into()));
        }

        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for attr in &self.attributes {
            if !names.insert(attr.name.as_str()) {
                return Err(StoreError::Config(format!(
                    "duplicate attribute name '{}'",
                    attr.name
                )));
            }
            if !ids.insert(attr.field_id) {
                return Err(StoreError::Config(format!(
                    "duplicate attribute field_id {}",
                    attr.field_id
                )));
            }
        }

        let mut index_names = HashSet::new();
        let mut index_ids = HashSet::new();
        for index in &self.indexes {
            if !index_names.insert(index.name.as_str()) || !index_ids.insert(index.index_id) {
                return Err(StoreError::Config(format!(
                    "duplicate index '{}' (id {})",
                    index.name, index.index_id
                )));
            }
        }

        if let Some(ts) = &self.timestamp_field {
            match self.attribute(ts) {
                Some(attr) if attr.field_type.is_numeric() && !attr.multi_value => {}
                Some(_) => {
                    return Err(StoreError::Config(format!(
                        "timestamp field '{}' must be a single-value numeric attribute",
                        ts
                    )))
                }
                None => return Err(StoreError::UnknownField(ts.clone())),
            }
        }
        Ok(())
    }
}
