//! Engine configuration.
//!
//! Loaded once from JSON, validated, then handed to writers and the merge
//! path as typed values. Nothing below re-parses it.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::merge::reclaimer::ReclaimParam;
use crate::merge::truncate::TruncateProfile;
use crate::schema::Schema;

/// Thresholds guarding the active key-value trie. `0` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvOnlineConfig {
    #[serde(default)]
    pub count_limits: u64,
    #[serde(default)]
    pub build_protection_threshold: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Auto-dump the building segment once it holds this many docs.
    /// `0` disables the limit.
    #[serde(default = "default_max_docs_per_segment")]
    pub max_docs_per_segment: u32,
}

fn default_max_docs_per_segment() -> u32 {
    100_000
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_docs_per_segment: default_max_docs_per_segment(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Selects the merge policy. See `merge::policy::create_merge_policy`.
    #[serde(default)]
    pub table_type: String,
    /// Table-specific policy parameters.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub reclaim: Vec<ReclaimParam>,
    #[serde(default)]
    pub truncate: Vec<TruncateProfile>,
    /// Documents whose timestamp field is older than `now - ttl_secs` are
    /// reclaimed on merge.
    #[serde(default)]
    pub ttl_secs: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub schema: Schema,
    #[serde(default)]
    pub kv_online: KvOnlineConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

impl EngineConfig {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            kv_online: KvOnlineConfig::default(),
            build: BuildConfig::default(),
            merge: MergeConfig::default(),
        }
    }

    /// Parse and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;

        for param in &self.merge.reclaim {
            if self.schema.attribute(&param.field).is_none() {
                return Err(StoreError::UnknownField(param.field.clone()));
            }
        }

        for profile in &self.merge.truncate {
            if self.schema.index(&profile.index).is_none() {
                return Err(StoreError::UnknownIndex(profile.index.clone()));
            }
            if profile.limit == 0 {
                return Err(StoreError::Config(format!(
                    "truncate profile for '{}' has limit 0",
                    profile.index
                )));
            }
            for sort in &profile.sort {
                let attr = self
                    .schema
                    .attribute(&sort.field)
                    .ok_or_else(|| StoreError::UnknownField(sort.field.clone()))?;
                if !attr.is_fixed_length() {
                    return Err(StoreError::Config(format!(
                        "truncate sort field '{}' must be a single-value numeric attribute",
                        sort.field
                    )));
                }
            }
        }

        if let Some(ttl) = self.merge.ttl_secs {
            if ttl < 0 {
                return Err(StoreError::Config(format!("ttl_secs must be >= 0, got {}", ttl)));
            }
            if self.schema.timestamp_field.is_none() {
                return Err(StoreError::Config(
                    "ttl_secs requires schema.timestamp_field".into(),
                ));
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "schema": {
            "table_name": "items",
            "primary_key": "id",
            "timestamp_field": "ts",
            "attributes": [
                {"field_id": 0, "name": "price", "field_type": "int64"},
                {"field_id": 1, "name": "ts", "field_type": "int64"},
                {"field_id": 2, "name": "status", "field_type": "string"}
            ],
            "indexes": [{"index_id": 0, "name": "title", "field": "title"}]
        },
        "kv_online": {"count_limits": 1000, "build_protection_threshold": 4096},
        "merge": {
            "table_type": "split",
            "params": {"target_doc_count": "500"},
            "reclaim": [{"field": "status", "condition": {"type": "equal", "value": "gone"}}],
            "truncate": [{"index": "title", "sort": [{"field": "price", "order": "desc"}], "limit": 10}],
            "ttl_secs": 3600
        }
    }"#;

    #[test]
    fn test_parse_full_config() {
        let config = EngineConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.kv_online.count_limits, 1000);
        assert_eq!(config.kv_online.build_protection_threshold, 4096);
        assert_eq!(config.build.max_docs_per_segment, 100_000);
        assert_eq!(config.merge.table_type, "split");
        assert_eq!(config.merge.params["target_doc_count"], "500");
        assert_eq!(config.merge.reclaim.len(), 1);
        assert_eq!(config.merge.truncate[0].limit, 10);
        assert_eq!(config.merge.ttl_secs, Some(3600));
    }

    #[test]
    fn test_kv_online_defaults_to_unlimited() {
        let config = EngineConfig::from_json_str(
            r#"{"schema": {"table_name": "t", "primary_key": "id"}}"#,
        )
        .unwrap();
        assert_eq!(config.kv_online, KvOnlineConfig::default());
        assert_eq!(config.kv_online.count_limits, 0);
        assert!(config.merge.table_type.is_empty());
    }

    #[test]
    fn test_reclaim_on_unknown_field_rejected() {
        let bad = SAMPLE.replace(r#""field": "status""#, r#""field": "nope""#);
        let err = EngineConfig::from_json_str(&bad).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_FIELD");
    }

    #[test]
    fn test_truncate_on_string_field_rejected() {
        let bad = SAMPLE.replace(
            r#""sort": [{"field": "price""#,
            r#""sort": [{"field": "status""#,
        );
        let err = EngineConfig::from_json_str(&bad).unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_ttl_requires_timestamp_field() {
        let bad = SAMPLE.replace(r#""timestamp_field": "ts","#, "");
        assert!(EngineConfig::from_json_str(&bad).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, SAMPLE).unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.schema.table_name, "items");
    }
}
