//! Declarative merge tasks.
//!
//! A task names the input segments (a contiguous run of the partition) and
//! describes each output. External tooling writes tasks as JSON:
//!
//! ```json
//! {
//!   "input_segments": [3, 4, 5],
//!   "target_segments": [
//!     {"target_segment_docCount": 1000, "use_specified_dp_file": false, "deploy_file_list": []}
//!   ]
//! }
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::types::SegmentId;

/// One output segment of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeSegmentDescription {
    #[serde(rename = "target_segment_docCount")]
    pub target_doc_count: u32,
    /// Use `deploy_file_list` verbatim instead of the computed file list.
    #[serde(rename = "use_specified_dp_file", default)]
    pub use_specified_deploy_files: bool,
    #[serde(rename = "deploy_file_list", default)]
    pub deploy_file_list: Vec<String>,
}

impl MergeSegmentDescription {
    pub fn new(target_doc_count: u32) -> Self {
        Self {
            target_doc_count,
            use_specified_deploy_files: false,
            deploy_file_list: Vec::new(),
        }
    }

    pub fn with_deploy_files(mut self, files: Vec<String>) -> Self {
        self.use_specified_deploy_files = true;
        self.deploy_file_list = files;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeTask {
    pub input_segments: Vec<SegmentId>,
    pub target_segments: Vec<MergeSegmentDescription>,
}

impl MergeTask {
    pub fn new(input_segments: Vec<SegmentId>, target_segments: Vec<MergeSegmentDescription>) -> Self {
        Self {
            input_segments,
            target_segments,
        }
    }

    /// Parse and validate a task from its JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        let task: MergeTask = serde_json::from_str(text)?;
        task.validate()?;
        Ok(task)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_segments.is_empty() {
            return Err(StoreError::Merge("merge task has no input segments".into()));
        }
        if self.target_segments.is_empty() {
            return Err(StoreError::Merge("merge task has no target segments".into()));
        }
        let mut seen = HashSet::new();
        for id in &self.input_segments {
            if !seen.insert(*id) {
                return Err(StoreError::Merge(format!(
                    "segment {} listed twice in merge task",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Sum of target doc counts.
    pub fn target_doc_count(&self) -> u64 {
        self.target_segments
            .iter()
            .map(|t| t.target_doc_count as u64)
            .sum()
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let desc = MergeSegmentDescription::new(42).with_deploy_files(vec!["a".into()]);
        let json = serde_json::to_string(&desc).unwrap();
        assert!(json.contains("\"target_segment_docCount\":42"));
        assert!(json.contains("\"use_specified_dp_file\":true"));
        assert!(json.contains("\"deploy_file_list\":[\"a\"]"));
    }

    #[test]
    fn test_parse_defaults_optional_fields() {
        let task = MergeTask::parse(
            r#"{"input_segments": [1, 2], "target_segments": [{"target_segment_docCount": 10}]}"#,
        )
        .unwrap();
        assert_eq!(task.input_segments, vec![1, 2]);
        assert!(!task.target_segments[0].use_specified_deploy_files);
        assert!(task.target_segments[0].deploy_file_list.is_empty());
        assert_eq!(task.target_doc_count(), 10);
    }

    #[test]
    fn test_json_roundtrip() {
        let task = MergeTask::new(
            vec![4, 5],
            vec![MergeSegmentDescription::new(3), MergeSegmentDescription::new(7)],
        );
        assert_eq!(MergeTask::parse(&task.to_json().unwrap()).unwrap(), task);
    }

    #[test]
    fn test_invalid_tasks() {
        assert!(MergeTask::parse(r#"{"input_segments": [], "target_segments": [{"target_segment_docCount": 1}]}"#).is_err());
        assert!(MergeTask::parse(r#"{"input_segments": [1], "target_segments": []}"#).is_err());
        assert!(MergeTask::parse(r#"{"input_segments": [1, 1], "target_segments": [{"target_segment_docCount": 1}]}"#).is_err());
        assert!(MergeTask::parse("not json").is_err());
    }
}
