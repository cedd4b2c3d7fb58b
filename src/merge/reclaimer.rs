//! Reclaim: drop documents matching a predicate while merging.
//!
//! The reclaimer reads sealed segments only. It yields the set of doc ids
//! to drop plus pruned posting views; the executor writes what survives
//! into the new segments.
//!
//! A predicate over an attribute the segment does not have fails closed:
//! no document is reclaimed by it and the merge goes on.

use std::collections::{BTreeMap, HashSet};

use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::attribute::convertor::AttributeConvertor;
use crate::attribute::data::{AttributeData, AttributeReader};
use crate::index::inverted::InvertedIndex;
use crate::kv::timestamp;
use crate::metrics::{self, SharedSink};
use crate::segment::Segment;
use crate::types::DocId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReclaimCondition {
    /// Encoded value equals `value`.
    Equal { value: String },
    /// Encoded value equals any of `values`.
    In { values: Vec<String> },
    /// Timestamp attribute (microseconds) normalizes to fewer than `seconds`.
    ExpiredBefore { seconds: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReclaimParam {
    pub field: String,
    pub condition: ReclaimCondition,
}

impl ReclaimParam {
    pub fn equal(field: &str, value: &str) -> Self {
        Self {
            field: field.to_string(),
            condition: ReclaimCondition::Equal {
                value: value.to_string(),
            },
        }
    }

    pub fn any_of(field: &str, values: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            condition: ReclaimCondition::In {
                values: values.iter().map(|v| v.to_string()).collect(),
            },
        }
    }

    pub fn expired_before(field: &str, seconds: i64) -> Self {
        Self {
            field: field.to_string(),
            condition: ReclaimCondition::ExpiredBefore { seconds },
        }
    }
}

pub struct IndexReclaimer {
    params: Vec<ReclaimParam>,
    sink: SharedSink,
}

impl IndexReclaimer {
    pub fn new(params: Vec<ReclaimParam>, sink: SharedSink) -> Self {
        Self { params, sink }
    }

    pub fn params(&self) -> &[ReclaimParam] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Doc ids of `segment` matched by any param.
    pub fn evaluate(&self, segment: &Segment) -> RoaringBitmap {
        let mut reclaimed = RoaringBitmap::new();
        for param in &self.params {
            let Some(data) = segment.attribute(&param.field) else {
                warn!(
                    segment = segment.id(),
                    field = %param.field,
                    "reclaim attribute missing, retaining documents"
                );
                metrics::report(&self.sink, metrics::RECLAIM_MISSING_ATTRIBUTE, 1);
                continue;
            };
            let matched = evaluate_param(param, data);
            debug!(
                segment = segment.id(),
                field = %param.field,
                matched = matched.len(),
                "reclaim predicate evaluated"
            );
            reclaimed |= matched;
        }
        reclaimed
    }

    /// Copy of `index` without the docs in `reclaimed`.
    pub fn prune(index: &InvertedIndex, reclaimed: &RoaringBitmap) -> InvertedIndex {
        let terms: BTreeMap<_, _> = index
            .terms()
            .map(|(term, posting)| {
                let mut posting = posting.clone();
                if !reclaimed.is_empty() {
                    posting.retain(|doc| !reclaimed.contains(doc));
                }
                (term.to_string(), posting)
            })
            .collect();
        InvertedIndex::from_terms(index.config_arc(), terms)
    }

    /// Evaluate and prune every index of `segment` in one pass.
    pub fn reclaim(&self, segment: &Segment) -> (RoaringBitmap, BTreeMap<String, InvertedIndex>) {
        let reclaimed = self.evaluate(segment);
        let indexes = segment
            .indexes()
            .iter()
            .map(|(name, index)| (name.clone(), Self::prune(index, &reclaimed)))
            .collect();
        (reclaimed, indexes)
    }
}

fn evaluate_param(param: &ReclaimParam, data: &AttributeData) -> RoaringBitmap {
    let convertor = AttributeConvertor::for_config(data.config());
    let mut matched = RoaringBitmap::new();
    let docs = 0..data.doc_count();

    match &param.condition {
        ReclaimCondition::Equal { value } => {
            if let Ok(target) = convertor.try_encode(value) {
                matched.extend(docs.filter(|&d| data.raw(d) == Some(target.as_slice())));
            }
        }
        ReclaimCondition::In { values } => {
            let targets: HashSet<Vec<u8>> = values
                .iter()
                .filter_map(|v| convertor.try_encode(v).ok())
                .collect();
            matched.extend(docs.filter(|&d| data.raw(d).is_some_and(|raw| targets.contains(raw))));
        }
        ReclaimCondition::ExpiredBefore { seconds } => {
            let reader = data.reader();
            matched.extend(docs.filter(|&d| is_expired_doc(&reader, d, *seconds)));
        }
    }
    matched
}

fn is_expired_doc(reader: &AttributeReader<'_>, doc: DocId, seconds: i64) -> bool {
    match reader.get(doc) {
        Ok(Some(value)) => value
            .as_i64()
            .is_some_and(|us| timestamp::normalize(us) < seconds),
        _ => false,
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KvOnlineConfig;
    use crate::document::Document;
    use crate::metrics::{Metrics, MetricsSink};
    use crate::schema::{AttributeConfig, IndexConfig, Schema};
    use crate::segment::InMemorySegment;
    use crate::types::FieldType;
    use std::sync::Arc;

    fn segment(statuses: &[&str]) -> Segment {
        let schema = Schema::new("t", "id")
            .with_attribute(AttributeConfig::new(0, "status", FieldType::String))
            .with_attribute(AttributeConfig::new(1, "ts", FieldType::Int64))
            .with_index(IndexConfig::new(0, "body", "body"));
        let mut building = InMemorySegment::new(Arc::new(schema), KvOnlineConfig::default());
        for (i, status) in statuses.iter().enumerate() {
            let doc = Document::add(&i.to_string())
                .with_field("status", status)
                .with_field("ts", &timestamp::to_microseconds(i as i64 * 100).to_string())
                .with_field("body", "common");
            building.add_document(&doc).unwrap();
        }
        building.seal(0).0
    }

    fn docs(bitmap: &RoaringBitmap) -> Vec<u32> {
        bitmap.iter().collect()
    }

    #[test]
    fn test_equal_condition() {
        let seg = segment(&["live", "gone", "live", "gone"]);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::equal("status", "gone")], None);
        assert_eq!(docs(&reclaimer.evaluate(&seg)), vec![1, 3]);
    }

    #[test]
    fn test_in_condition() {
        let seg = segment(&["a", "b", "c"]);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::any_of("status", &["a", "c"])], None);
        assert_eq!(docs(&reclaimer.evaluate(&seg)), vec![0, 2]);
    }

    #[test]
    fn test_expired_before() {
        let seg = segment(&["x", "x", "x"]);
        // ts = 0s, 100s, 200s
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::expired_before("ts", 150)], None);
        assert_eq!(docs(&reclaimer.evaluate(&seg)), vec![0, 1]);
    }

    #[test]
    fn test_missing_attribute_fails_closed() {
        let seg = segment(&["gone", "gone"]);
        let metrics = Arc::new(Metrics::new());
        let sink: SharedSink = Some(metrics.clone() as Arc<dyn MetricsSink>);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::equal("absent", "gone")], sink);
        assert!(reclaimer.evaluate(&seg).is_empty());
        assert_eq!(metrics.snapshot().reclaim_missing_attribute, 1);
        assert_eq!(metrics.snapshot().docs_reclaimed, 0);
    }

    #[test]
    fn test_evaluate_does_not_count_reclaimed_docs() {
        // Counted once the merge is published.
        let seg = segment(&["gone", "live", "gone"]);
        let metrics = Arc::new(Metrics::new());
        let sink: SharedSink = Some(metrics.clone() as Arc<dyn MetricsSink>);
        let reclaimed =
            IndexReclaimer::new(vec![ReclaimParam::equal("status", "gone")], sink).evaluate(&seg);
        assert_eq!(reclaimed.len(), 2);
        assert_eq!(metrics.snapshot().docs_reclaimed, 0);
    }

    #[test]
    fn test_prune_removes_reclaimed_postings() {
        let seg = segment(&["gone", "live", "gone"]);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::equal("status", "gone")], None);
        let (reclaimed, indexes) = reclaimer.reclaim(&seg);
        assert_eq!(docs(&reclaimed), vec![0, 2]);
        assert_eq!(indexes["body"].lookup("common").unwrap().as_slice(), &[1]);
        // source segment untouched
        assert_eq!(seg.index("body").unwrap().lookup("common").unwrap().len(), 3);
    }

    #[test]
    fn test_prune_all_drops_terms() {
        let seg = segment(&["gone", "gone"]);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::equal("status", "gone")], None);
        let (_, indexes) = reclaimer.reclaim(&seg);
        assert_eq!(indexes["body"].term_count(), 0);
    }

    #[test]
    fn test_unparsable_value_matches_nothing() {
        let seg = segment(&["x"]);
        let reclaimer = IndexReclaimer::new(vec![ReclaimParam::equal("ts", "not-a-number")], None);
        assert!(reclaimer.evaluate(&seg).is_empty());
    }

    #[test]
    fn test_param_json() {
        let json = r#"{"field": "ts", "condition": {"type": "expired_before", "seconds": 9}}"#;
        let param: ReclaimParam = serde_json::from_str(json).unwrap();
        assert_eq!(param, ReclaimParam::expired_before("ts", 9));
    }
}
