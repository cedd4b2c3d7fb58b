//! Background merge worker.
//!
//! One thread drains a request channel and runs merges one at a time.
//! Each request carries a [`CancelToken`]; a cancelled merge is abandoned
//! before publication and the partition is left as it was.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::merge::executor::MergeExecutor;
use crate::merge::policy::MergePolicy;
use crate::merge::task::MergeTask;
use crate::metrics;
use crate::partition::Partition;
use crate::types::SegmentId;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(MergeCancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(StoreError::MergeCancelled)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSummary {
    pub inputs: Vec<SegmentId>,
    pub outputs: Vec<SegmentId>,
    pub docs_reclaimed: u64,
    /// Partition version after publication.
    pub version: u64,
}

/// Run one merge to publication. With no explicit `task` the policy plans
/// one; `Ok(None)` means there was nothing to merge.
pub fn run_merge(
    partition: &Partition,
    executor: &MergeExecutor,
    policy: &MergePolicy,
    task: Option<MergeTask>,
    cancel: &CancelToken,
) -> Result<Option<MergeSummary>> {
    let snapshot = partition.snapshot();
    let planned = task.or_else(|| policy.plan(&snapshot)).or_else(|| {
        // A compacted partition is still rewritten when docs await reclaim.
        (*policy == MergePolicy::FullCompaction && executor.has_reclaimable(&snapshot))
            .then(|| MergePolicy::full_task(&snapshot))
    });
    let Some(task) = planned else {
        return Ok(None);
    };
    let output_ids: Vec<SegmentId> = task
        .target_segments
        .iter()
        .map(|_| partition.allocate_segment_id())
        .collect();

    let result = executor
        .execute(&snapshot, &task, &output_ids, cancel)
        .and_then(|output| {
            cancel.check()?;
            let outputs = output.segments.iter().map(|s| s.id()).collect();
            let docs_reclaimed = output.docs_reclaimed;
            partition.publish_merge(output)?;
            Ok(MergeSummary {
                inputs: task.input_segments.clone(),
                outputs,
                docs_reclaimed,
                version: partition.snapshot().version(),
            })
        });
    // Ids of omitted or abandoned outputs are never published.
    partition.release_segment_ids(&output_ids);

    match result {
        Ok(summary) => {
            metrics::report(executor.sink(), metrics::MERGES_COMPLETED, 1);
            metrics::report(executor.sink(), metrics::DOCS_RECLAIMED, summary.docs_reclaimed);
            info!(
                inputs = ?summary.inputs,
                outputs = ?summary.outputs,
                reclaimed = summary.docs_reclaimed,
                version = summary.version,
                "merge completed"
            );
            Ok(Some(summary))
        }
        Err(StoreError::MergeCancelled) => {
            metrics::report(executor.sink(), metrics::MERGES_CANCELLED, 1);
            info!(inputs = ?task.input_segments, "merge cancelled");
            Err(StoreError::MergeCancelled)
        }
        Err(e) => {
            warn!(inputs = ?task.input_segments, error = %e, "merge failed");
            Err(e)
        }
    }
}

struct MergeRequest {
    task: Option<MergeTask>,
    cancel: CancelToken,
}

pub type MergeResult = Result<Option<MergeSummary>>;

pub struct MergeScheduler {
    sender: Option<Sender<MergeRequest>>,
    results: Receiver<MergeResult>,
    worker: Option<JoinHandle<()>>,
}

impl MergeScheduler {
    pub fn start(partition: Arc<Partition>, executor: MergeExecutor, policy: MergePolicy) -> Self {
        let (sender, requests) = unbounded::<MergeRequest>();
        let (done, results) = unbounded();
        let worker = thread::spawn(move || {
            while let Ok(request) = requests.recv() {
                let result = run_merge(
                    &partition,
                    &executor,
                    &policy,
                    request.task,
                    &request.cancel,
                );
                if done.send(result).is_err() {
                    break;
                }
            }
        });
        Self {
            sender: Some(sender),
            results,
            worker: Some(worker),
        }
    }

    /// Queue a merge. `None` lets the policy choose the task.
    pub fn submit(&self, task: Option<MergeTask>) -> Result<CancelToken> {
        let cancel = CancelToken::new();
        let request = MergeRequest {
            task,
            cancel: cancel.clone(),
        };
        self.sender
            .as_ref()
            .ok_or_else(|| StoreError::Merge("merge scheduler stopped".into()))?
            .send(request)
            .map_err(|_| StoreError::Merge("merge worker exited".into()))?;
        Ok(cancel)
    }

    /// One result per submitted request, in submission order.
    pub fn results(&self) -> &Receiver<MergeResult> {
        &self.results
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("merge worker panicked");
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
