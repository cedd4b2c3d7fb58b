//! Partition: the ordered list of sealed segments and their deletions.
//!
//! ## On-disk layout
//!
//! ```text
//! <partition>/
//! +-- schema.json
//! +-- partition.json      # Manifest (commit point, replaced via tmp + rename)
//! +-- segment_<id>/       # see segment::sealed
//! ```
//!
//! Every change builds a new [`PartitionSnapshot`], persists the manifest,
//! then swaps the published `Arc`. Readers holding an older snapshot keep
//! its segments alive; retired segments are only removed by
//! [`Partition::collect_garbage`] once nobody holds them.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::merge::executor::MergeOutput;
use crate::partition::snapshot::{PartitionSnapshot, SegmentEntry};
use crate::schema::Schema;
use crate::segment::Segment;
use crate::types::{DocId, SegmentId};

pub const MANIFEST_FILE: &str = "partition.json";
pub const SCHEMA_FILE: &str = "schema.json";
const SEGMENT_DIR_PREFIX: &str = "segment_";

pub fn segment_dir(partition_dir: &Path, id: SegmentId) -> PathBuf {
    partition_dir.join(format!("{}{}", SEGMENT_DIR_PREFIX, id))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Manifest {
    version: u64,
    next_segment_id: SegmentId,
    segments: Vec<ManifestSegment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ManifestSegment {
    id: SegmentId,
    #[serde(default)]
    deleted: Vec<DocId>,
}

#[derive(Debug)]
pub struct Partition {
    dir: Option<PathBuf>,
    schema: Arc<Schema>,
    state: RwLock<Arc<PartitionSnapshot>>,
    /// Serializes publishers (dumps, deletes, merges).
    commit: Mutex<()>,
    next_segment_id: AtomicU32,
    /// Allocated ids whose segment is not published yet. Their directories
    /// are not orphans.
    pending: Mutex<HashSet<SegmentId>>,
    retired: Mutex<Vec<Arc<Segment>>>,
}

impl Partition {
    /// Partition without a directory. Nothing is persisted.
    pub fn in_memory(schema: Arc<Schema>) -> Self {
        Self {
            dir: None,
            schema,
            state: RwLock::new(Arc::new(PartitionSnapshot::default())),
            commit: Mutex::new(()),
            next_segment_id: AtomicU32::new(0),
            pending: Mutex::new(HashSet::new()),
            retired: Mutex::new(Vec::new()),
        }
    }

    /// Initialize an empty partition at `dir`.
    pub fn create(dir: &Path, schema: Arc<Schema>) -> Result<Self> {
        schema.validate()?;
        fs::create_dir_all(dir)?;
        if dir.join(MANIFEST_FILE).exists() {
            return Err(StoreError::Config(format!(
                "partition already exists at {}",
                dir.display()
            )));
        }
        fs::write(dir.join(SCHEMA_FILE), serde_json::to_vec_pretty(&*schema)?)?;
        let mut partition = Self::in_memory(schema);
        partition.dir = Some(dir.to_path_buf());
        partition.write_manifest(&PartitionSnapshot::default())?;
        tracing::info!(dir = %dir.display(), "partition created");
        Ok(partition)
    }

    /// Open a partition written by [`Partition::create`].
    pub fn open(dir: &Path) -> Result<Self> {
        let schema: Schema = serde_json::from_slice(&fs::read(dir.join(SCHEMA_FILE))?)?;
        schema.validate()?;
        let manifest: Manifest = serde_json::from_slice(&fs::read(dir.join(MANIFEST_FILE))?)?;

        let mut entries = Vec::with_capacity(manifest.segments.len());
        for seg in &manifest.segments {
            let segment = Segment::open(&segment_dir(dir, seg.id), seg.id, &schema)?;
            if let Some(&bad) = seg.deleted.iter().find(|&&d| d >= segment.doc_count()) {
                return Err(StoreError::InvalidFormat(format!(
                    "segment {}: deleted doc {} out of range",
                    seg.id, bad
                )));
            }
            let deleted: RoaringBitmap = seg.deleted.iter().copied().collect();
            entries.push(SegmentEntry::new(Arc::new(segment), deleted));
        }
        tracing::info!(
            dir = %dir.display(),
            segments = entries.len(),
            version = manifest.version,
            "partition opened"
        );

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            schema: Arc::new(schema),
            state: RwLock::new(Arc::new(PartitionSnapshot::new(manifest.version, entries))),
            commit: Mutex::new(()),
            next_segment_id: AtomicU32::new(manifest.next_segment_id),
            pending: Mutex::new(HashSet::new()),
            retired: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Current published snapshot.
    pub fn snapshot(&self) -> Arc<PartitionSnapshot> {
        self.state.read().clone()
    }

    /// Reserve a segment id. Its directory is kept by `collect_garbage`
    /// until the segment is published or the id is released.
    pub fn allocate_segment_id(&self) -> SegmentId {
        let mut pending = self.pending.lock();
        let id = self.next_segment_id.fetch_add(1, Ordering::SeqCst);
        pending.insert(id);
        id
    }

    /// Give up ids that will not be published. Published ids are ignored.
    pub fn release_segment_ids(&self, ids: &[SegmentId]) {
        let mut pending = self.pending.lock();
        for id in ids {
            pending.remove(id);
        }
    }

    /// Publish a freshly dumped segment as the newest one.
    pub fn add_segment(&self, segment: Segment, deleted: RoaringBitmap) -> Result<()> {
        let id = segment.id();
        let written = match &self.dir {
            Some(dir) => segment.write_to_dir(&segment_dir(dir, id)),
            None => Ok(()),
        };
        let _commit = self.commit.lock();
        let result = written.and_then(|()| {
            let current = self.snapshot();
            let mut entries = current.entries().to_vec();
            entries.push(SegmentEntry::new(Arc::new(segment), deleted));
            self.publish(PartitionSnapshot::new(current.version() + 1, entries))
        });
        self.release_segment_ids(&[id]);
        result
    }

    /// Delete the live sealed version of `primary_key`. Resolution and
    /// deletion happen under one commit, so a merge published in between
    /// cannot strand the address. Returns `false` when no live version exists.
    pub fn delete_pk(&self, primary_key: &str) -> Result<bool> {
        let _commit = self.commit.lock();
        let current = self.snapshot();
        let Some(address) = current.lookup_pk(primary_key) else {
            return Ok(false);
        };
        self.delete_locked(&current, address.segment_id, address.doc_id)
    }

    /// Mark a sealed doc deleted. Returns `false` when it already was, or
    /// when `doc_id` is out of range.
    pub fn delete(&self, segment_id: SegmentId, doc_id: DocId) -> Result<bool> {
        let _commit = self.commit.lock();
        let current = self.snapshot();
        self.delete_locked(&current, segment_id, doc_id)
    }

    /// Caller holds `commit`.
    fn delete_locked(
        &self,
        current: &PartitionSnapshot,
        segment_id: SegmentId,
        doc_id: DocId,
    ) -> Result<bool> {
        let pos = current
            .position(segment_id)
            .ok_or(StoreError::UnknownSegment(segment_id))?;
        let entry = &current.entries()[pos];
        if doc_id >= entry.segment.doc_count() || entry.is_deleted(doc_id) {
            return Ok(false);
        }
        let mut deleted = (*entry.deleted).clone();
        deleted.insert(doc_id);

        let mut entries = current.entries().to_vec();
        entries[pos] = SegmentEntry::new(entry.segment.clone(), deleted);
        self.publish(PartitionSnapshot::new(current.version() + 1, entries))?;
        Ok(true)
    }

    /// Replace a merge's inputs with its outputs.
    ///
    /// Fails with `MergeConflict`, leaving the partition unchanged, when
    /// any input is gone or the inputs are no longer adjacent. Deletions
    /// made after the merge's snapshot are carried onto the outputs.
    pub fn publish_merge(&self, output: MergeOutput) -> Result<()> {
        let ids: Vec<SegmentId> = output.segments.iter().map(|s| s.id()).collect();
        let mut written = Vec::new();
        if let Some(dir) = &self.dir {
            for segment in &output.segments {
                let path = segment_dir(dir, segment.id());
                written.push(path.clone());
                if let Err(e) = segment.write_to_dir(&path) {
                    remove_dirs(&written);
                    self.release_segment_ids(&ids);
                    return Err(e);
                }
            }
        }

        let _commit = self.commit.lock();
        let current = self.snapshot();
        let result = self
            .build_merged_snapshot(&current, output)
            .and_then(|(next, retired)| self.publish(next).map(|()| retired));
        match result {
            Ok(retired) => {
                self.retired.lock().extend(retired);
                self.release_segment_ids(&ids);
                Ok(())
            }
            Err(e) => {
                remove_dirs(&written);
                self.release_segment_ids(&ids);
                Err(e)
            }
        }
    }

    fn build_merged_snapshot(
        &self,
        current: &PartitionSnapshot,
        output: MergeOutput,
    ) -> Result<(PartitionSnapshot, Vec<Arc<Segment>>)> {
        let mut positions = Vec::with_capacity(output.inputs.len());
        for input in &output.inputs {
            let pos = current.position(input.segment_id).ok_or_else(|| {
                StoreError::MergeConflict(format!(
                    "input segment {} is no longer in the partition",
                    input.segment_id
                ))
            })?;
            positions.push(pos);
        }
        if positions.windows(2).any(|w| w[1] != w[0] + 1) {
            return Err(StoreError::MergeConflict(
                "merge inputs are no longer adjacent".into(),
            ));
        }
        let (first, last) = match (positions.first(), positions.last()) {
            (Some(&f), Some(&l)) => (f, l),
            _ => return Err(StoreError::Merge("merge has no inputs".into())),
        };

        // Carry deletes that landed after the merge snapshot.
        let mut carried = vec![RoaringBitmap::new(); output.segments.len()];
        for (input, &pos) in output.inputs.iter().zip(&positions) {
            let now = &current.entries()[pos].deleted;
            let fresh = &**now - &*input.base_deleted;
            for doc in &fresh {
                if let Some(Some((out, new_doc))) = input.doc_map.get(doc as usize) {
                    if let Some(bitmap) = carried.get_mut(*out) {
                        bitmap.insert(*new_doc);
                    }
                }
            }
        }

        let entries = current.entries();
        let retired: Vec<Arc<Segment>> = entries[first..=last]
            .iter()
            .map(|e| e.segment.clone())
            .collect();
        let mut next = Vec::with_capacity(entries.len() - retired.len() + output.segments.len());
        next.extend_from_slice(&entries[..first]);
        next.extend(
            output
                .segments
                .into_iter()
                .zip(carried)
                .map(|(segment, deleted)| SegmentEntry::new(Arc::new(segment), deleted)),
        );
        next.extend_from_slice(&entries[last + 1..]);

        tracing::info!(
            inputs = ?output.task.input_segments,
            outputs = next.len() + retired.len() - entries.len(),
            version = current.version() + 1,
            "merge published"
        );
        Ok((PartitionSnapshot::new(current.version() + 1, next), retired))
    }

    /// Persist (when on disk) then swap. Caller holds `commit`.
    fn publish(&self, next: PartitionSnapshot) -> Result<()> {
        if self.dir.is_some() {
            self.write_manifest(&next)?;
        }
        *self.state.write() = Arc::new(next);
        Ok(())
    }

    fn write_manifest(&self, snapshot: &PartitionSnapshot) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let manifest = Manifest {
            version: snapshot.version(),
            next_segment_id: self.next_segment_id.load(Ordering::SeqCst),
            segments: snapshot
                .entries()
                .iter()
                .map(|e| ManifestSegment {
                    id: e.segment.id(),
                    deleted: e.deleted.iter().collect(),
                })
                .collect(),
        };
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(&manifest)?)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// Drop retired segments no snapshot holder still references, and
    /// remove segment directories the manifest does not list. Returns the
    /// number of segments removed.
    pub fn collect_garbage(&self) -> Result<usize> {
        let _commit = self.commit.lock();
        let mut removed = 0;
        {
            let mut retired = self.retired.lock();
            let mut kept = Vec::new();
            for segment in retired.drain(..) {
                if Arc::strong_count(&segment) > 1 {
                    kept.push(segment);
                    continue;
                }
                if let Some(dir) = &self.dir {
                    remove_segment_dir(&segment_dir(dir, segment.id()))?;
                }
                removed += 1;
            }
            *retired = kept;
        }

        if let Some(dir) = &self.dir {
            let live: Vec<SegmentId> = self.snapshot().segment_ids();
            let retired_ids: Vec<SegmentId> = self.retired.lock().iter().map(|s| s.id()).collect();
            let pending = self.pending.lock().clone();
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(id) = name
                    .to_str()
                    .and_then(|n| n.strip_prefix(SEGMENT_DIR_PREFIX))
                    .and_then(|n| n.parse::<SegmentId>().ok())
                else {
                    continue;
                };
                if !live.contains(&id) && !retired_ids.contains(&id) && !pending.contains(&id) {
                    remove_segment_dir(&entry.path())?;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "garbage collected");
        }
        Ok(removed)
    }

    /// Allocated ids not yet published or released.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Segments retired by merges but still held by readers.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }
}

fn remove_segment_dir(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Best-effort cleanup of unpublished merge outputs.
fn remove_dirs(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_dir_all(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove unpublished segment");
        }
    }
}
