use crate::config::CHECKPOINT_VERSION;
use crate::models::{FailedRange, RecordRange};
use crate::stats::StatsSnapshot;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    /// Decompressed byte offset where the next run starts reading
    pub resume_offset: u64,
    pub last_record_id: Option<u32>,
    /// Unix seconds
    pub saved_at: u64,
    pub failed: Vec<FailedRange>,
    pub stats: StatsSnapshot,
}

pub fn checkpoint_path(state_dir: &Path) -> PathBuf {
    state_dir.join("checkpoint.bin")
}

fn get_input_mtime(input_path: &str) -> Result<u64> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok(mtime)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Reads the checkpoint without checking it against an input file.
pub fn read(state_dir: &Path) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(state_dir);

    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(&path).context("Failed to open checkpoint file")?;
    let reader = BufReader::new(file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    match options.deserialize_from(reader) {
        Ok(checkpoint) => Ok(Some(checkpoint)),
        Err(e) => {
            warn!(error = %e, "Checkpoint file is corrupt or unreadable");
            Ok(None)
        }
    }
}

pub fn load_if_valid(input_path: &str, state_dir: &Path) -> Result<Option<Checkpoint>> {
    let Some(checkpoint) = read(state_dir)? else {
        return Ok(None);
    };

    if checkpoint.version != CHECKPOINT_VERSION {
        info!(
            cached = checkpoint.version,
            current = CHECKPOINT_VERSION,
            "Checkpoint version mismatch"
        );
        return Ok(None);
    }

    if checkpoint.input_path != input_path {
        info!(
            cached = checkpoint.input_path,
            current = input_path,
            "Checkpoint input path mismatch"
        );
        return Ok(None);
    }

    let current_mtime = get_input_mtime(input_path)?;
    if checkpoint.input_mtime != current_mtime {
        info!(
            cached_mtime = checkpoint.input_mtime,
            current_mtime = current_mtime,
            "Input file has changed since checkpoint was created"
        );
        return Ok(None);
    }

    info!(
        offset = checkpoint.resume_offset,
        last_id = ?checkpoint.last_record_id,
        records = checkpoint.stats.records_read,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

pub fn clear(state_dir: &Path) -> Result<()> {
    let path = checkpoint_path(state_dir);
    if path.exists() {
        fs::remove_file(&path)
            .with_context(|| format!("Failed to remove checkpoint file: {:?}", path))?;
        info!("Checkpoint cleared");
    }
    Ok(())
}

/// A batch the commit dispatcher is done with, successfully or not.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub seq: u64,
    pub range: RecordRange,
    /// Parse-side counters of the batch plus its commit counters
    pub tally: StatsSnapshot,
    pub failure: Option<FailedRange>,
}

/// Contiguous commit watermark over batch sequence numbers.
///
/// Batches commit concurrently and finish in any order; the resume offset only
/// moves past a batch once it and every batch before it are done, so
/// everything before the offset is in the store (or listed as failed).
#[derive(Debug)]
pub struct CommitTracker {
    next_seq: u64,
    done: BTreeMap<u64, BatchOutcome>,
    resume_offset: u64,
    last_record_id: Option<u32>,
    failed: Vec<FailedRange>,
    stats: StatsSnapshot,
}

impl CommitTracker {
    pub fn new(start_offset: u64) -> Self {
        Self {
            next_seq: 0,
            done: BTreeMap::new(),
            resume_offset: start_offset,
            last_record_id: None,
            failed: Vec::new(),
            stats: StatsSnapshot::default(),
        }
    }

    /// Continues where `checkpoint` left off; batch numbering restarts at zero.
    pub fn resume_from(checkpoint: &Checkpoint) -> Self {
        Self {
            resume_offset: checkpoint.resume_offset,
            last_record_id: checkpoint.last_record_id,
            failed: checkpoint.failed.clone(),
            stats: checkpoint.stats.clone(),
            ..Self::new(checkpoint.resume_offset)
        }
    }

    /// Records a finished batch. Returns true when the watermark moved.
    pub fn complete(&mut self, outcome: BatchOutcome) -> bool {
        if outcome.seq < self.next_seq {
            warn!(seq = outcome.seq, "Batch completed twice");
            return false;
        }
        self.done.insert(outcome.seq, outcome);

        let mut advanced = false;
        while let Some(outcome) = self.done.remove(&self.next_seq) {
            self.resume_offset = self.resume_offset.max(outcome.range.end_offset);
            if outcome.range.last_id.is_some() {
                self.last_record_id = outcome.range.last_id;
            }
            self.stats.absorb(&outcome.tally);
            if let Some(failure) = outcome.failure {
                self.failed.push(failure);
            }
            self.next_seq += 1;
            advanced = true;
        }
        advanced
    }

    pub fn resume_offset(&self) -> u64 {
        self.resume_offset
    }

    pub fn last_record_id(&self) -> Option<u32> {
        self.last_record_id
    }

    /// Batches below this sequence number are all done
    pub fn watermark(&self) -> u64 {
        self.next_seq
    }

    /// Batches finished ahead of the watermark
    pub fn pending(&self) -> usize {
        self.done.len()
    }

    /// Counters for everything behind the watermark
    pub fn stats(&self) -> &StatsSnapshot {
        &self.stats
    }

    /// Failed ranges behind the watermark, including those from earlier runs
    pub fn failed(&self) -> &[FailedRange] {
        &self.failed
    }

    /// Every failure known so far, in dump order
    pub fn all_failures(&self) -> Vec<FailedRange> {
        let mut all = self.failed.clone();
        all.extend(self.done.values().filter_map(|o| o.failure.clone()));
        all.sort_by_key(|f| f.start_offset);
        all
    }
}

pub struct CheckpointManager {
    checkpoint_path: PathBuf,
    state_dir: PathBuf,
    input_path: String,
    input_mtime: u64,
    interval: u32,
    since_save: u32,
}

impl CheckpointManager {
    pub fn new(input_path: &str, state_dir: &Path, interval: u32) -> Result<Self> {
        let input_mtime = get_input_mtime(input_path)?;
        Ok(Self {
            checkpoint_path: checkpoint_path(state_dir),
            state_dir: state_dir.to_path_buf(),
            input_path: input_path.to_string(),
            input_mtime,
            interval: interval.max(1),
            since_save: 0,
        })
    }

    /// Call each time the watermark advances; saves every `interval` advances.
    pub fn maybe_save(&mut self, tracker: &CommitTracker) -> Result<bool> {
        self.since_save += 1;
        if self.since_save < self.interval {
            return Ok(false);
        }
        self.save(tracker)?;
        self.since_save = 0;
        Ok(true)
    }

    pub fn save(&self, tracker: &CommitTracker) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            input_path: self.input_path.clone(),
            input_mtime: self.input_mtime,
            resume_offset: tracker.resume_offset(),
            last_record_id: tracker.last_record_id(),
            saved_at: unix_now(),
            failed: tracker.failed().to_vec(),
            stats: tracker.stats().clone(),
        };

        fs::create_dir_all(&self.state_dir)
            .with_context(|| format!("Failed to create directory: {:?}", self.state_dir))?;

        let tmp_path = self.checkpoint_path.with_extension("bin.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp checkpoint file: {:?}", tmp_path))?;
        let writer = BufWriter::new(file);

        bincode::DefaultOptions::new()
            .serialize_into(writer, &checkpoint)
            .context("Failed to serialize checkpoint")?;

        fs::rename(&tmp_path, &self.checkpoint_path).with_context(|| {
            format!(
                "Failed to rename temp checkpoint: {:?}",
                self.checkpoint_path
            )
        })?;

        debug!(
            offset = checkpoint.resume_offset,
            watermark = tracker.watermark(),
            "Checkpoint saved"
        );

        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        clear(&self.state_dir)
    }
}
