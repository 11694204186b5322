use crate::checkpoint::{BatchOutcome, CheckpointManager, CommitTracker};
use crate::models::{Batch, FailedRange, GraphOp, RecordRange};
use crate::retry::{RetryMachine, RetryPolicy, RetryState};
use crate::stats::{ImportStats, StatsSnapshot};
use crate::store::{GraphStore, StoreError};
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Cuts the resolved operation stream into batches at record boundaries.
///
/// Every extracted unit (record, skipped or malformed) extends the current
/// batch's range, so consecutive batches cover the dump without gaps and a
/// batch with no operations still moves the checkpoint forward.
pub struct Batcher {
    max_records: usize,
    max_ops: usize,
    next_seq: u64,
    cursor: u64,
    ops: Vec<GraphOp>,
    range: Option<RecordRange>,
    tally: StatsSnapshot,
}

impl Batcher {
    pub fn new(start_offset: u64, max_records: usize, max_ops: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            max_ops: max_ops.max(1),
            next_seq: 0,
            cursor: start_offset,
            ops: Vec::new(),
            range: None,
            tally: StatsSnapshot::default(),
        }
    }

    /// Adds one unit ending at `end_offset`; returns a batch once a limit is reached.
    pub fn push(
        &mut self,
        end_offset: u64,
        id: Option<u32>,
        ops: &mut Vec<GraphOp>,
        tally: &StatsSnapshot,
    ) -> Option<Batch> {
        let cursor = self.cursor;
        let range = self.range.get_or_insert_with(|| RecordRange {
            start_offset: cursor,
            end_offset: cursor,
            first_id: None,
            last_id: None,
            records: 0,
        });
        range.end_offset = range.end_offset.max(end_offset);
        if let Some(id) = id {
            range.first_id.get_or_insert(id);
            range.last_id = Some(id);
        }
        range.records += 1;
        let records = range.records;

        self.ops.append(ops);
        self.tally.absorb(tally);
        self.cursor = self.cursor.max(end_offset);

        if records as usize >= self.max_records || self.ops.len() >= self.max_ops {
            self.cut()
        } else {
            None
        }
    }

    /// Closes the partial batch, if any.
    pub fn flush(&mut self) -> Option<Batch> {
        self.cut()
    }

    pub fn batches_cut(&self) -> u64 {
        self.next_seq
    }

    fn cut(&mut self) -> Option<Batch> {
        let range = self.range.take()?;
        let seq = self.next_seq;
        self.next_seq += 1;
        Some(Batch {
            seq,
            ops: std::mem::take(&mut self.ops),
            range,
            tally: std::mem::take(&mut self.tally),
        })
    }
}

#[derive(Debug)]
pub struct CommitReport {
    pub attempts: u32,
    pub result: Result<(), StoreError>,
}

/// Commits one batch, driving the retry machine until it succeeds or gives up.
pub async fn commit_with_retry<S: GraphStore + ?Sized>(
    store: &S,
    batch: &Batch,
    policy: &RetryPolicy,
) -> CommitReport {
    let mut machine = RetryMachine::new(*policy);
    loop {
        match machine.state().clone() {
            RetryState::Attempting { attempt } => {
                let outcome =
                    match tokio::time::timeout(policy.attempt_timeout, store.commit(batch)).await {
                        Ok(result) => result,
                        Err(_) => Err(StoreError::Timeout(policy.attempt_timeout)),
                    };
                if let Err(e) = &outcome {
                    warn!(seq = batch.seq, attempt, error = %e, "Batch commit failed");
                }
                machine.record(outcome);
            }
            RetryState::Waiting { delay, .. } => {
                tokio::time::sleep(delay).await;
                machine.wake();
            }
            RetryState::Succeeded { attempts } => {
                return CommitReport {
                    attempts,
                    result: Ok(()),
                };
            }
            RetryState::GaveUp { attempts, error } => {
                return CommitReport {
                    attempts,
                    result: Err(error),
                };
            }
        }
    }
}

fn spawn_commit<S: GraphStore + 'static>(
    store: Arc<S>,
    batch: Batch,
    policy: RetryPolicy,
) -> JoinHandle<BatchOutcome> {
    tokio::spawn(async move {
        let report = commit_with_retry(store.as_ref(), &batch, &policy).await;
        let Batch {
            seq,
            ops,
            range,
            mut tally,
        } = batch;

        tally.commit_retries += u64::from(report.attempts.saturating_sub(1));
        let failure = match report.result {
            Ok(()) => {
                tally.batches_committed += 1;
                tally.ops_committed += ops.len() as u64;
                debug!(seq, ops = ops.len(), attempts = report.attempts, "Batch committed");
                None
            }
            Err(e) => {
                tally.batches_failed += 1;
                error!(
                    seq,
                    start_offset = range.start_offset,
                    end_offset = range.end_offset,
                    attempts = report.attempts,
                    error = %e,
                    "Batch failed permanently"
                );
                Some(FailedRange::new(seq, &range, report.attempts, e.to_string()))
            }
        };

        BatchOutcome {
            seq,
            range,
            tally,
            failure,
        }
    })
}

/// Settings for [`run_commit_loop`]
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    pub workers: usize,
    pub policy: RetryPolicy,
}

/// Pulls batches off the queue and keeps at most `workers` commits in flight.
///
/// Stops pulling once the queue closes or shutdown is signalled; commits
/// already in flight always finish and are recorded before this returns.
pub async fn run_commit_loop<S: GraphStore + 'static>(
    store: Arc<S>,
    mut rx: mpsc::Receiver<Batch>,
    config: DispatchConfig,
    mut tracker: CommitTracker,
    mut checkpoints: Option<CheckpointManager>,
    stats: Arc<ImportStats>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<CommitTracker> {
    let workers = config.workers.max(1);
    let mut in_flight = FuturesUnordered::new();
    let mut open = true;
    let mut shutdown_live = true;

    loop {
        if open && *shutdown.borrow() {
            info!(in_flight = in_flight.len(), "Stopping: waiting for in-flight commits");
            open = false;
        }
        if !open && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            next = rx.recv(), if open && in_flight.len() < workers => match next {
                Some(batch) => in_flight.push(spawn_commit(store.clone(), batch, config.policy)),
                None => open = false,
            },
            Some(joined) = in_flight.next(), if !in_flight.is_empty() => {
                let outcome = joined.context("Commit task panicked")?;
                stats.add_batches_committed(outcome.tally.batches_committed);
                stats.add_batches_failed(outcome.tally.batches_failed);
                stats.add_commit_retries(outcome.tally.commit_retries);
                stats.add_ops_committed(outcome.tally.ops_committed);

                if tracker.complete(outcome) {
                    if let Some(manager) = checkpoints.as_mut() {
                        manager.maybe_save(&tracker)?;
                    }
                }
            },
            changed = shutdown.changed(), if open && shutdown_live => {
                if changed.is_err() {
                    shutdown_live = false;
                }
            },
            else => break,
        }
    }

    // Queued batches are dropped here; they are re-read on resume.
    drop(rx);

    if let Some(manager) = checkpoints.as_ref() {
        manager.save(&tracker)?;
    }
    Ok(tracker)
}
