use crate::checkpoint::{self, CheckpointManager, CommitTracker};
use crate::commit::{run_commit_loop, Batcher, DispatchConfig};
use crate::config::{
    ANALYSIS_WINDOW, CHECKPOINT_INTERVAL, DEFAULT_BATCH_SIZE, DEFAULT_COMMIT_WORKERS,
    DEFAULT_MAX_BATCH_OPS, DEFAULT_NAMESPACES, DEFAULT_QUEUE_DEPTH, PROGRESS_INTERVAL,
};
use crate::content::{analyze_record, PageMarkup};
use crate::extract::{Extracted, RecordExtractor};
use crate::index::TitleIndex;
use crate::models::{Batch, PageRecord};
use crate::parser::WikiReader;
use crate::retry::RetryPolicy;
use crate::stats::{ImportStats, StatsSnapshot};
use crate::store::GraphStore;
use crate::summary::ImportSummary;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct ImportConfig {
    pub input: String,
    pub state_dir: PathBuf,
    pub batch_size: usize,
    pub max_batch_ops: usize,
    pub workers: usize,
    pub queue_depth: usize,
    pub namespaces: Vec<i32>,
    /// Continue from a valid checkpoint; when false any checkpoint is deleted first
    pub resume: bool,
    /// Stop after this many dump records in this run
    pub limit: Option<u64>,
    pub policy: RetryPolicy,
    pub checkpoint_interval: u32,
    /// Read and write checkpoints and reports under `state_dir`
    pub persist: bool,
    pub show_progress: bool,
}

impl ImportConfig {
    pub fn new(input: impl Into<String>, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            state_dir: state_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_ops: DEFAULT_MAX_BATCH_OPS,
            workers: DEFAULT_COMMIT_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            namespaces: DEFAULT_NAMESPACES.to_vec(),
            resume: true,
            limit: None,
            policy: RetryPolicy::default(),
            checkpoint_interval: CHECKPOINT_INTERVAL,
            persist: true,
            show_progress: false,
        }
    }
}

/// Settings moved onto the blocking parse thread
struct ParseSettings {
    start_offset: u64,
    batch_size: usize,
    max_batch_ops: usize,
    namespaces: Vec<i32>,
    limit: Option<u64>,
    show_progress: bool,
}

struct ParseOutcome {
    reached_end: bool,
    batches: u64,
}

enum Analyzed {
    Page(PageRecord, PageMarkup),
    Other(Extracted),
}

/// Runs the whole pipeline against `store` and returns the run summary.
///
/// The parse stage (read, extract, analyze, resolve) runs on a blocking
/// thread in dump order and hands finished batches to the commit dispatcher
/// through a bounded queue. Setting `shutdown` to true stops both stages;
/// in-flight commits still finish and are checkpointed.
pub async fn run_import<S: GraphStore + 'static>(
    config: ImportConfig,
    store: Arc<S>,
    shutdown: watch::Receiver<bool>,
) -> Result<ImportSummary> {
    let start = Instant::now();

    store
        .verify()
        .await
        .context("Graph store is unreachable")?;
    store
        .ensure_schema()
        .await
        .context("Failed to prepare graph schema")?;

    let resumed = if config.persist && config.resume {
        checkpoint::load_if_valid(&config.input, &config.state_dir)?
    } else {
        if config.persist {
            checkpoint::clear(&config.state_dir)?;
        }
        None
    };

    let (tracker, stats) = match &resumed {
        Some(cp) => {
            info!(
                offset = cp.resume_offset,
                last_id = ?cp.last_record_id,
                failed = cp.failed.len(),
                "Resuming from checkpoint"
            );
            (
                CommitTracker::resume_from(cp),
                ImportStats::from_snapshot(&cp.stats),
            )
        }
        None => {
            info!("Starting fresh import");
            (CommitTracker::new(0), ImportStats::new())
        }
    };
    let stats = Arc::new(stats);
    let start_offset = tracker.resume_offset();

    let checkpoints = if config.persist {
        Some(CheckpointManager::new(
            &config.input,
            &config.state_dir,
            config.checkpoint_interval,
        )?)
    } else {
        None
    };

    let reader = WikiReader::open(&config.input, start_offset)
        .with_context(|| format!("Failed to open wiki dump at: {}", config.input))?;

    let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
    let settings = ParseSettings {
        start_offset,
        batch_size: config.batch_size,
        max_batch_ops: config.max_batch_ops,
        namespaces: config.namespaces.clone(),
        limit: config.limit,
        show_progress: config.show_progress,
    };
    let parse_stats = stats.clone();
    let parse_shutdown = shutdown.clone();
    let parser = tokio::task::spawn_blocking(move || {
        run_parse_stage(reader, settings, tx, &parse_stats, &parse_shutdown)
    });

    let tracker = run_commit_loop(
        store.clone(),
        rx,
        DispatchConfig {
            workers: config.workers,
            policy: config.policy,
        },
        tracker,
        checkpoints,
        stats.clone(),
        shutdown.clone(),
    )
    .await?;

    let parsed = parser.await.context("Parse stage panicked")??;
    let interrupted = *shutdown.borrow();
    let all_committed = tracker.watermark() == parsed.batches && tracker.pending() == 0;
    let reached_end = parsed.reached_end && all_committed;

    if config.persist && reached_end && !interrupted {
        checkpoint::clear(&config.state_dir)?;
    }

    let counts = store
        .counts()
        .await
        .context("Failed to read graph counts")?;

    let summary = ImportSummary {
        input: config.input.clone(),
        resumed_from: resumed.as_ref().map(|cp| cp.resume_offset),
        committed_offset: tracker.resume_offset(),
        reached_end,
        interrupted,
        duration_secs: start.elapsed().as_secs_f64(),
        stats: stats.snapshot(),
        failed: tracker.all_failures(),
        counts,
    };

    if config.persist {
        summary.write_reports(&config.state_dir)?;
    }

    Ok(summary)
}

fn make_spinner(show: bool) -> ProgressBar {
    if !show {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed}] {msg}")
    {
        pb.set_style(style);
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

fn run_parse_stage(
    reader: WikiReader,
    settings: ParseSettings,
    tx: mpsc::Sender<Batch>,
    stats: &ImportStats,
    shutdown: &watch::Receiver<bool>,
) -> Result<ParseOutcome> {
    let mut extractor = RecordExtractor::new(reader, &settings.namespaces);
    let mut index = TitleIndex::new();
    let mut batcher = Batcher::new(
        settings.start_offset,
        settings.batch_size,
        settings.max_batch_ops,
    );
    let pb = make_spinner(settings.show_progress);

    let mut window: Vec<Extracted> = Vec::with_capacity(ANALYSIS_WINDOW);
    let mut units: u64 = 0;
    let mut reached_end = false;
    let mut queue_closed = false;

    'windows: loop {
        if *shutdown.borrow() {
            info!(units, "Shutdown requested, parse stage stopping");
            break;
        }

        while window.len() < ANALYSIS_WINDOW {
            if settings.limit.is_some_and(|limit| units >= limit) {
                break;
            }
            match extractor.next() {
                Some(item) => {
                    window.push(item?);
                    units += 1;
                }
                None => {
                    reached_end = true;
                    break;
                }
            }
        }
        if window.is_empty() {
            break;
        }

        // Markup analysis is independent per record; resolution below is not.
        let analyzed: Vec<Analyzed> = window
            .par_drain(..)
            .map(|item| match item {
                Extracted::Record(mut record) => {
                    let markup = analyze_record(&mut record);
                    Analyzed::Page(record, markup)
                }
                other => Analyzed::Other(other),
            })
            .collect();

        for unit in analyzed {
            let mut ops = Vec::new();
            let mut tally = StatsSnapshot {
                records_read: 1,
                ..Default::default()
            };

            let (end_offset, id) = match &unit {
                Analyzed::Page(record, markup) => {
                    index.resolve(record, markup, &mut ops, &mut tally);
                    (record.end_offset, Some(record.id))
                }
                Analyzed::Other(item) => {
                    match item {
                        Extracted::Skipped { id, namespace, .. } => {
                            debug!(id = ?id, namespace, "Skipping record outside namespaces");
                            tally.skipped += 1;
                        }
                        Extracted::Malformed { offset, reason, .. } => {
                            debug!(offset, reason = reason.as_str(), "Dropping malformed record");
                            tally.malformed += 1;
                        }
                        Extracted::ParseError {
                            offset,
                            end_offset,
                            message,
                        } => {
                            warn!(
                                offset,
                                resumed_at = end_offset,
                                error = message.as_str(),
                                "Skipping unparsable record"
                            );
                            tally.parse_errors += 1;
                        }
                        Extracted::Record(_) => {}
                    }
                    (item.end_offset(), item.record_id())
                }
            };

            stats.absorb(&tally);
            if stats.records_read() % PROGRESS_INTERVAL == 0 {
                pb.set_message(stats.progress_message());
            }

            if let Some(batch) = batcher.push(end_offset, id, &mut ops, &tally) {
                if tx.blocking_send(batch).is_err() {
                    queue_closed = true;
                    break 'windows;
                }
            }
        }

        if reached_end || settings.limit.is_some_and(|limit| units >= limit) {
            break;
        }
    }

    if !queue_closed {
        if let Some(batch) = batcher.flush() {
            if tx.blocking_send(batch).is_err() {
                queue_closed = true;
            }
        }
    }

    pb.finish_and_clear();
    info!(
        records = units,
        titles = index.len(),
        categories = index.category_count(),
        batches = batcher.batches_cut(),
        "Parse stage finished"
    );

    Ok(ParseOutcome {
        reached_end: reached_end && !queue_closed,
        batches: batcher.batches_cut(),
    })
}
