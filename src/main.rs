use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use theseus::checkpoint;
use theseus::config::{StoreConfig, StoreOverrides};
use theseus::import::ImportConfig;
use theseus::retry::RetryPolicy;
use theseus::store::{MemoryStore, Neo4jStore};
use theseus::summary::ImportSummary;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "theseus")]
#[command(about = "Stream Wikipedia dumps into a Neo4j page graph")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import a pages-articles dump into the graph store
    Import(ImportArgs),
    /// Show the saved checkpoint for an import
    Status(StatusArgs),
}

#[derive(Args)]
struct ImportArgs {
    /// Path to the Wikipedia dump file (.xml or .xml.bz2)
    #[arg(short, long, default_value = theseus::config::DEFAULT_DUMP_PATH)]
    input: String,

    /// Directory for the checkpoint and run reports
    #[arg(long, default_value = theseus::config::DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Records per committed batch
    #[arg(long, default_value_t = theseus::config::DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Close a batch early once it holds this many graph operations
    #[arg(long, default_value_t = theseus::config::DEFAULT_MAX_BATCH_OPS)]
    max_batch_ops: usize,

    /// Concurrent batch commits
    #[arg(long, default_value_t = theseus::config::DEFAULT_COMMIT_WORKERS)]
    workers: usize,

    /// Batches buffered between parsing and committing
    #[arg(long, default_value_t = theseus::config::DEFAULT_QUEUE_DEPTH)]
    queue_depth: usize,

    /// Commit attempts per batch before it is recorded as failed
    #[arg(long, default_value_t = theseus::config::COMMIT_MAX_ATTEMPTS)]
    max_attempts: u32,

    /// Per-attempt commit timeout in seconds
    #[arg(long, default_value_t = theseus::config::COMMIT_ATTEMPT_TIMEOUT_SECS)]
    commit_timeout: u64,

    /// Namespaces to import, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = theseus::config::DEFAULT_NAMESPACES.to_vec())]
    namespaces: Vec<i32>,

    /// Ignore and delete any existing checkpoint instead of resuming from it
    #[arg(long)]
    fresh: bool,

    /// Stop after this many dump records (for testing)
    #[arg(long)]
    limit: Option<u64>,

    /// Checkpoint interval in committed batches
    #[arg(long, default_value_t = theseus::config::CHECKPOINT_INTERVAL)]
    checkpoint_interval: u32,

    /// Parse and resolve into an in-memory graph; nothing is written
    #[arg(long)]
    dry_run: bool,

    /// Neo4j Bolt URI (overrides NEO4J_URI)
    #[arg(long)]
    bolt_uri: Option<String>,

    /// Neo4j user (overrides NEO4J_USER)
    #[arg(long)]
    user: Option<String>,

    /// Neo4j password (overrides NEO4J_PASSWORD)
    #[arg(long)]
    password: Option<String>,

    /// JSON file with neo4j_uri, neo4j_user and neo4j_password
    #[arg(long)]
    neo4j_config: Option<PathBuf>,

    /// Hide the progress spinner
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args)]
struct StatusArgs {
    /// Path to the Wikipedia dump file the checkpoint should match
    #[arg(short, long)]
    input: Option<String>,

    /// Directory holding the checkpoint
    #[arg(long, default_value = theseus::config::DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
}

fn import_config(args: &ImportArgs) -> Result<ImportConfig> {
    if args.batch_size == 0 {
        bail!("--batch-size must be at least 1");
    }
    if args.workers == 0 {
        bail!("--workers must be at least 1");
    }
    if args.max_attempts == 0 {
        bail!("--max-attempts must be at least 1");
    }
    if args.namespaces.is_empty() {
        bail!("--namespaces must list at least one namespace");
    }

    let mut config = ImportConfig::new(args.input.clone(), args.state_dir.clone());
    config.batch_size = args.batch_size;
    config.max_batch_ops = args.max_batch_ops;
    config.workers = args.workers;
    config.queue_depth = args.queue_depth;
    config.namespaces = args.namespaces.clone();
    config.resume = !args.fresh;
    config.limit = args.limit;
    config.policy = RetryPolicy {
        max_attempts: args.max_attempts,
        attempt_timeout: Duration::from_secs(args.commit_timeout.max(1)),
        ..RetryPolicy::default()
    };
    config.checkpoint_interval = args.checkpoint_interval;
    config.persist = !args.dry_run;
    config.show_progress = !args.no_progress;
    Ok(config)
}

/// Flips the shutdown flag on the first Ctrl-C.
fn install_shutdown_handler() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight batches");
            eprintln!("Interrupted: finishing in-flight batches, then saving checkpoint...");
            let _ = tx.send(true);
        }
    });
    rx
}

async fn import(args: ImportArgs) -> Result<ImportSummary> {
    let config = import_config(&args)?;
    let shutdown = install_shutdown_handler();

    if args.dry_run {
        info!("Dry run: importing into an in-memory graph");
        return theseus::import::run_import(config, Arc::new(MemoryStore::new()), shutdown).await;
    }

    let overrides = StoreOverrides {
        uri: args.bolt_uri.clone(),
        user: args.user.clone(),
        password: args.password.clone(),
    };
    let store_config = StoreConfig::load(args.neo4j_config.as_deref(), &overrides)?;
    info!(uri = store_config.uri, "Connecting to Neo4j");
    let store = Neo4jStore::connect(&store_config)
        .await
        .context("Graph store is unreachable")?;

    theseus::import::run_import(config, Arc::new(store), shutdown).await
}

fn run_import(args: ImportArgs) -> Result<bool> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("theseus-commit-worker")
        .enable_io()
        .enable_time()
        .build()?;
    let summary = rt.block_on(import(args))?;
    summary.print();
    Ok(!summary.has_failures())
}

fn run_status(args: StatusArgs) -> Result<bool> {
    let Some(cp) = checkpoint::read(&args.state_dir)? else {
        println!("No checkpoint in {}", args.state_dir.display());
        return Ok(true);
    };

    let age = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|now| now.as_secs().saturating_sub(cp.saved_at))
        .unwrap_or(0);

    println!();
    println!("=== Checkpoint ===");
    println!("Input:              {}", cp.input_path);
    println!("Resume offset:      {}", cp.resume_offset);
    println!(
        "Last record id:     {}",
        cp.last_record_id
            .map_or("-".to_string(), |id| id.to_string())
    );
    println!("Saved:              {age}s ago");
    println!("Records read:       {}", cp.stats.records_read);
    println!("Articles:           {}", cp.stats.articles);
    println!("Batches committed:  {}", cp.stats.batches_committed);
    println!("Batches failed:     {}", cp.failed.len());
    for f in &cp.failed {
        println!(
            "  bytes {}..{}  ({} records): {}",
            f.start_offset, f.end_offset, f.records, f.error
        );
    }

    if let Some(input) = args.input {
        let valid = checkpoint::load_if_valid(&input, &args.state_dir)?.is_some();
        println!(
            "Matches input:      {}",
            if valid { "yes" } else { "no (next import starts fresh)" }
        );
    }

    Ok(cp.failed.is_empty())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let result = match cli.command {
        Commands::Import(args) => run_import(args),
        Commands::Status(args) => run_status(args),
    };

    match result {
        Ok(true) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            warn!("Completed with failed batches");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
