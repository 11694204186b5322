use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Conventional dump location when `--input` is not given
pub const DEFAULT_DUMP_PATH: &str = "data/pages-articles.xml.bz2";

/// Directory holding the checkpoint and run reports
pub const DEFAULT_STATE_DIR: &str = "import-state";

pub const DEFAULT_BOLT_URI: &str = "bolt://localhost:7687";
pub const DEFAULT_NEO4J_USER: &str = "neo4j";
pub const DEFAULT_NEO4J_PASSWORD: &str = "neo4j";

/// Records per committed batch
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// A batch is closed early (at a record boundary) once it holds this many operations
pub const DEFAULT_MAX_BATCH_OPS: usize = 20_000;

/// Concurrent commit transactions
pub const DEFAULT_COMMIT_WORKERS: usize = 4;

/// Batches buffered between the parse stage and the commit workers
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Attempts per batch before it is reported as failed
pub const COMMIT_MAX_ATTEMPTS: u32 = 5;
pub const COMMIT_BASE_DELAY_MS: u64 = 250;
pub const COMMIT_MAX_DELAY_MS: u64 = 15_000;
pub const COMMIT_ATTEMPT_TIMEOUT_SECS: u64 = 120;

/// Startup connection attempts before the store is declared unreachable
pub const CONNECT_MAX_RETRIES: u32 = 10;
pub const CONNECT_RETRY_DELAY_SECS: u64 = 3;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Save a checkpoint every N completed batches
pub const CHECKPOINT_INTERVAL: u32 = 1;

/// Progress update interval (tick every N records)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Records analyzed in parallel before sequential resolution
pub const ANALYSIS_WINDOW: usize = 256;

/// Longest `[[...]]` construct the analyzer will search for a closing `]]`
pub const MAX_LINK_SPAN: usize = 4096;

/// Namespaces imported by default: articles and category descriptions
pub const DEFAULT_NAMESPACES: &[i32] = &[0, 14];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// Keys accepted in the optional JSON credentials file
#[derive(Debug, Default, Deserialize)]
struct StoreConfigFile {
    neo4j_uri: Option<String>,
    neo4j_user: Option<String>,
    neo4j_password: Option<String>,
}

/// Explicit values from the command line; each wins over env, file and defaults.
#[derive(Debug, Default, Clone)]
pub struct StoreOverrides {
    pub uri: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl StoreConfig {
    /// Resolves credentials: overrides > `NEO4J_*` env > config file > defaults.
    pub fn load(config_file: Option<&Path>, overrides: &StoreOverrides) -> Result<Self> {
        Self::load_with_env(config_file, overrides, |key| std::env::var(key).ok())
    }

    fn load_with_env(
        config_file: Option<&Path>,
        overrides: &StoreOverrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let file = match config_file {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read store config: {}", path.display()))?;
                serde_json::from_str::<StoreConfigFile>(&raw)
                    .with_context(|| format!("Invalid store config: {}", path.display()))?
            }
            None => StoreConfigFile::default(),
        };

        let pick = |cli: &Option<String>, var: &str, from_file: Option<String>, default: &str| {
            cli.clone()
                .or_else(|| env(var))
                .or(from_file)
                .unwrap_or_else(|| default.to_string())
        };

        let config = Self {
            uri: pick(&overrides.uri, "NEO4J_URI", file.neo4j_uri, DEFAULT_BOLT_URI),
            user: pick(
                &overrides.user,
                "NEO4J_USER",
                file.neo4j_user,
                DEFAULT_NEO4J_USER,
            ),
            password: pick(
                &overrides.password,
                "NEO4J_PASSWORD",
                file.neo4j_password,
                DEFAULT_NEO4J_PASSWORD,
            ),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.uri.trim().is_empty() {
            bail!("Neo4j URI must be a non-empty string");
        }
        if self.user.trim().is_empty() {
            bail!("Neo4j user must be a non-empty string");
        }
        if self.password.is_empty() {
            bail!("Neo4j password must be a non-empty string");
        }
        Ok(())
    }
}
