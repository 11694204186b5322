//! Graph store boundary: the commit pipeline only talks to [`GraphStore`].

pub mod memory;
pub mod neo4j;

use crate::models::Batch;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub use memory::{FaultPlan, MemoryStore};
pub use neo4j::Neo4jStore;

/// Failures at the commit boundary, classified for the retry policy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("commit timed out after {0:?}")]
    Timeout(Duration),

    #[error("batch rejected: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Transient failures are retried; a rejected batch never will succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Rejected(_))
    }
}

/// Node and relationship totals as seen by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphCounts {
    /// Article nodes carrying a record id
    pub articles: u64,
    /// Article nodes known only by title
    pub placeholders: u64,
    pub categories: u64,
    pub links: u64,
    pub memberships: u64,
    pub subcategories: u64,
    pub redirects: u64,
}

impl GraphCounts {
    pub fn nodes(&self) -> u64 {
        self.articles + self.placeholders + self.categories
    }

    pub fn relationships(&self) -> u64 {
        self.links + self.memberships + self.subcategories + self.redirects
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Confirms the store is reachable.
    async fn verify(&self) -> Result<(), StoreError>;

    /// Creates the uniqueness constraints and indexes the upserts rely on.
    async fn ensure_schema(&self) -> anyhow::Result<()>;

    /// Applies every operation of `batch` in one transaction, or none of them.
    ///
    /// All writes are merges keyed on title/name, so committing the same
    /// batch twice leaves the graph unchanged.
    async fn commit(&self, batch: &Batch) -> Result<(), StoreError>;

    async fn counts(&self) -> anyhow::Result<GraphCounts>;
}
