use super::{GraphCounts, GraphStore, StoreError};
use crate::models::{Batch, GraphOp, LinkKind};
use crate::title::article_url;
use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleEntry {
    pub url: String,
    pub id: Option<u32>,
    pub namespace: Option<i32>,
    pub length: Option<u64>,
    pub is_redirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkProps {
    pub anchor: String,
    pub kind: LinkKind,
    pub self_link: bool,
}

/// Ordered copy of the whole graph, comparable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphSnapshot {
    pub articles: BTreeMap<String, ArticleEntry>,
    pub categories: BTreeMap<String, Option<u32>>,
    pub links: BTreeMap<(String, String), LinkProps>,
    pub memberships: BTreeMap<(String, String), String>,
    pub subcategories: BTreeMap<(String, String), String>,
    pub redirects: BTreeSet<(String, String)>,
}

impl GraphSnapshot {
    fn touch_article(&mut self, title: &str) -> &mut ArticleEntry {
        self.articles
            .entry(title.to_string())
            .or_insert_with(|| ArticleEntry {
                url: article_url(title),
                ..Default::default()
            })
    }

    fn touch_category(&mut self, name: &str) -> &mut Option<u32> {
        self.categories.entry(name.to_string()).or_default()
    }

    /// Same merge rules as the Cypher upserts: nodes merge on title/name, a
    /// node's attributes belong to the first record id that claims it, and
    /// edge properties are only written when the edge is created.
    fn apply(&mut self, op: &GraphOp) {
        match op {
            GraphOp::UpsertArticle(node) => {
                let entry = self.touch_article(&node.title);
                if node.is_placeholder() {
                    return;
                }
                if entry.id.is_none() || entry.id == node.id {
                    *entry = ArticleEntry {
                        url: node.url.clone(),
                        id: node.id,
                        namespace: node.namespace,
                        length: node.length,
                        is_redirect: node.is_redirect,
                    };
                }
            }
            GraphOp::UpsertCategory(node) => {
                let entry = self.touch_category(&node.name);
                if entry.is_none() {
                    *entry = node.id;
                }
            }
            GraphOp::Link(edge) => {
                self.touch_article(&edge.source);
                self.touch_article(&edge.target);
                self.links
                    .entry((edge.source.clone(), edge.target.clone()))
                    .or_insert_with(|| LinkProps {
                        anchor: edge.anchor.clone(),
                        kind: edge.kind,
                        self_link: edge.self_link,
                    });
            }
            GraphOp::Membership(edge) => {
                self.touch_article(&edge.article);
                self.touch_category(&edge.category);
                self.memberships
                    .entry((edge.article.clone(), edge.category.clone()))
                    .or_insert_with(|| edge.sort_key.clone());
            }
            GraphOp::Subcategory(edge) => {
                self.touch_category(&edge.child);
                self.touch_category(&edge.parent);
                self.subcategories
                    .entry((edge.child.clone(), edge.parent.clone()))
                    .or_insert_with(|| edge.sort_key.clone());
            }
            GraphOp::Redirect(edge) => {
                self.touch_article(&edge.source);
                self.touch_article(&edge.target);
                self.redirects
                    .insert((edge.source.clone(), edge.target.clone()));
            }
        }
    }

    pub fn counts(&self) -> GraphCounts {
        let placeholders = self.articles.values().filter(|a| a.id.is_none()).count() as u64;
        GraphCounts {
            articles: self.articles.len() as u64 - placeholders,
            placeholders,
            categories: self.categories.len() as u64,
            links: self.links.len() as u64,
            memberships: self.memberships.len() as u64,
            subcategories: self.subcategories.len() as u64,
            redirects: self.redirects.len() as u64,
        }
    }
}

/// Failures to inject, keyed on batch sequence number.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    transient: FxHashMap<u64, u32>,
    always_fail: FxHashSet<u64>,
    rejected: FxHashSet<u64>,
    ack_lost: FxHashSet<u64>,
    latency: FxHashMap<u64, Duration>,
    unreachable: bool,
}

impl FaultPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `attempts` commits of batch `seq` fail as unavailable.
    pub fn fail_transiently(mut self, seq: u64, attempts: u32) -> Self {
        self.transient.insert(seq, attempts);
        self
    }

    /// Every commit of batch `seq` fails as unavailable.
    pub fn fail_always(mut self, seq: u64) -> Self {
        self.always_fail.insert(seq);
        self
    }

    pub fn reject(mut self, seq: u64) -> Self {
        self.rejected.insert(seq);
        self
    }

    /// The first commit of batch `seq` is applied but reported as failed.
    pub fn lose_ack(mut self, seq: u64) -> Self {
        self.ack_lost.insert(seq);
        self
    }

    pub fn slow(mut self, seq: u64, delay: Duration) -> Self {
        self.latency.insert(seq, delay);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    graph: GraphSnapshot,
    attempts: FxHashMap<u64, u32>,
    applied: u64,
}

/// In-process graph store with the same merge semantics as [`super::Neo4jStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    faults: FaultPlan,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultPlan) -> Self {
        Self {
            state: Mutex::default(),
            faults,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        self.lock().graph.clone()
    }

    /// Commit attempts seen for batch `seq`, successful or not
    pub fn attempts(&self, seq: u64) -> u32 {
        self.lock().attempts.get(&seq).copied().unwrap_or(0)
    }

    /// Batches whose operations were applied
    pub fn applied_batches(&self) -> u64 {
        self.lock().applied
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn verify(&self) -> Result<(), StoreError> {
        if self.faults.unreachable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn commit(&self, batch: &Batch) -> Result<(), StoreError> {
        if let Some(delay) = self.faults.latency.get(&batch.seq) {
            tokio::time::sleep(*delay).await;
        }

        let mut state = self.lock();
        let attempt = {
            let counter = state.attempts.entry(batch.seq).or_insert(0);
            *counter += 1;
            *counter
        };

        if self.faults.unreachable {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        if self.faults.rejected.contains(&batch.seq) {
            return Err(StoreError::Rejected(format!(
                "batch {} violates a constraint",
                batch.seq
            )));
        }
        if self.faults.always_fail.contains(&batch.seq) {
            return Err(StoreError::Unavailable(format!(
                "batch {} attempt {attempt}: lock timeout",
                batch.seq
            )));
        }
        if self
            .faults
            .transient
            .get(&batch.seq)
            .is_some_and(|fails| attempt <= *fails)
        {
            return Err(StoreError::Unavailable(format!(
                "batch {} attempt {attempt}: connection reset",
                batch.seq
            )));
        }

        for op in &batch.ops {
            state.graph.apply(op);
        }
        state.applied += 1;

        if attempt == 1 && self.faults.ack_lost.contains(&batch.seq) {
            return Err(StoreError::Unavailable(format!(
                "batch {}: connection closed before acknowledgement",
                batch.seq
            )));
        }
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        Ok(self.lock().graph.counts())
    }
}
