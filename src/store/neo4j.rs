use super::{GraphCounts, GraphStore, StoreError};
use crate::config::{StoreConfig, CONNECT_MAX_RETRIES, CONNECT_RETRY_DELAY_SECS};
use crate::models::{Batch, GraphOp};
use crate::title::article_url;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use neo4rs::{query, BoltMap, BoltNull, BoltType, Graph, Query};
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    "CREATE CONSTRAINT article_title_unique IF NOT EXISTS FOR (a:Article) REQUIRE a.title IS UNIQUE;",
    "CREATE CONSTRAINT article_id_unique IF NOT EXISTS FOR (a:Article) REQUIRE a.id IS UNIQUE;",
    "CREATE CONSTRAINT category_name_unique IF NOT EXISTS FOR (c:Category) REQUIRE c.name IS UNIQUE;",
    "CREATE INDEX article_namespace IF NOT EXISTS FOR (a:Article) ON (a.namespace);",
];

const CYPHER_PLACEHOLDERS: &str = r#"UNWIND $rows AS row
MERGE (a:Article {title: row.title})
ON CREATE SET a.url = row.url"#;

/// A record only fills a node that is unbound or already bound to the same id.
const CYPHER_ARTICLES: &str = r#"UNWIND $rows AS row
MERGE (a:Article {title: row.title})
WITH a, row WHERE a.id IS NULL OR a.id = row.id
SET a.url = row.url, a.id = row.id, a.namespace = row.namespace, a.length = row.length,
    a.redirect = row.redirect"#;

const CYPHER_CATEGORIES: &str = r#"UNWIND $rows AS row
MERGE (c:Category {name: row.name})
WITH c, row WHERE row.id IS NOT NULL AND c.id IS NULL
SET c.id = row.id"#;

const CYPHER_LINKS: &str = r#"UNWIND $rows AS row
MERGE (s:Article {title: row.source})
ON CREATE SET s.url = row.source_url
MERGE (t:Article {title: row.target})
ON CREATE SET t.url = row.target_url
MERGE (s)-[r:LINKS_TO]->(t)
ON CREATE SET r.anchor = row.anchor, r.kind = row.kind, r.self_link = row.self_link"#;

const CYPHER_MEMBERSHIPS: &str = r#"UNWIND $rows AS row
MERGE (a:Article {title: row.article})
ON CREATE SET a.url = row.article_url
MERGE (c:Category {name: row.category})
MERGE (a)-[r:IN_CATEGORY]->(c)
ON CREATE SET r.sort_key = row.sort_key"#;

const CYPHER_SUBCATEGORIES: &str = r#"UNWIND $rows AS row
MERGE (c:Category {name: row.child})
MERGE (p:Category {name: row.parent})
MERGE (c)-[r:SUBCATEGORY_OF]->(p)
ON CREATE SET r.sort_key = row.sort_key"#;

const CYPHER_REDIRECTS: &str = r#"UNWIND $rows AS row
MERGE (s:Article {title: row.source})
ON CREATE SET s.url = row.source_url
MERGE (t:Article {title: row.target})
ON CREATE SET t.url = row.target_url
MERGE (s)-[:REDIRECTS_TO]->(t)"#;

pub struct Neo4jStore {
    graph: Graph,
    uri: String,
}

impl Neo4jStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let graph = connect_with_retry(config).await?;
        Ok(Self {
            graph,
            uri: config.uri.clone(),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

async fn connect_with_retry(config: &StoreConfig) -> Result<Graph> {
    let max_retries = CONNECT_MAX_RETRIES;
    let delay = tokio::time::Duration::from_secs(CONNECT_RETRY_DELAY_SECS);

    for attempt in 1..=max_retries {
        match Graph::new(&config.uri, &config.user, &config.password) {
            Ok(graph) => match graph.run(query("RETURN 1;")).await {
                Ok(_) => return Ok(graph),
                Err(e) if attempt < max_retries => {
                    info!(attempt, "Connection test failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(e).context(format!(
                        "Cannot connect to Neo4j at {} after {max_retries} attempts",
                        config.uri
                    ));
                }
            },
            Err(e) if attempt < max_retries => {
                info!(attempt, error = %e, "Cannot connect to Neo4j at {}, retrying...", config.uri);
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(e).context(format!(
                    "Cannot connect to Neo4j at {} after {max_retries} attempts",
                    config.uri
                ));
            }
        }
    }

    bail!(
        "Cannot connect to Neo4j at {} after {max_retries} attempts",
        config.uri
    );
}

/// Neo4j client errors (constraint violations, bad syntax) fail the same way on every attempt.
fn classify(message: String) -> StoreError {
    if message.contains("Neo.ClientError") {
        StoreError::Rejected(message)
    } else {
        StoreError::Unavailable(message)
    }
}

fn store_error(e: neo4rs::Error) -> StoreError {
    classify(e.to_string())
}

fn row<const N: usize>(fields: [(&str, BoltType); N]) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in fields {
        map.put(key.into(), value);
    }
    BoltType::Map(map)
}

fn optional_int(value: Option<i64>) -> BoltType {
    value
        .map(BoltType::from)
        .unwrap_or(BoltType::Null(BoltNull))
}

/// Batch operations grouped into one `UNWIND` parameter list per query.
#[derive(Default)]
struct BatchRows {
    placeholders: Vec<BoltType>,
    articles: Vec<BoltType>,
    categories: Vec<BoltType>,
    links: Vec<BoltType>,
    memberships: Vec<BoltType>,
    subcategories: Vec<BoltType>,
    redirects: Vec<BoltType>,
}

impl BatchRows {
    fn from_ops(ops: &[GraphOp]) -> Self {
        let mut rows = Self::default();
        for op in ops {
            match op {
                GraphOp::UpsertArticle(node) if node.is_placeholder() => {
                    rows.placeholders.push(row([
                        ("title", BoltType::from(node.title.clone())),
                        ("url", BoltType::from(node.url.clone())),
                    ]));
                }
                GraphOp::UpsertArticle(node) => rows.articles.push(row([
                    ("title", BoltType::from(node.title.clone())),
                    ("url", BoltType::from(node.url.clone())),
                    ("id", optional_int(node.id.map(i64::from))),
                    ("namespace", optional_int(node.namespace.map(i64::from))),
                    ("length", optional_int(node.length.map(|l| l as i64))),
                    ("redirect", BoltType::from(node.is_redirect)),
                ])),
                GraphOp::UpsertCategory(node) => rows.categories.push(row([
                    ("name", BoltType::from(node.name.clone())),
                    ("id", optional_int(node.id.map(i64::from))),
                ])),
                GraphOp::Link(edge) => rows.links.push(row([
                    ("source", BoltType::from(edge.source.clone())),
                    ("source_url", BoltType::from(article_url(&edge.source))),
                    ("target", BoltType::from(edge.target.clone())),
                    ("target_url", BoltType::from(article_url(&edge.target))),
                    ("anchor", BoltType::from(edge.anchor.clone())),
                    ("kind", BoltType::from(edge.kind.as_str())),
                    ("self_link", BoltType::from(edge.self_link)),
                ])),
                GraphOp::Membership(edge) => rows.memberships.push(row([
                    ("article", BoltType::from(edge.article.clone())),
                    ("article_url", BoltType::from(article_url(&edge.article))),
                    ("category", BoltType::from(edge.category.clone())),
                    ("sort_key", BoltType::from(edge.sort_key.clone())),
                ])),
                GraphOp::Subcategory(edge) => rows.subcategories.push(row([
                    ("child", BoltType::from(edge.child.clone())),
                    ("parent", BoltType::from(edge.parent.clone())),
                    ("sort_key", BoltType::from(edge.sort_key.clone())),
                ])),
                GraphOp::Redirect(edge) => rows.redirects.push(row([
                    ("source", BoltType::from(edge.source.clone())),
                    ("source_url", BoltType::from(article_url(&edge.source))),
                    ("target", BoltType::from(edge.target.clone())),
                    ("target_url", BoltType::from(article_url(&edge.target))),
                ])),
            }
        }
        rows
    }

    /// Nodes before relationships; empty groups produce no query.
    fn into_queries(self) -> Vec<Query> {
        [
            (CYPHER_PLACEHOLDERS, self.placeholders),
            (CYPHER_ARTICLES, self.articles),
            (CYPHER_CATEGORIES, self.categories),
            (CYPHER_LINKS, self.links),
            (CYPHER_MEMBERSHIPS, self.memberships),
            (CYPHER_SUBCATEGORIES, self.subcategories),
            (CYPHER_REDIRECTS, self.redirects),
        ]
        .into_iter()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(cypher, rows)| query(cypher).param("rows", rows))
        .collect()
    }
}

async fn run_cypher(graph: &Graph, cypher: &str) -> Result<()> {
    graph
        .run(query(cypher))
        .await
        .with_context(|| format!("Failed to execute: {cypher}"))?;
    Ok(())
}

async fn query_count(graph: &Graph, cypher: &str) -> Result<u64> {
    let mut result = graph
        .execute(query(cypher))
        .await
        .with_context(|| format!("Failed to execute count query: {cypher}"))?;

    if let Some(row) = result.next().await? {
        let count: i64 = row.get("cnt").context("Missing 'cnt' field in result")?;
        Ok(count.max(0) as u64)
    } else {
        Ok(0)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn verify(&self) -> Result<(), StoreError> {
        self.graph
            .run(query("RETURN 1;"))
            .await
            .map_err(store_error)?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            run_cypher(&self.graph, statement).await?;
        }
        info!("Constraints and indexes in place");
        Ok(())
    }

    async fn commit(&self, batch: &Batch) -> Result<(), StoreError> {
        let queries = BatchRows::from_ops(&batch.ops).into_queries();
        if queries.is_empty() {
            return Ok(());
        }

        let mut txn = self.graph.start_txn().await.map_err(store_error)?;
        if let Err(e) = txn.run_queries(queries).await {
            if let Err(rollback) = txn.rollback().await {
                debug!(seq = batch.seq, error = %rollback, "Rollback failed");
            }
            return Err(store_error(e));
        }
        txn.commit().await.map_err(store_error)?;
        Ok(())
    }

    async fn counts(&self) -> Result<GraphCounts> {
        let g = &self.graph;
        Ok(GraphCounts {
            articles: query_count(
                g,
                "MATCH (a:Article) WHERE a.id IS NOT NULL RETURN count(a) AS cnt",
            )
            .await?,
            placeholders: query_count(
                g,
                "MATCH (a:Article) WHERE a.id IS NULL RETURN count(a) AS cnt",
            )
            .await?,
            categories: query_count(g, "MATCH (c:Category) RETURN count(c) AS cnt").await?,
            links: query_count(g, "MATCH ()-[r:LINKS_TO]->() RETURN count(r) AS cnt").await?,
            memberships: query_count(g, "MATCH ()-[r:IN_CATEGORY]->() RETURN count(r) AS cnt")
                .await?,
            subcategories: query_count(
                g,
                "MATCH ()-[r:SUBCATEGORY_OF]->() RETURN count(r) AS cnt",
            )
            .await?,
            redirects: query_count(g, "MATCH ()-[r:REDIRECTS_TO]->() RETURN count(r) AS cnt")
                .await?,
        })
    }
}
