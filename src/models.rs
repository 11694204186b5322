use crate::stats::StatsSnapshot;
use crate::title::{article_url, NS_CATEGORY, NS_MAIN};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageType {
    Article,
    Redirect,
    Category,
    /// A namespace outside the default scope that was explicitly requested
    Other(i32),
}

/// One complete dump record. `title` is already normalized.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: u32,
    pub title: String,
    pub namespace: i32,
    pub raw_body: String,
    pub is_redirect: bool,
    pub redirect_target: Option<String>,
    /// Byte offset of the record's `<page>` tag in the decompressed stream
    pub offset: u64,
    /// Byte offset just past the record's `</page>` tag
    pub end_offset: u64,
}

impl PageRecord {
    pub fn page_type(&self) -> PageType {
        match self.namespace {
            NS_CATEGORY => PageType::Category,
            _ if self.is_redirect => PageType::Redirect,
            NS_MAIN => PageType::Article,
            ns => PageType::Other(ns),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LinkKind {
    Internal,
    RedirectTraversal,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::Internal => "internal",
            LinkKind::RedirectTraversal => "redirect-traversal",
        }
    }
}

/// Upsert keyed on the normalized title. `id: None` with no attributes is a placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleNode {
    pub title: String,
    pub url: String,
    pub id: Option<u32>,
    pub namespace: Option<i32>,
    pub length: Option<u64>,
    pub is_redirect: bool,
}

impl ArticleNode {
    pub fn placeholder(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            url: article_url(&title),
            title,
            id: None,
            namespace: None,
            length: None,
            is_redirect: false,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none() && self.namespace.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryNode {
    pub name: String,
    /// Set only from a category-description record
    pub id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEdge {
    pub source: String,
    pub target: String,
    pub anchor: String,
    pub kind: LinkKind,
    pub self_link: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEdge {
    pub article: String,
    pub category: String,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcategoryEdge {
    pub child: String,
    pub parent: String,
    pub sort_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEdge {
    pub source: String,
    pub target: String,
}

/// A fully resolved write handed to the commit workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphOp {
    UpsertArticle(ArticleNode),
    UpsertCategory(CategoryNode),
    Link(LinkEdge),
    Membership(MembershipEdge),
    Subcategory(SubcategoryEdge),
    Redirect(RedirectEdge),
}

/// The slice of the dump a batch was built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRange {
    pub start_offset: u64,
    pub end_offset: u64,
    pub first_id: Option<u32>,
    pub last_id: Option<u32>,
    pub records: u64,
}

#[derive(Debug, Clone)]
pub struct Batch {
    pub seq: u64,
    pub ops: Vec<GraphOp>,
    pub range: RecordRange,
    /// Parse-side counters for the records in `range`, folded into the
    /// checkpoint once the batch is behind the commit watermark
    pub tally: StatsSnapshot,
}

/// A batch that exhausted its retries, kept for manual reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedRange {
    pub seq: u64,
    pub start_offset: u64,
    pub end_offset: u64,
    pub first_id: Option<u32>,
    pub last_id: Option<u32>,
    pub records: u64,
    pub attempts: u32,
    pub error: String,
}

impl FailedRange {
    pub fn new(seq: u64, range: &RecordRange, attempts: u32, error: String) -> Self {
        Self {
            seq,
            start_offset: range.start_offset,
            end_offset: range.end_offset,
            first_id: range.first_id,
            last_id: range.last_id,
            records: range.records,
            attempts,
            error,
        }
    }
}
