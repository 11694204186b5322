use crate::content::PageMarkup;
use crate::models::{
    ArticleNode, CategoryNode, GraphOp, LinkEdge, LinkKind, MembershipEdge, PageRecord, PageType,
    RedirectEdge, SubcategoryEdge,
};
use crate::stats::StatsSnapshot;
use crate::title::{article_url, category_name, is_article_title};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TitleState {
    /// `None` while the title is only known from references
    id: Option<u32>,
    redirect: bool,
}

/// Normalized-title registry owned by the sequential resolution stage.
///
/// Every title that has been written to the graph in this run is present,
/// either bound to its record id or as a placeholder. A title is upserted as
/// a placeholder the first time it is referenced and upserted again with its
/// attributes when its own record arrives; the store merges both on the title
/// key, so the edges never wait for their endpoints.
#[derive(Debug, Default)]
pub struct TitleIndex {
    titles: FxHashMap<String, TitleState>,
    categories: FxHashMap<String, Option<u32>>,
}

impl TitleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }

    pub fn is_placeholder(&self, title: &str) -> bool {
        self.titles.get(title).is_some_and(|s| s.id.is_none())
    }

    pub fn id_of(&self, title: &str) -> Option<u32> {
        self.titles.get(title).and_then(|s| s.id)
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Turns one analyzed record into graph operations, appended to `ops`.
    pub fn resolve(
        &mut self,
        record: &PageRecord,
        markup: &PageMarkup,
        ops: &mut Vec<GraphOp>,
        tally: &mut StatsSnapshot,
    ) {
        tally.markup_anomalies += u64::from(markup.anomalies);
        tally.excluded_links += u64::from(markup.excluded);

        match record.page_type() {
            PageType::Category => self.resolve_category_page(record, markup, ops, tally),
            _ => self.resolve_article(record, markup, ops, tally),
        }
    }

    fn resolve_article(
        &mut self,
        record: &PageRecord,
        markup: &PageMarkup,
        ops: &mut Vec<GraphOp>,
        tally: &mut StatsSnapshot,
    ) {
        let title = record.title.as_str();
        let is_redirect = record.is_redirect || markup.redirect.is_some();

        match self.titles.get(title) {
            Some(TitleState {
                id: Some(existing), ..
            }) if *existing != record.id => {
                // First-seen record keeps the title; this one's edges attach to it.
                warn!(
                    title = title,
                    kept_id = existing,
                    dropped_id = record.id,
                    "Title collision after normalization"
                );
                tally.conflicts += 1;
            }
            _ => {
                self.titles.insert(
                    title.to_string(),
                    TitleState {
                        id: Some(record.id),
                        redirect: is_redirect,
                    },
                );
                ops.push(GraphOp::UpsertArticle(ArticleNode {
                    title: title.to_string(),
                    url: article_url(title),
                    id: Some(record.id),
                    namespace: Some(record.namespace),
                    length: Some(record.raw_body.len() as u64),
                    is_redirect,
                }));
                if is_redirect {
                    tally.redirects += 1;
                } else {
                    tally.articles += 1;
                }
            }
        }

        if let Some(target) = &markup.redirect {
            if target == title {
                debug!(title = title, "Ignoring self-redirect");
                tally.markup_anomalies += 1;
            } else if !is_article_title(target) {
                // Category, project and interwiki targets are not Article nodes.
                debug!(
                    title = title,
                    target = target.as_str(),
                    "Redirect leaves the article namespace"
                );
                tally.excluded_links += 1;
            } else {
                self.ensure_article(target, ops, tally);
                ops.push(GraphOp::Redirect(RedirectEdge {
                    source: title.to_string(),
                    target: target.clone(),
                }));
            }
            return;
        }

        for link in &markup.links {
            self.ensure_article(&link.target, ops, tally);
            let kind = match self.titles.get(&link.target) {
                Some(state) if state.redirect => LinkKind::RedirectTraversal,
                _ => LinkKind::Internal,
            };
            ops.push(GraphOp::Link(LinkEdge {
                source: title.to_string(),
                target: link.target.clone(),
                anchor: link.anchor.clone(),
                kind,
                self_link: link.is_self,
            }));
            tally.links += 1;
            if link.is_self {
                tally.self_links += 1;
            }
        }

        for membership in &markup.categories {
            self.ensure_category(&membership.name, ops);
            ops.push(GraphOp::Membership(MembershipEdge {
                article: title.to_string(),
                category: membership.name.clone(),
                sort_key: membership.sort_key.clone(),
            }));
            tally.memberships += 1;
        }
    }

    fn resolve_category_page(
        &mut self,
        record: &PageRecord,
        markup: &PageMarkup,
        ops: &mut Vec<GraphOp>,
        tally: &mut StatsSnapshot,
    ) {
        let name = category_name(&record.title);

        match self.categories.get(&name) {
            Some(Some(existing)) if *existing != record.id => {
                warn!(
                    category = name.as_str(),
                    kept_id = existing,
                    dropped_id = record.id,
                    "Category name collision after normalization"
                );
                tally.conflicts += 1;
            }
            _ => {
                self.categories.insert(name.clone(), Some(record.id));
                ops.push(GraphOp::UpsertCategory(CategoryNode {
                    name: name.clone(),
                    id: Some(record.id),
                }));
                tally.category_pages += 1;
            }
        }

        for parent in &markup.categories {
            if parent.name == name {
                debug!(category = name.as_str(), "Ignoring category in itself");
                continue;
            }
            self.ensure_category(&parent.name, ops);
            ops.push(GraphOp::Subcategory(SubcategoryEdge {
                child: name.clone(),
                parent: parent.name.clone(),
                sort_key: parent.sort_key.clone(),
            }));
            tally.subcategory_links += 1;
        }
    }

    fn ensure_article(&mut self, title: &str, ops: &mut Vec<GraphOp>, tally: &mut StatsSnapshot) {
        if self.titles.contains_key(title) {
            return;
        }
        self.titles.insert(
            title.to_string(),
            TitleState {
                id: None,
                redirect: false,
            },
        );
        ops.push(GraphOp::UpsertArticle(ArticleNode::placeholder(title)));
        tally.placeholders += 1;
    }

    fn ensure_category(&mut self, name: &str, ops: &mut Vec<GraphOp>) {
        if self.categories.contains_key(name) {
            return;
        }
        self.categories.insert(name.to_string(), None);
        ops.push(GraphOp::UpsertCategory(CategoryNode {
            name: name.to_string(),
            id: None,
        }));
    }
}
