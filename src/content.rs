use crate::config::MAX_LINK_SPAN;
use crate::models::PageRecord;
use crate::title::{
    category_name, is_interwiki, normalize_title, split_namespace, NS_CATEGORY, NS_FILE, NS_MAIN,
};
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashSet;
use std::borrow::Cow;
use tracing::debug;

static REDIRECT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*#REDIRECT\s*:?\s*\[\[\s*:?([^\]\[|#\n]+)(?:#[^\]\[|\n]*)?(?:\|[^\]\n]*)?\]\]")
        .unwrap()
});

/// Unterminated comments run to the end of the body.
static COMMENT_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?(?:-->|$)").unwrap());

static NOWIKI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<nowiki\s*>.*?</nowiki\s*>|<nowiki\s*/>").unwrap());

const NS_MEDIA: i32 = -2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOccurrence {
    pub target: String,
    pub anchor: String,
    pub is_self: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMembership {
    pub name: String,
    pub sort_key: String,
}

/// Everything the analyzer pulls out of one page body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMarkup {
    pub redirect: Option<String>,
    pub links: Vec<LinkOccurrence>,
    pub categories: Vec<CategoryMembership>,
    /// Malformed `[[...]]` constructs that were dropped
    pub anomalies: u32,
    /// Links into non-article namespaces or other wikis
    pub excluded: u32,
}

impl PageMarkup {
    fn redirect_to(target: String) -> Self {
        Self {
            redirect: Some(target),
            ..Default::default()
        }
    }
}

/// Analyzes a record, letting the dump's own redirect marker override the body.
///
/// A `#REDIRECT` found only in the body marks the record as a redirect too.
pub fn analyze_record(record: &mut PageRecord) -> PageMarkup {
    let markup = match &record.redirect_target {
        Some(target) => PageMarkup::redirect_to(target.clone()),
        None => analyze(&record.title, &record.raw_body),
    };
    if record.redirect_target.is_none() {
        record.redirect_target = markup.redirect.clone();
    }
    record.is_redirect = markup.redirect.is_some();
    markup
}

/// Extracts the redirect target, links and category memberships from `body`.
///
/// `title` is the (normalized) title of the page being analyzed; it marks
/// self-links and is the default category sort key.
pub fn analyze(title: &str, body: &str) -> PageMarkup {
    if let Some(target) = redirect_target(body) {
        return PageMarkup::redirect_to(target);
    }

    let text = strip_ignored(body);
    let mut scan = Scan::new(title);
    scan.run(&text);
    scan.markup
}

pub fn redirect_target(body: &str) -> Option<String> {
    let caps = REDIRECT_REGEX.captures(body)?;
    let target = normalize_title(&caps[1]);
    (!target.is_empty()).then_some(target)
}

fn strip_ignored(body: &str) -> Cow<'_, str> {
    match COMMENT_REGEX.replace_all(body, "") {
        Cow::Borrowed(b) => NOWIKI_REGEX.replace_all(b, ""),
        Cow::Owned(o) => Cow::Owned(NOWIKI_REGEX.replace_all(&o, "").into_owned()),
    }
}

/// Index of the `]]` that closes a construct whose contents start at `from`,
/// honoring nested `[[...]]` pairs.
fn find_close(bytes: &[u8], from: usize) -> Option<usize> {
    let limit = bytes.len().min(from.saturating_add(MAX_LINK_SPAN));
    let mut depth = 1u32;
    let mut i = from;
    while i < limit && i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'[', b'[') => {
                depth += 1;
                i += 2;
            }
            (b']', b']') => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
                i += 2;
            }
            _ => i += 1,
        }
    }
    None
}

fn has_invalid_title_chars(target: &str) -> bool {
    target
        .bytes()
        .any(|b| matches!(b, b'\n' | b'\r' | b'<' | b'>' | b'[' | b']' | b'{' | b'}'))
}

enum Step {
    /// Continue after the closing `]]`
    Past,
    /// Continue from this byte offset inside the construct
    Inside(usize),
}

struct Scan<'t> {
    title: &'t str,
    markup: PageMarkup,
    seen_links: FxHashSet<String>,
    seen_categories: FxHashSet<String>,
}

impl<'t> Scan<'t> {
    fn new(title: &'t str) -> Self {
        Self {
            title,
            markup: PageMarkup::default(),
            seen_links: FxHashSet::default(),
            seen_categories: FxHashSet::default(),
        }
    }

    fn run(&mut self, text: &str) {
        let bytes = text.as_bytes();
        let mut pos = 0;

        while let Some(rel) = memmem::find(&bytes[pos..], b"[[") {
            let inner_start = pos + rel + 2;
            let Some(close) = find_close(bytes, inner_start) else {
                debug!(title = self.title, offset = inner_start, "Unterminated link");
                self.markup.anomalies += 1;
                pos = inner_start;
                continue;
            };

            pos = match self.construct(&text[inner_start..close], inner_start) {
                Step::Past => close + 2,
                Step::Inside(at) => at,
            };
        }
    }

    fn construct(&mut self, inner: &str, inner_start: usize) -> Step {
        let (raw_target, rest) = match inner.find('|') {
            Some(bar) => (&inner[..bar], Some((bar, &inner[bar + 1..]))),
            None => (inner, None),
        };

        if has_invalid_title_chars(raw_target) {
            debug!(title = self.title, target = raw_target, "Invalid link target");
            self.markup.anomalies += 1;
            return Step::Inside(inner_start);
        }

        let trimmed = raw_target.trim();
        let leading_colon = trimmed.starts_with(':');
        let target = trimmed.trim_start_matches(':').trim_start();

        let (namespace, _) = split_namespace(target);
        if namespace == NS_MAIN && is_interwiki(target) {
            self.markup.excluded += 1;
            return Step::Past;
        }

        match namespace {
            NS_CATEGORY if !leading_colon => {
                let sort_key = rest.map(|(_, key)| key.trim()).unwrap_or("");
                self.membership(target, sort_key);
                Step::Past
            }
            NS_FILE | NS_MEDIA if !leading_colon => {
                self.markup.excluded += 1;
                // Captions can carry ordinary links.
                match rest {
                    Some((bar, _)) => Step::Inside(inner_start + bar + 1),
                    None => Step::Past,
                }
            }
            NS_MAIN => {
                let anchor = rest.map(|(_, a)| a.trim()).unwrap_or("");
                self.link(target, anchor);
                Step::Past
            }
            _ => {
                self.markup.excluded += 1;
                Step::Past
            }
        }
    }

    fn link(&mut self, target: &str, anchor: &str) {
        let page = normalize_title(target.split('#').next().unwrap_or(""));
        let resolved = if !page.is_empty() {
            page
        } else if target.contains('#') {
            self.title.to_string()
        } else {
            self.markup.anomalies += 1;
            return;
        };

        if !self.seen_links.insert(resolved.clone()) {
            return;
        }

        let anchor = if anchor.is_empty() {
            resolved.clone()
        } else {
            anchor.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        self.markup.links.push(LinkOccurrence {
            is_self: resolved == self.title,
            target: resolved,
            anchor,
        });
    }

    fn membership(&mut self, target: &str, sort_key: &str) {
        let name = category_name(target);
        if name.is_empty() {
            self.markup.anomalies += 1;
            return;
        }
        if !self.seen_categories.insert(name.clone()) {
            return;
        }
        let sort_key = if sort_key.is_empty() {
            self.title.to_string()
        } else {
            sort_key.to_string()
        };
        self.markup
            .categories
            .push(CategoryMembership { name, sort_key });
    }
}
