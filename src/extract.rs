//! Assembles reader events into [`PageRecord`]s, one in-flight record at a time.

use crate::models::PageRecord;
use crate::parser::{DumpEvent, FieldName};
use crate::title::{normalize_title, split_namespace};
use anyhow::Result;
use rustc_hash::FxHashSet;
use tracing::debug;

/// What the extractor produced for one record-sized slice of the dump.
#[derive(Debug, Clone)]
pub enum Extracted {
    Record(PageRecord),
    /// Outside the requested namespaces; not an error
    Skipped {
        id: Option<u32>,
        namespace: i32,
        end_offset: u64,
    },
    /// Well-formed XML missing a required field; counted and dropped
    Malformed {
        offset: u64,
        end_offset: u64,
        reason: String,
    },
    /// Record boundaries or XML structure were broken; scanning resumed at `end_offset`
    ParseError {
        offset: u64,
        end_offset: u64,
        message: String,
    },
}

impl Extracted {
    pub fn end_offset(&self) -> u64 {
        match self {
            Extracted::Record(record) => record.end_offset,
            Extracted::Skipped { end_offset, .. }
            | Extracted::Malformed { end_offset, .. }
            | Extracted::ParseError { end_offset, .. } => *end_offset,
        }
    }

    pub fn record_id(&self) -> Option<u32> {
        match self {
            Extracted::Record(record) => Some(record.id),
            Extracted::Skipped { id, .. } => *id,
            Extracted::Malformed { .. } | Extracted::ParseError { .. } => None,
        }
    }
}

#[derive(Debug, Default)]
struct PartialPage {
    offset: u64,
    title: Option<String>,
    namespace: Option<String>,
    id: Option<String>,
    text: Option<String>,
    redirect: Option<String>,
}

impl PartialPage {
    fn set(&mut self, name: FieldName, value: String) {
        let slot = match name {
            FieldName::Title => &mut self.title,
            FieldName::Namespace => &mut self.namespace,
            FieldName::Id => &mut self.id,
            FieldName::Text => &mut self.text,
            FieldName::RedirectTitle => &mut self.redirect,
        };
        // The reader only emits page-level fields, first one wins.
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

pub struct RecordExtractor<I> {
    events: I,
    namespaces: FxHashSet<i32>,
    current: Option<PartialPage>,
}

impl<I> RecordExtractor<I>
where
    I: Iterator<Item = Result<DumpEvent>>,
{
    pub fn new(events: I, namespaces: &[i32]) -> Self {
        Self {
            events,
            namespaces: namespaces.iter().copied().collect(),
            current: None,
        }
    }

    fn finish(&self, page: PartialPage, end_offset: u64) -> Extracted {
        let malformed = |reason: &str| Extracted::Malformed {
            offset: page.offset,
            end_offset,
            reason: reason.to_string(),
        };

        let Some(raw_title) = page.title.as_deref() else {
            return malformed("missing title");
        };
        let Some(raw_id) = page.id.as_deref() else {
            return malformed("missing id");
        };
        let Ok(id) = raw_id.trim().parse::<u32>() else {
            return malformed("unparsable id");
        };
        let title = normalize_title(raw_title);
        if title.is_empty() {
            return malformed("empty title");
        }

        let namespace = match page.namespace.as_deref().map(|ns| ns.trim().parse::<i32>()) {
            Some(Ok(ns)) => ns,
            Some(Err(_)) => return malformed("unparsable namespace"),
            None => split_namespace(&title).0,
        };

        if !self.namespaces.contains(&namespace) {
            return Extracted::Skipped {
                id: Some(id),
                namespace,
                end_offset,
            };
        }

        let redirect_target = page
            .redirect
            .as_deref()
            .map(normalize_title)
            .filter(|t| !t.is_empty());

        Extracted::Record(PageRecord {
            id,
            title,
            namespace,
            is_redirect: redirect_target.is_some(),
            redirect_target,
            raw_body: page.text.unwrap_or_default(),
            offset: page.offset,
            end_offset,
        })
    }
}

impl<I> Iterator for RecordExtractor<I>
where
    I: Iterator<Item = Result<DumpEvent>>,
{
    type Item = Result<Extracted>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let event = match self.events.next()? {
                Ok(event) => event,
                Err(e) => return Some(Err(e)),
            };

            match event {
                DumpEvent::RecordStart { offset } => {
                    if let Some(stale) = self.current.take() {
                        // The reader always closes a record before starting another.
                        debug!(offset = stale.offset, "Dropping record without end event");
                    }
                    self.current = Some(PartialPage {
                        offset,
                        ..Default::default()
                    });
                }
                DumpEvent::Field { name, value } => {
                    if let Some(page) = self.current.as_mut() {
                        page.set(name, value);
                    }
                }
                DumpEvent::RecordEnd { end_offset } => {
                    if let Some(page) = self.current.take() {
                        return Some(Ok(self.finish(page, end_offset)));
                    }
                }
                DumpEvent::ParseError {
                    offset,
                    next_offset,
                    message,
                } => {
                    self.current = None;
                    return Some(Ok(Extracted::ParseError {
                        offset,
                        end_offset: next_offset,
                        message,
                    }));
                }
            }
        }
    }
}
