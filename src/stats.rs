use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! import_counters {
    ($($field:ident => $add:ident),* $(,)?) => {
        /// Live counters shared between the parse stage, the commit workers and the progress display
        #[derive(Default, Debug)]
        pub struct ImportStats {
            $(pub $field: AtomicU64,)*
        }

        /// Plain copy of the counters, persisted in checkpoints and the run summary
        #[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq)]
        pub struct StatsSnapshot {
            $(pub $field: u64,)*
        }

        impl ImportStats {
            $(
                pub fn $add(&self, count: u64) {
                    self.$field.fetch_add(count, Ordering::Relaxed);
                }

                pub fn $field(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )*

            /// Create stats initialized from a checkpoint
            pub fn from_snapshot(snapshot: &StatsSnapshot) -> Self {
                Self {
                    $($field: AtomicU64::new(snapshot.$field),)*
                }
            }

            pub fn snapshot(&self) -> StatsSnapshot {
                StatsSnapshot {
                    $($field: self.$field(),)*
                }
            }

            pub fn absorb(&self, delta: &StatsSnapshot) {
                $(self.$add(delta.$field);)*
            }
        }

        impl StatsSnapshot {
            pub fn absorb(&mut self, delta: &StatsSnapshot) {
                $(self.$field += delta.$field;)*
            }
        }
    };
}

import_counters! {
    records_read => add_records_read,
    articles => add_articles,
    redirects => add_redirects,
    category_pages => add_category_pages,
    skipped => add_skipped,
    parse_errors => add_parse_errors,
    malformed => add_malformed,
    markup_anomalies => add_markup_anomalies,
    excluded_links => add_excluded_links,
    links => add_links,
    self_links => add_self_links,
    memberships => add_memberships,
    subcategory_links => add_subcategory_links,
    placeholders => add_placeholders,
    conflicts => add_conflicts,
    batches_committed => add_batches_committed,
    batches_failed => add_batches_failed,
    commit_retries => add_commit_retries,
    ops_committed => add_ops_committed,
}

impl ImportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-line status for the progress spinner
    pub fn progress_message(&self) -> String {
        format!(
            "{} records | {} links | {} memberships | {} batches | {} errors",
            self.records_read(),
            self.links(),
            self.memberships(),
            self.batches_committed(),
            self.parse_errors() + self.malformed() + self.batches_failed(),
        )
    }
}
