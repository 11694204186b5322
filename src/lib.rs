//! Theseus: streaming, resumable Wikipedia dump to Neo4j graph importer
//!
//! A single pass over a pages-articles dump turns every article, redirect and
//! category page into nodes and edges of a page graph:
//!
//! 1. **Read** -- Stream `<page>` records out of plain or BZ2-compressed XML,
//!    tracking decompressed byte offsets so a run can restart mid-dump
//! 2. **Extract** -- Assemble typed page records, filtering namespaces and
//!    dropping malformed records
//! 3. **Analyze** -- Scan wiki markup for links, category memberships and
//!    redirect directives (in parallel windows)
//! 4. **Resolve** -- Normalize titles, bind them to record ids and emit
//!    idempotent upserts, creating placeholders for forward references
//! 5. **Commit** -- Cut the operation stream into batches and commit them
//!    concurrently with bounded retries
//! 6. **Checkpoint** -- Persist the contiguous committed offset so an
//!    interrupted import resumes without gaps or duplicates
//!
//! # Architecture
//!
//! - **Streaming XML parsing** -- Never loads the dump into memory; records are
//!   framed with `memchr` and parsed individually with `quick-xml`
//! - **Idempotent writes** -- Every operation is a MERGE keyed on title or name,
//!   so replaying a batch after a lost acknowledgement changes nothing
//! - **Bounded pipeline** -- A blocking parse thread feeds a bounded queue;
//!   at most `workers` commits are in flight
//! - **Contiguous watermark** -- Batches finish out of order; the checkpoint only
//!   moves past a batch once every earlier batch is done
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming dump reader with BZ2 decompression and offsets
//! - [`extract`] -- Record assembly and namespace filtering
//! - [`content`] -- Link, category and redirect markup analysis
//! - [`title`] -- Title normalization and namespace prefixes
//! - [`index`] -- Title resolution into graph operations
//! - [`commit`] -- Batching and the concurrent commit dispatcher
//! - [`retry`] -- Commit retry state machine
//! - [`checkpoint`] -- Commit watermark and checkpoint persistence
//! - [`store`] -- Graph store trait, Neo4j and in-memory stores
//! - [`import`] -- Pipeline orchestration
//! - [`summary`] -- Run summary and reports
//! - [`stats`] -- Thread-safe atomic counters
//! - [`models`] -- Core data types (PageRecord, GraphOp, Batch)
//! - [`config`] -- Defaults and store credentials
//!
//! # Example Usage
//!
//! ```bash
//! # Import, resuming from the last checkpoint if there is one
//! theseus import -i enwiki-latest-pages-articles.xml.bz2 -v
//!
//! # Start over with bigger batches
//! theseus import -i enwiki-latest-pages-articles.xml.bz2 --fresh --batch-size 2000
//!
//! # Parse the first 10k records into memory only
//! theseus import -i enwiki-latest-pages-articles.xml.bz2 --dry-run --limit 10000
//!
//! # Inspect the saved checkpoint
//! theseus status -i enwiki-latest-pages-articles.xml.bz2
//! ```

pub mod checkpoint;
pub mod commit;
pub mod config;
pub mod content;
pub mod extract;
pub mod import;
pub mod index;
pub mod models;
pub mod parser;
pub mod retry;
pub mod stats;
pub mod store;
pub mod summary;
pub mod title;
