//! End-to-end tests for the Theseus import pipeline.
//!
//! Every test writes a small dump to a temp directory and drives
//! [`run_import`] against a [`MemoryStore`], then asserts on the resulting
//! graph snapshot, the run summary and the files in the state directory.
//!
//! - **Reader Tests** -- plain, BZ2 and multistream BZ2 input, offsets, broken records
//! - **Graph Tests** -- links, memberships, redirects, placeholders, categories
//! - **Idempotence Tests** -- reruns and lost acknowledgements
//! - **Resume Tests** -- `--limit` then resume, interrupt then resume, checkpoint lifecycle
//! - **Failure Tests** -- failed batches, rejected batches, unreachable store
//!
//! # Sample Data
//!
//! `sample_xml()` holds six records: "Example" links forward to "Graph Theory"
//! and to the never-defined "Dangling Page"; "Social" redirects to "Social
//! Network"; "Category:Mathematics" sits under "Category:Science"; one record
//! lives in the Template namespace and is skipped.

use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use theseus::checkpoint;
use theseus::extract::{Extracted, RecordExtractor};
use theseus::import::{run_import, ImportConfig};
use theseus::models::LinkKind;
use theseus::parser::WikiReader;
use theseus::retry::RetryPolicy;
use theseus::store::{FaultPlan, GraphStore, MemoryStore};
use theseus::summary::{ImportSummary, FAILED_BATCHES_FILE, SUMMARY_FILE};
use tokio::sync::watch;

fn page(title: &str, ns: i32, id: u32, text: &str) -> String {
    format!(
        "  <page>\n    <title>{title}</title>\n    <ns>{ns}</ns>\n    <id>{id}</id>\n    <revision>\n      <id>{}</id>\n      <text xml:space=\"preserve\">{text}</text>\n    </revision>\n  </page>\n",
        id + 1000
    )
}

fn redirect_page(title: &str, id: u32, target: &str) -> String {
    format!(
        "  <page>\n    <title>{title}</title>\n    <ns>0</ns>\n    <id>{id}</id>\n    <redirect title=\"{target}\" />\n    <revision>\n      <id>{}</id>\n      <text>#REDIRECT [[{target}]]</text>\n    </revision>\n  </page>\n",
        id + 1000
    )
}

const DUMP_HEADER: &str =
    "<mediawiki xml:lang=\"en\">\n  <siteinfo>\n    <sitename>Wikipedia</sitename>\n  </siteinfo>\n";
const DUMP_FOOTER: &str = "</mediawiki>\n";

fn dump(pages: &[String]) -> String {
    let mut xml = String::from(DUMP_HEADER);
    for p in pages {
        xml.push_str(p);
    }
    xml.push_str(DUMP_FOOTER);
    xml
}

fn sample_xml() -> String {
    dump(&sample_pages())
}

fn sample_pages() -> Vec<String> {
    vec![
        page(
            "Example",
            0,
            1,
            "See [[Graph Theory|graphs]] and [[Dangling Page]] and [[Category:Mathematics]]",
        ),
        redirect_page("Social", 2, "Social Network"),
        page("Graph Theory", 0, 3, "Study of [[Example]] and [[Social]]."),
        page(
            "Category:Mathematics",
            14,
            4,
            "Maths. [[Category:Science|Mathematics]]",
        ),
        page("Template:Infobox", 10, 5, "{{{name}}}"),
        page("Social Network", 0, 6, "Links [[Graph Theory]]. [[Category:Science]]"),
    ]
}

/// Numbered articles linking forward and back, spread over three categories.
fn chain_xml(n: u32) -> String {
    let pages: Vec<String> = (1..=n)
        .map(|i| {
            page(
                &format!("Page {i}"),
                0,
                i,
                &format!(
                    "[[Page {}]] [[Page {}|later]] [[Page {}]] [[Category:Group {}]]",
                    i + 1,
                    i + 7,
                    i.saturating_sub(3).max(1),
                    i % 3
                ),
            )
        })
        .collect();
    dump(&pages)
}

fn write_plain(dir: &TempDir, xml: &str) -> String {
    let path = dir.path().join("dump.xml");
    fs::write(&path, xml).unwrap();
    path.to_str().unwrap().to_string()
}

fn write_bz2(dir: &TempDir, xml: &str) -> String {
    let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(xml.as_bytes()).unwrap();
    let path = dir.path().join("dump.xml.bz2");
    fs::write(&path, encoder.finish().unwrap()).unwrap();
    path.to_str().unwrap().to_string()
}

/// Header, every two records and the footer each get their own bz2 stream,
/// the way multistream dumps are laid out.
fn write_multistream_bz2(dir: &TempDir, pages: &[String]) -> String {
    let mut chunks = vec![DUMP_HEADER.to_string()];
    chunks.extend(pages.chunks(2).map(|group| group.concat()));
    chunks.push(DUMP_FOOTER.to_string());

    let mut bytes = Vec::new();
    for chunk in chunks {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(chunk.as_bytes()).unwrap();
        bytes.extend(encoder.finish().unwrap());
    }
    let path = dir.path().join("dump-multistream.xml.bz2");
    fs::write(&path, bytes).unwrap();
    path.to_str().unwrap().to_string()
}

fn state_dir(dir: &TempDir) -> PathBuf {
    dir.path().join("state")
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn config(input: &str, state: &Path, batch_size: usize) -> ImportConfig {
    let mut config = ImportConfig::new(input, state);
    config.batch_size = batch_size;
    config.workers = 2;
    config.queue_depth = 2;
    config.policy = fast_policy(3);
    config
}

async fn import<S: GraphStore + 'static>(config: ImportConfig, store: &Arc<S>) -> ImportSummary {
    let (_stop, shutdown) = watch::channel(false);
    run_import(config, store.clone(), shutdown).await.unwrap()
}

fn link_keys(store: &MemoryStore) -> BTreeSet<(String, String)> {
    store.snapshot().links.keys().cloned().collect()
}

// ============================================================================
// Reader Tests
// ============================================================================

#[test]
fn reader_extracts_records_and_skips_other_namespaces() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());

    let reader = WikiReader::open(&input, 0).unwrap();
    let items: Vec<Extracted> = RecordExtractor::new(reader, &[0, 14])
        .collect::<anyhow::Result<_>>()
        .unwrap();

    assert_eq!(items.len(), 6);
    let titles: Vec<&str> = items
        .iter()
        .filter_map(|item| match item {
            Extracted::Record(r) => Some(r.title.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        titles,
        vec![
            "Example",
            "Social",
            "Graph Theory",
            "Category:Mathematics",
            "Social Network"
        ]
    );
    assert!(matches!(
        items[4],
        Extracted::Skipped {
            id: Some(5),
            namespace: 10,
            ..
        }
    ));
}

#[test]
fn reader_offsets_restart_mid_dump() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());

    let first: Vec<Extracted> = RecordExtractor::new(WikiReader::open(&input, 0).unwrap(), &[0, 14])
        .collect::<anyhow::Result<_>>()
        .unwrap();
    let resume_at = first[2].end_offset();

    let rest: Vec<Extracted> =
        RecordExtractor::new(WikiReader::open(&input, resume_at).unwrap(), &[0, 14])
            .collect::<anyhow::Result<_>>()
            .unwrap();
    assert_eq!(rest.len(), 3);
    assert_eq!(rest[0].record_id(), Some(4));
}

#[tokio::test]
async fn bz2_dump_imports_like_plain() {
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, &sample_xml());
    let compressed = write_bz2(&dir, &sample_xml());

    let plain_store = Arc::new(MemoryStore::new());
    let mut plain_config = config(&plain, &dir.path().join("plain"), 2);
    plain_config.persist = false;
    import(plain_config, &plain_store).await;

    let bz2_store = Arc::new(MemoryStore::new());
    let mut bz2_config = config(&compressed, &dir.path().join("bz2"), 2);
    bz2_config.persist = false;
    let summary = import(bz2_config, &bz2_store).await;

    assert!(summary.is_complete());
    assert_eq!(plain_store.snapshot(), bz2_store.snapshot());
}

#[test]
fn multistream_bz2_reads_every_stream() {
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, &sample_xml());
    let multi = write_multistream_bz2(&dir, &sample_pages());

    let expected: Vec<Extracted> = RecordExtractor::new(WikiReader::open(&plain, 0).unwrap(), &[0, 14])
        .collect::<anyhow::Result<_>>()
        .unwrap();
    let items: Vec<Extracted> = RecordExtractor::new(WikiReader::open(&multi, 0).unwrap(), &[0, 14])
        .collect::<anyhow::Result<_>>()
        .unwrap();

    assert_eq!(items.len(), 6);
    assert_eq!(items[5].record_id(), Some(6));
    let end_offsets = |xs: &Vec<Extracted>| xs.iter().map(|x| x.end_offset()).collect::<Vec<_>>();
    assert_eq!(end_offsets(&items), end_offsets(&expected));
}

#[test]
fn bz2_reader_restarts_mid_dump() {
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, &sample_xml());
    let single = write_bz2(&dir, &sample_xml());
    let multi = write_multistream_bz2(&dir, &sample_pages());

    let first: Vec<Extracted> = RecordExtractor::new(WikiReader::open(&plain, 0).unwrap(), &[0, 14])
        .collect::<anyhow::Result<_>>()
        .unwrap();
    let resume_at = first[2].end_offset();
    assert!(resume_at > 0);

    for input in [&single, &multi] {
        let rest: Vec<Extracted> =
            RecordExtractor::new(WikiReader::open(input, resume_at).unwrap(), &[0, 14])
                .collect::<anyhow::Result<_>>()
                .unwrap();
        let ids: Vec<_> = rest.iter().map(|x| x.record_id()).collect();
        assert_eq!(ids, vec![Some(4), Some(5), Some(6)], "{input}");
        assert_eq!(rest[0].end_offset(), first[3].end_offset());
    }
}

#[tokio::test]
async fn multistream_bz2_imports_like_plain() {
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, &sample_xml());
    let multi = write_multistream_bz2(&dir, &sample_pages());

    let plain_store = Arc::new(MemoryStore::new());
    let expected = import(config(&plain, &dir.path().join("plain"), 2), &plain_store).await;

    let multi_store = Arc::new(MemoryStore::new());
    let summary = import(config(&multi, &dir.path().join("multi"), 2), &multi_store).await;

    assert!(summary.reached_end);
    assert!(summary.is_complete());
    assert_eq!(summary.stats.records_read, 6);
    assert_eq!(summary.committed_offset, expected.committed_offset);
    assert_eq!(plain_store.snapshot(), multi_store.snapshot());
}

#[tokio::test]
async fn broken_record_is_counted_and_skipped() {
    let dir = TempDir::new().unwrap();
    let xml = dump(&[
        page("Alpha", 0, 1, "[[Beta]]"),
        "  <page>\n    <title>Broken</title>\n    <id>2</id>\n".to_string(),
        page("Beta", 0, 3, "[[Alpha]]"),
    ]);
    let input = write_plain(&dir, &xml);
    let store = Arc::new(MemoryStore::new());

    let summary = import(config(&input, &state_dir(&dir), 10), &store).await;

    assert_eq!(summary.stats.parse_errors, 1);
    assert_eq!(summary.stats.articles, 2);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.articles["Beta"].id, Some(3));
    assert!(!snapshot.articles.contains_key("Broken"));
}

// ============================================================================
// Graph Tests
// ============================================================================

#[tokio::test]
async fn sample_dump_builds_expected_graph() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::new());

    let summary = import(config(&input, &state_dir(&dir), 2), &store).await;
    let graph = store.snapshot();

    assert!(summary.is_complete());
    assert!(!summary.has_failures());
    assert_eq!(summary.stats.records_read, 6);
    assert_eq!(summary.stats.skipped, 1);
    assert_eq!(summary.stats.redirects, 1);
    assert_eq!(summary.stats.category_pages, 1);

    let example_link = &graph.links[&("Example".to_string(), "Graph Theory".to_string())];
    assert_eq!(example_link.anchor, "graphs");
    assert_eq!(example_link.kind, LinkKind::Internal);
    assert_eq!(
        graph.memberships[&("Example".to_string(), "Mathematics".to_string())],
        "Example"
    );
    assert!(graph
        .redirects
        .contains(&("Social".to_string(), "Social Network".to_string())));
    assert!(graph.articles["Social"].is_redirect);

    assert_eq!(
        graph.articles["Graph Theory"].url,
        "https://en.wikipedia.org/wiki/Graph_Theory"
    );
    assert_eq!(
        graph.articles["Dangling Page"].url,
        "https://en.wikipedia.org/wiki/Dangling_Page"
    );
    assert!(graph.articles.values().all(|a| !a.url.contains(' ')));

    // "Social" was already known as a redirect when "Graph Theory" linked to it
    let via_redirect = &graph.links[&("Graph Theory".to_string(), "Social".to_string())];
    assert_eq!(via_redirect.kind, LinkKind::RedirectTraversal);

    assert_eq!(graph.categories["Mathematics"], Some(4));
    assert_eq!(graph.categories["Science"], None);
    assert_eq!(
        graph.subcategories[&("Mathematics".to_string(), "Science".to_string())],
        "Mathematics"
    );
    assert!(!graph.articles.contains_key("Template:Infobox"));
    assert!(!graph.articles.contains_key("Category:Mathematics"));
}

#[tokio::test]
async fn forward_reference_merges_into_one_node() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::new());

    import(config(&input, &state_dir(&dir), 1), &store).await;
    let graph = store.snapshot();

    // Referenced by "Example" before its own record arrived
    let node = &graph.articles["Graph Theory"];
    assert_eq!(node.id, Some(3));
    assert_eq!(node.namespace, Some(0));
    assert!(node.length.is_some());
    assert!(graph
        .links
        .contains_key(&("Example".to_string(), "Graph Theory".to_string())));
    assert!(graph
        .links
        .contains_key(&("Graph Theory".to_string(), "Example".to_string())));
    assert_eq!(
        graph
            .articles
            .keys()
            .filter(|t| t.as_str() == "Graph Theory")
            .count(),
        1
    );
}

#[tokio::test]
async fn dangling_target_stays_placeholder() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::new());

    let summary = import(config(&input, &state_dir(&dir), 3), &store).await;
    let graph = store.snapshot();

    let node = &graph.articles["Dangling Page"];
    assert_eq!(node.id, None);
    assert!(graph
        .links
        .contains_key(&("Example".to_string(), "Dangling Page".to_string())));
    assert_eq!(summary.counts.placeholders, 1);
    assert_eq!(summary.counts.articles, 4);
}

#[tokio::test]
async fn redirects_out_of_the_article_namespace_add_no_nodes() {
    let dir = TempDir::new().unwrap();
    let xml = dump(&[
        page("Maths", 0, 1, "#REDIRECT [[Category:Mathematics]]"),
        redirect_page("Graphs", 2, "wikt:graph"),
        page("SNA", 0, 3, "#redirect [[social network]]"),
    ]);
    let input = write_plain(&dir, &xml);
    let store = Arc::new(MemoryStore::new());

    let summary = import(config(&input, &state_dir(&dir), 10), &store).await;
    let graph = store.snapshot();

    assert_eq!(summary.stats.excluded_links, 2);
    assert_eq!(summary.stats.redirects, 3);
    assert_eq!(
        graph.articles.keys().map(String::as_str).collect::<Vec<_>>(),
        vec!["Graphs", "Maths", "SNA", "Social network"]
    );
    assert!(graph.articles["Maths"].is_redirect);
    assert!(graph.articles["SNA"].is_redirect);
    assert_eq!(
        graph.redirects.iter().cloned().collect::<Vec<_>>(),
        vec![("SNA".to_string(), "Social network".to_string())]
    );
    assert!(graph.categories.is_empty());
}

#[tokio::test]
async fn title_collision_keeps_first_record() {
    let dir = TempDir::new().unwrap();
    let xml = dump(&[
        page("Graph theory", 0, 1, "[[A]]"),
        page("graph theory", 0, 2, "[[B]]"),
    ]);
    let input = write_plain(&dir, &xml);
    let store = Arc::new(MemoryStore::new());

    let summary = import(config(&input, &state_dir(&dir), 10), &store).await;
    let graph = store.snapshot();

    assert_eq!(summary.stats.conflicts, 1);
    assert_eq!(graph.articles["Graph theory"].id, Some(1));
    // Edges of the later record attach to the surviving node
    assert!(graph
        .links
        .contains_key(&("Graph theory".to_string(), "B".to_string())));
}

// ============================================================================
// Idempotence Tests
// ============================================================================

#[tokio::test]
async fn rerun_does_not_change_graph() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::new());

    let first = import(config(&input, &state_dir(&dir), 2), &store).await;
    let after_first = store.snapshot();

    let mut again = config(&input, &state_dir(&dir), 2);
    again.resume = false;
    let second = import(again, &store).await;

    assert_eq!(first.counts, second.counts);
    assert_eq!(after_first, store.snapshot());
}

#[tokio::test]
async fn lost_acknowledgement_replay_is_harmless() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());

    let clean = Arc::new(MemoryStore::new());
    import(config(&input, &dir.path().join("clean"), 2), &clean).await;

    let flaky = Arc::new(MemoryStore::with_faults(FaultPlan::new().lose_ack(1)));
    let summary = import(config(&input, &dir.path().join("flaky"), 2), &flaky).await;

    assert!(!summary.has_failures());
    assert_eq!(summary.stats.commit_retries, 1);
    assert_eq!(flaky.attempts(1), 2);
    assert_eq!(clean.snapshot(), flaky.snapshot());
}

// ============================================================================
// Resume Tests
// ============================================================================

#[tokio::test]
async fn limit_then_resume_matches_uninterrupted_run() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());

    let whole = Arc::new(MemoryStore::new());
    let full = import(config(&input, &dir.path().join("whole"), 2), &whole).await;

    let split = Arc::new(MemoryStore::new());
    let split_state = dir.path().join("split");
    let mut first = config(&input, &split_state, 2);
    first.limit = Some(3);
    let partial = import(first, &split).await;

    assert!(!partial.reached_end);
    assert_eq!(partial.stats.records_read, 3);
    let saved = checkpoint::read(&split_state).unwrap().unwrap();
    assert_eq!(saved.resume_offset, partial.committed_offset);
    assert_eq!(saved.last_record_id, Some(3));

    let rest = import(config(&input, &split_state, 2), &split).await;
    assert_eq!(rest.resumed_from, Some(partial.committed_offset));
    assert!(rest.is_complete());
    assert!(checkpoint::read(&split_state).unwrap().is_none());

    // Counters carry over through the checkpoint
    assert_eq!(rest.stats.records_read, full.stats.records_read);
    assert_eq!(rest.stats.articles, full.stats.articles);

    let (a, b) = (whole.snapshot(), split.snapshot());
    assert_eq!(full.counts, rest.counts);
    assert_eq!(a.articles, b.articles);
    assert_eq!(a.categories, b.categories);
    assert_eq!(a.memberships, b.memberships);
    assert_eq!(a.subcategories, b.subcategories);
    assert_eq!(a.redirects, b.redirects);
    assert_eq!(link_keys(&whole), link_keys(&split));
}

#[tokio::test]
async fn bz2_limit_then_resume_matches_plain_run() {
    let dir = TempDir::new().unwrap();
    let plain = write_plain(&dir, &sample_xml());
    let multi = write_multistream_bz2(&dir, &sample_pages());

    let whole = Arc::new(MemoryStore::new());
    let full = import(config(&plain, &dir.path().join("whole"), 2), &whole).await;

    let split = Arc::new(MemoryStore::new());
    let split_state = dir.path().join("split");
    let mut first = config(&multi, &split_state, 2);
    first.limit = Some(3);
    let partial = import(first, &split).await;
    assert!(partial.committed_offset > 0);

    let rest = import(config(&multi, &split_state, 2), &split).await;
    assert_eq!(rest.resumed_from, Some(partial.committed_offset));
    assert!(rest.is_complete());
    assert_eq!(rest.stats.records_read, 6);

    let (a, b) = (whole.snapshot(), split.snapshot());
    assert_eq!(full.counts, rest.counts);
    assert_eq!(a.articles, b.articles);
    assert_eq!(a.memberships, b.memberships);
    assert_eq!(a.subcategories, b.subcategories);
    assert_eq!(a.redirects, b.redirects);
    assert_eq!(link_keys(&whole), link_keys(&split));
}

#[tokio::test]
async fn interrupt_with_commits_in_flight_then_resume() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &chain_xml(40));

    let clean = Arc::new(MemoryStore::new());
    let full = import(config(&input, &dir.path().join("clean"), 2), &clean).await;
    assert!(full.is_complete());
    let total_batches = clean.applied_batches();
    assert!(total_batches >= 10);

    // From batch 4 on every commit stalls, so the run stops with commits in flight
    let faults = (4..total_batches).fold(FaultPlan::new(), |plan, seq| {
        plan.slow(seq, Duration::from_millis(200))
    });
    let store = Arc::new(MemoryStore::with_faults(faults));
    let state = state_dir(&dir);
    let (stop, shutdown) = watch::channel(false);
    let watcher = {
        let store = store.clone();
        tokio::spawn(async move {
            while store.applied_batches() < 4 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let _ = stop.send(true);
            stop
        })
    };

    let stopped = run_import(config(&input, &state, 2), store.clone(), shutdown)
        .await
        .unwrap();
    let _stop = watcher.await.unwrap();

    assert!(stopped.interrupted);
    assert!(!stopped.is_complete());
    assert!(!stopped.has_failures());
    assert!(stopped.committed_offset > 0);
    assert!(store.applied_batches() >= 4);
    assert!(store.applied_batches() < total_batches);
    let saved = checkpoint::read(&state).unwrap().unwrap();
    assert_eq!(saved.resume_offset, stopped.committed_offset);

    let resumed = import(config(&input, &state, 2), &store).await;
    assert_eq!(resumed.resumed_from, Some(stopped.committed_offset));
    assert!(resumed.is_complete());
    assert!(checkpoint::read(&state).unwrap().is_none());
    assert_eq!(resumed.stats.records_read, full.stats.records_read);
    assert_eq!(resumed.stats.articles, full.stats.articles);

    let (a, b) = (clean.snapshot(), store.snapshot());
    assert_eq!(full.counts, resumed.counts);
    assert_eq!(a.articles, b.articles);
    assert_eq!(a.categories, b.categories);
    assert_eq!(a.memberships, b.memberships);
    assert_eq!(a.redirects, b.redirects);
    assert_eq!(link_keys(&clean), link_keys(&store));
}

#[tokio::test]
async fn fresh_discards_checkpoint() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let state = state_dir(&dir);
    let store = Arc::new(MemoryStore::new());

    let mut limited = config(&input, &state, 2);
    limited.limit = Some(2);
    import(limited, &store).await;
    assert!(checkpoint::read(&state).unwrap().is_some());

    let mut fresh = config(&input, &state, 2);
    fresh.resume = false;
    let summary = import(fresh, &store).await;

    assert_eq!(summary.resumed_from, None);
    assert_eq!(summary.stats.records_read, 6);
}

#[tokio::test]
async fn shutdown_before_start_keeps_nothing_in_flight() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let state = state_dir(&dir);
    let store = Arc::new(MemoryStore::new());

    let (_stop, shutdown) = watch::channel(true);
    let summary = run_import(config(&input, &state, 1), store.clone(), shutdown)
        .await
        .unwrap();

    assert!(summary.interrupted);
    assert!(!summary.is_complete());
    assert_eq!(summary.committed_offset, 0);
    assert_eq!(store.applied_batches(), 0);
    let saved = checkpoint::read(&state).unwrap().unwrap();
    assert_eq!(saved.resume_offset, 0);
}

#[tokio::test]
async fn dry_run_writes_no_state() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let state = state_dir(&dir);
    let store = Arc::new(MemoryStore::new());

    let mut dry = config(&input, &state, 2);
    dry.persist = false;
    let summary = import(dry, &store).await;

    assert!(summary.is_complete());
    assert!(summary.counts.nodes() > 0);
    assert!(!state.exists());
}

// ============================================================================
// Failure Tests
// ============================================================================

#[tokio::test]
async fn failed_batch_does_not_block_later_batches() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let state = state_dir(&dir);
    let store = Arc::new(MemoryStore::with_faults(FaultPlan::new().fail_always(1)));

    let summary = import(config(&input, &state, 1), &store).await;

    assert!(summary.has_failures());
    assert!(summary.reached_end);
    assert_eq!(summary.failed.len(), 1);
    let failed = &summary.failed[0];
    assert_eq!(failed.seq, 1);
    assert_eq!(failed.first_id, Some(2));
    assert_eq!(failed.attempts, 3);
    assert_eq!(summary.stats.batches_failed, 1);
    assert_eq!(summary.stats.batches_committed, 5);

    // Batches after the failed one landed
    let graph = store.snapshot();
    assert_eq!(graph.articles["Social Network"].id, Some(6));
    assert!(!graph
        .redirects
        .contains(&("Social".to_string(), "Social Network".to_string())));

    let csv = fs::read_to_string(state.join(FAILED_BATCHES_FILE)).unwrap();
    assert_eq!(csv.lines().count(), 2);
    assert!(state.join(SUMMARY_FILE).exists());
}

#[tokio::test]
async fn rejected_batch_fails_without_retries() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::with_faults(FaultPlan::new().reject(0)));

    let summary = import(config(&input, &state_dir(&dir), 2), &store).await;

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].attempts, 1);
    assert_eq!(store.attempts(0), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let store = Arc::new(MemoryStore::with_faults(
        FaultPlan::new().fail_transiently(0, 2),
    ));

    let summary = import(config(&input, &state_dir(&dir), 2), &store).await;

    assert!(!summary.has_failures());
    assert_eq!(summary.stats.commit_retries, 2);
    assert_eq!(store.attempts(0), 3);
}

#[tokio::test]
async fn unreachable_store_is_fatal_before_progress() {
    let dir = TempDir::new().unwrap();
    let input = write_plain(&dir, &sample_xml());
    let state = state_dir(&dir);
    let store = Arc::new(MemoryStore::with_faults(FaultPlan::new().unreachable()));

    let (_stop, shutdown) = watch::channel(false);
    let err = run_import(config(&input, &state, 2), store, shutdown)
        .await
        .unwrap_err();

    assert!(format!("{err:#}").contains("unreachable"));
    assert!(checkpoint::read(&state).unwrap().is_none());
}

#[tokio::test]
async fn missing_dump_is_fatal() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.xml");
    let store = Arc::new(MemoryStore::new());

    let (_stop, shutdown) = watch::channel(false);
    let result = run_import(
        config(missing.to_str().unwrap(), &state_dir(&dir), 2),
        store,
        shutdown,
    )
    .await;

    assert!(result.is_err());
}
