use crate::models::FailedRange;
use crate::stats::StatsSnapshot;
use crate::store::GraphCounts;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;

pub const FAILED_BATCHES_FILE: &str = "failed_batches.csv";
pub const SUMMARY_FILE: &str = "import_summary.json";

/// Outcome of one `import` run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub input: String,
    /// Offset the run started from when it resumed a checkpoint
    pub resumed_from: Option<u64>,
    /// Everything before this offset is committed or listed in `failed`
    pub committed_offset: u64,
    pub reached_end: bool,
    pub interrupted: bool,
    pub duration_secs: f64,
    pub stats: StatsSnapshot,
    pub failed: Vec<FailedRange>,
    pub counts: GraphCounts,
}

impl ImportSummary {
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.reached_end && !self.interrupted
    }

    pub fn print(&self) {
        let s = &self.stats;
        println!();
        println!("=== Summary ===");
        println!("Input:              {}", self.input);
        if let Some(offset) = self.resumed_from {
            println!("Resumed from byte:  {offset}");
        }
        println!("Committed to byte:  {}", self.committed_offset);
        println!(
            "Status:             {}",
            if self.interrupted {
                "interrupted (resume with --resume)"
            } else if self.reached_end {
                "complete"
            } else {
                "stopped early (resume with --resume)"
            }
        );
        println!("Total time:         {:.2}s", self.duration_secs);
        println!();
        println!("Records read:       {}", s.records_read);
        println!("Articles:           {}", s.articles);
        println!("Redirects:          {}", s.redirects);
        println!("Category pages:     {}", s.category_pages);
        println!("Skipped:            {}", s.skipped);
        println!("Parse errors:       {}", s.parse_errors);
        println!("Malformed records:  {}", s.malformed);
        println!("Markup anomalies:   {}", s.markup_anomalies);
        println!("Excluded links:     {}", s.excluded_links);
        println!("Links:              {} ({} self-links)", s.links, s.self_links);
        println!("Memberships:        {}", s.memberships);
        println!("Subcategory links:  {}", s.subcategory_links);
        println!("Placeholders:       {}", s.placeholders);
        println!("Title conflicts:    {}", s.conflicts);
        println!();
        println!("Batches committed:  {}", s.batches_committed);
        println!("Batches failed:     {}", s.batches_failed);
        println!("Commit retries:     {}", s.commit_retries);
        println!("Operations:         {}", s.ops_committed);
        println!();
        println!("Graph articles:     {}", self.counts.articles);
        println!("Graph placeholders: {}", self.counts.placeholders);
        println!("Graph categories:   {}", self.counts.categories);
        println!("Graph links:        {}", self.counts.links);
        println!("Graph memberships:  {}", self.counts.memberships);
        println!("Graph subcategory:  {}", self.counts.subcategories);
        println!("Graph redirects:    {}", self.counts.redirects);

        if self.has_failures() {
            println!();
            println!("Failed record ranges ({}):", self.failed.len());
            for f in &self.failed {
                println!(
                    "  bytes {}..{}  ids {}..{}  ({} records, {} attempts): {}",
                    f.start_offset,
                    f.end_offset,
                    f.first_id.map_or("?".to_string(), |id| id.to_string()),
                    f.last_id.map_or("?".to_string(), |id| id.to_string()),
                    f.records,
                    f.attempts,
                    f.error
                );
            }
        }
    }

    /// Writes `failed_batches.csv` and `import_summary.json` into `state_dir`.
    pub fn write_reports(&self, state_dir: &Path) -> Result<()> {
        fs::create_dir_all(state_dir)
            .with_context(|| format!("Failed to create directory: {:?}", state_dir))?;

        let csv_path = state_dir.join(FAILED_BATCHES_FILE);
        let mut writer = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Failed to create {:?}", csv_path))?;
        for failure in &self.failed {
            writer
                .serialize(failure)
                .context("Failed to write failed batch row")?;
        }
        writer.flush().context("Failed to flush failed batches")?;

        let json_path = state_dir.join(SUMMARY_FILE);
        let file = File::create(&json_path)
            .with_context(|| format!("Failed to create {:?}", json_path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("Failed to write import summary")?;

        Ok(())
    }
}
