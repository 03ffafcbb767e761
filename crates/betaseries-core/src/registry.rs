//! Analysis records and the master registry.
//!
//! Each batch run leaves one JSON record under `{output_dir}/records/`. The
//! registry gathers every record into `master_registry.json` and renders a
//! Markdown overview: a summary table followed by one detail block per record.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::artifact::write_atomic;
use crate::error::{Error, Result};

pub const RECORDS_DIR: &str = "records";
pub const MASTER_JSON: &str = "master_registry.json";
pub const MASTER_MARKDOWN: &str = "README.md";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Completed,
    CompletedWithFailures,
    Failed,
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed_with_failures",
            Self::Failed => "failed",
        })
    }
}

/// Summary of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: RecordStatus,
    pub subjects_processed: usize,
    pub subjects_written: usize,
    pub subjects_skipped: usize,
    pub subjects_failed: usize,
    /// Failed subject ids with their error kind.
    #[serde(default)]
    pub failures: Vec<(String, String)>,
    pub output_path: PathBuf,
    pub completed_at: String,
    pub config_hash: String,
    pub tool_version: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AnalysisRecord {
    pub fn file_name(&self) -> String {
        format!("{}.json", self.id)
    }

    /// Write to `{output_dir}/records/{id}.json`.
    pub fn write(&self, output_dir: &Path) -> Result<PathBuf> {
        let path = output_dir.join(RECORDS_DIR).join(self.file_name());
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::data(format!("cannot serialize record: {e}")))?;
        write_atomic(&path, &json)?;
        Ok(path)
    }
}

/// Load every `*.json` record in `dir`, ordered by file name.
pub fn load_records(dir: &Path) -> Result<Vec<AnalysisRecord>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|p| {
            let text = fs::read_to_string(p).map_err(|e| Error::io(p, e))?;
            serde_json::from_str(&text)
                .map_err(|e| Error::data(format!("invalid record {}: {e}", p.display())))
        })
        .collect()
}

/// Markdown overview of all records.
pub fn render_markdown(records: &[AnalysisRecord]) -> String {
    let mut md = String::from("# Master Analysis Registry\n\n## Summary\n\n");
    md.push_str("| ID | Description | Status | Subjects (written/skipped/failed) |\n");
    md.push_str("|----|-------------|--------|-----------------------------------|\n");
    for r in records {
        md.push_str(&format!(
            "| {} | {} | {} | {}/{}/{} |\n",
            r.id,
            one_line(&r.description),
            r.status,
            r.subjects_written,
            r.subjects_skipped,
            r.subjects_failed
        ));
    }

    md.push_str("\n---\n\n## Detailed Reports\n");
    for r in records {
        let failed = if r.failures.is_empty() {
            "None".to_string()
        } else {
            r.failures
                .iter()
                .map(|(s, kind)| format!("{s} ({kind})"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        md.push_str(&format!("\n### {}\n", r.id));
        md.push_str(&format!("**Name:** {}<br>\n", r.name));
        md.push_str(&format!("**Description:** {}<br>\n", r.description.trim()));
        md.push_str(&format!("**Output Directory:** {}<br>\n", r.output_path.display()));
        md.push_str(&format!("**Subjects Processed:** {}<br>\n", r.subjects_processed));
        md.push_str(&format!("**Failed Subjects:** {failed}<br>\n"));
        md.push_str(&format!("**Config Hash:** {}<br>\n", r.config_hash));
        md.push_str(&format!("**Tool Version:** {}<br>\n", r.tool_version));
        md.push_str(&format!(
            "**Notes:** {}<br>\n",
            r.notes.as_deref().unwrap_or("None")
        ));
        md.push_str(&format!("**Status:** {}<br>\n", r.status));
        md.push_str(&format!("**Completed:** {}<br>\n", r.completed_at));
        md.push_str("\n---\n");
    }
    md
}

fn one_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect records from `records_dir` and write the combined JSON and the
/// Markdown overview into `dest_dir`. Returns the number of records.
pub fn build_registry(records_dir: &Path, dest_dir: &Path) -> Result<usize> {
    let records = load_records(records_dir)?;
    let json = serde_json::to_vec_pretty(&records)
        .map_err(|e| Error::data(format!("cannot serialize registry: {e}")))?;
    write_atomic(&dest_dir.join(MASTER_JSON), &json)?;
    write_atomic(
        &dest_dir.join(MASTER_MARKDOWN),
        render_markdown(&records).as_bytes(),
    )?;
    log::info!(
        "registry: {} record(s) from {} written to {}",
        records.len(),
        records_dir.display(),
        dest_dir.display()
    );
    Ok(records.len())
}
