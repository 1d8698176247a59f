//! Append-only run log backing `nl2sql runs list|show` and the server's
//! `GET /runs/:id`.
//!
//! Each completed query appends one line of JSON to `runs.jsonl` under the
//! data directory. This is intentionally separate from [`crate::SurrealHandle`]'s
//! `ArtifactStore` — a run record is request/session bookkeeping, not a
//! pipeline-level artifact.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub tenant_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub user_query: String,
    pub status: String,
    pub error_count: usize,
    pub warning_count: usize,
    pub answer: Option<String>,
    pub state: serde_json::Value,
}

pub fn append(path: &Path, record: &RunRecord) -> Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening run log at {}", path.display()))?;
    writeln!(file, "{}", serde_json::to_string(record)?)?;
    Ok(())
}

pub fn list(path: &Path) -> Result<Vec<RunRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let body = std::fs::read_to_string(path).with_context(|| format!("reading run log at {}", path.display()))?;
    body.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).context("parsing run record"))
        .collect()
}

pub fn find(path: &Path, run_id: &str) -> Result<Option<RunRecord>> {
    Ok(list(path)?.into_iter().find(|r| r.run_id == run_id))
}
