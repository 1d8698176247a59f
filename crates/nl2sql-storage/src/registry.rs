//! Local workspace registry: the fixture data and RBAC roles a pipeline run
//! needs beyond what [`crate::SurrealHandle`] already persists — sample row
//! data for [`nl2sql_core::adapter::MemoryAdapter`], retrieval descriptions,
//! and role grants. Shared by `nl2sql-cli` and `nl2sql-server` so both
//! binaries bootstrap an identical pipeline from the same data directory.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use nl2sql_core::domain::{ColumnContract, ForeignKey, SchemaContract, TableContract};
use nl2sql_core::gate::RolePolicy;
use serde::{Deserialize, Serialize};

fn default_row_limit() -> u64 {
    1000
}

fn default_max_bytes() -> u64 {
    50_000_000
}

/// One table's fixture: its contract shape plus the literal rows the demo
/// `MemoryAdapter` serves for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFixture {
    pub columns: BTreeMap<String, ColumnContract>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// A registered datasource: everything `nl2sql register-datasource` reads
/// from the operator's fixture file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceFixture {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sample_questions: Vec<String>,
    #[serde(default = "default_row_limit")]
    pub row_limit: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    pub tables: BTreeMap<String, TableFixture>,
}

impl DatasourceFixture {
    /// The structural `SchemaContract` this fixture implies, independent of
    /// the row data carried alongside it.
    pub fn contract(&self) -> SchemaContract {
        let tables = self
            .tables
            .iter()
            .map(|(name, t)| {
                (
                    name.clone(),
                    TableContract {
                        columns: t.columns.clone(),
                        primary_key: t.primary_key.clone(),
                        foreign_keys: t.foreign_keys.clone(),
                    },
                )
            })
            .collect();
        SchemaContract { tables }
    }
}

/// Everything the binaries persist across invocations besides schema
/// snapshots and artifacts, which [`crate::SurrealHandle`] already owns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub datasources: BTreeMap<String, DatasourceFixture>,
    pub roles: BTreeMap<String, RolePolicy>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("reading registry at {}", path.display()))?;
        serde_json::from_str(&body).with_context(|| format!("parsing registry at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body).with_context(|| format!("writing registry at {}", path.display()))
    }
}
