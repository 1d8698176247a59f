//! Adapter interface and capability registry.
//!
//! An [`Adapter`] is the core's only view of a concrete datasource driver
//! (Postgres, MySQL, MSSQL, SQLite, ...). The core never talks to a database
//! directly — it builds an [`AdapterRequest`], hands it to the registered
//! adapter for a datasource, and gets back a [`ResultFrame`]. Concrete
//! drivers are an external collaborator per the core's scope; this module
//! only defines the trait and the registry that selects among
//! already-registered instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{AdapterRequest, Capability, CapabilitySet, ResultFrame, SchemaSnapshot};
use crate::error::{Nl2SqlError, PipelineError, PipelineErrorCode, Result};

/// Optional preflight checks a capable adapter may expose between the
/// Generator and Executor stages: dry-run/cost-estimate are optional,
/// gated by a policy setting rather than always run.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn datasource_id(&self) -> &str;
    fn engine_type(&self) -> &str;
    fn capabilities(&self) -> &CapabilitySet;
    fn row_limit(&self) -> u64;
    fn max_bytes(&self) -> u64;
    fn dialect(&self) -> &str;

    async fn fetch_schema_snapshot(&self) -> Result<SchemaSnapshot> {
        Err(Nl2SqlError::AdapterNotFound(format!(
            "{} does not support schema introspection",
            self.datasource_id()
        )))
    }

    async fn execute(&self, request: AdapterRequest) -> Result<ResultFrame>;

    async fn dry_run(&self, _sql: &str) -> Result<()> {
        Ok(())
    }

    async fn cost_estimate(&self, _sql: &str) -> Result<Option<f64>> {
        Ok(None)
    }

    async fn explain(&self, _sql: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Registers adapters by datasource ID and supports capability-subset lookup.
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn Adapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(adapter.datasource_id().to_string(), adapter);
    }

    pub fn get(&self, ds_id: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(ds_id).cloned()
    }

    pub fn contains(&self, ds_id: &str) -> bool {
        self.adapters.contains_key(ds_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    /// Pick the adapter for `ds_id` if it advertises every capability in
    /// `required`. This is the "first registered subgraph whose
    /// `required_capabilities ⊆ adapter.capabilities()`" routing rule — with
    /// one adapter per datasource there is exactly one candidate to check.
    pub fn compatible(&self, ds_id: &str, required: &[Capability]) -> Result<Arc<dyn Adapter>> {
        let adapter = self
            .get(ds_id)
            .ok_or_else(|| Nl2SqlError::AdapterNotFound(ds_id.to_string()))?;
        let caps = adapter.capabilities();
        if required.iter().all(|c| caps.contains(c)) {
            Ok(adapter)
        } else {
            Err(PipelineError::new(
                PipelineErrorCode::NoCompatibleSubgraph,
                format!("adapter for '{ds_id}' lacks required capabilities"),
            )
            .into())
        }
    }
}

/// An in-memory adapter backing the CLI/server demo path: datasource drivers
/// (Postgres, MySQL, ...) are an external collaborator per the core's scope,
/// so this is the one concrete `Adapter` the binaries ship with, loading its
/// tables from registered JSON rows rather than a real connection.
pub struct MemoryAdapter {
    ds_id: String,
    row_limit: u64,
    max_bytes: u64,
    tables: std::sync::Mutex<BTreeMap<String, (Vec<String>, Vec<Vec<serde_json::Value>>)>>,
}

impl MemoryAdapter {
    pub fn new(ds_id: impl Into<String>, row_limit: u64, max_bytes: u64) -> Self {
        Self { ds_id: ds_id.into(), row_limit, max_bytes, tables: std::sync::Mutex::new(BTreeMap::new()) }
    }

    pub fn load_table(&self, table: impl Into<String>, columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) {
        self.tables.lock().unwrap().insert(table.into(), (columns, rows));
    }
}

#[async_trait]
impl Adapter for MemoryAdapter {
    fn datasource_id(&self) -> &str {
        &self.ds_id
    }

    fn engine_type(&self) -> &str {
        "memory"
    }

    fn capabilities(&self) -> &CapabilitySet {
        use std::sync::OnceLock;
        static CAPS: OnceLock<CapabilitySet> = OnceLock::new();
        CAPS.get_or_init(|| [Capability::SupportsSql, Capability::SupportsSchemaIntrospection].into_iter().collect())
    }

    fn row_limit(&self) -> u64 {
        self.row_limit
    }

    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn dialect(&self) -> &str {
        "ansi"
    }

    async fn execute(&self, request: AdapterRequest) -> Result<ResultFrame> {
        let guard = self.tables.lock().unwrap();
        for (table, (columns, rows)) in guard.iter() {
            if request.payload.contains(table.as_str()) {
                let limit = request.limits.row_limit as usize;
                let limited: Vec<_> = rows.iter().take(limit).cloned().collect();
                return Ok(ResultFrame::ok(columns.clone(), limited));
            }
        }
        Ok(ResultFrame::empty(vec![]))
    }
}
