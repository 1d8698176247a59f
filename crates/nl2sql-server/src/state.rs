//! Shared server state: every pipeline collaborator built once at startup
//! from the same data directory `nl2sql-cli` writes to, plus the
//! long-lived circuit breakers a daemon process should keep warm across
//! requests rather than rebuild per call.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use nl2sql_core::adapter::{Adapter, AdapterRegistry, MemoryAdapter};
use nl2sql_core::breaker::CircuitBreaker;
use nl2sql_core::config::PipelineConfig;
use nl2sql_core::domain::build_chunks;
use nl2sql_core::gate::PolicyEngine;
use nl2sql_core::llm::HttpStructuredLlm;
use nl2sql_core::vector::InMemoryVectorIndex;
use nl2sql_storage::{Registry, SurrealHandle};
use std::sync::Arc;

pub struct AppState {
    pub schema_store: SurrealHandle,
    pub vector_index: InMemoryVectorIndex,
    pub adapters: AdapterRegistry,
    pub policy: PolicyEngine,
    pub llm: HttpStructuredLlm,
    pub llm_breaker: CircuitBreaker,
    pub vector_breaker: CircuitBreaker,
    pub db_breaker: CircuitBreaker,
    pub config: PipelineConfig,
    pub data_dir: PathBuf,
}

impl AppState {
    pub fn runs_path(&self) -> PathBuf {
        self.data_dir.join("runs.jsonl")
    }

    /// Build from a data directory: loads the local registry written by
    /// `nl2sql register-datasource`/`register-policy`, rebuilds the vector
    /// index from each datasource's latest persisted schema snapshot, and
    /// requires a genuinely configured LLM endpoint — the server refuses to
    /// start with a fake provider.
    pub async fn bootstrap(data_dir: impl AsRef<Path>, config: PipelineConfig) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let registry = Registry::load(&data_dir.join("registry.json"))?;
        if registry.datasources.is_empty() {
            bail!("no datasources registered under {}; run `nl2sql register-datasource` first", data_dir.display());
        }

        let schema_store = SurrealHandle::setup_file(&data_dir).await.context("opening schema store")?;
        let vector_index = InMemoryVectorIndex::new();
        let mut adapters = AdapterRegistry::new();
        let mut policy = PolicyEngine::empty();
        for (role_id, role_policy) in &registry.roles {
            policy = policy.with_role(role_id.clone(), role_policy.clone())?;
        }

        for (ds_id, fixture) in &registry.datasources {
            let version = schema_store
                .latest_version(ds_id)
                .await
                .context("resolving latest schema version")?
                .ok_or_else(|| anyhow::anyhow!("datasource '{ds_id}' has no registered schema"))?;
            let snapshot = schema_store.get(ds_id, Some(version.as_str())).await.context("loading schema snapshot")?;

            let chunks = build_chunks(ds_id, &snapshot, &fixture.description, fixture.sample_questions.clone());
            vector_index.refresh(ds_id, chunks).await?;

            let adapter = MemoryAdapter::new(ds_id.clone(), fixture.row_limit, fixture.max_bytes);
            for (table, table_fixture) in &fixture.tables {
                let columns: Vec<String> = table_fixture.columns.keys().cloned().collect();
                adapter.load_table(table.clone(), columns, table_fixture.rows.clone());
            }
            adapters.register(Arc::new(adapter) as Arc<dyn Adapter>);
        }

        let llm = HttpStructuredLlm::from_env()
            .context("no LLM provider configured; set NL2SQL_LLM_ENDPOINT (and NL2SQL_LLM_API_KEY)")?;

        Ok(Self {
            llm_breaker: CircuitBreaker::new("llm", config.breakers.llm),
            vector_breaker: CircuitBreaker::new("vector", config.breakers.vector),
            db_breaker: CircuitBreaker::new("db", config.breakers.db),
            schema_store,
            vector_index,
            adapters,
            policy,
            llm,
            config,
            data_dir,
        })
    }
}
