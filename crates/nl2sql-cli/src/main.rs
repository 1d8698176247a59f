//! nl2sql command-line interface.
//!
//! ## Commands
//!
//! - `register-datasource`: register a fixture's schema contract and sample
//!   rows under a datasource ID
//! - `register-policy`: grant a role access to datasources/tables
//! - `query`: run the full pipeline for a natural-language question
//! - `snapshot`: re-register a datasource's current fixture as a schema
//!   snapshot
//! - `runs`: list or show past query runs

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nl2sql_core::adapter::{Adapter, AdapterRegistry, MemoryAdapter};
use nl2sql_core::breaker::CircuitBreaker;
use nl2sql_core::config::PipelineConfig;
use nl2sql_core::domain::{build_chunks, SchemaMetadata, UserContext};
use nl2sql_core::gate::{PolicyEngine, RolePolicy};
use nl2sql_core::llm::HttpStructuredLlm;
use nl2sql_core::orchestrator::{run_pipeline, PipelineDeps, PipelineRequest};
use nl2sql_core::validator::ValidatorConfig;
use nl2sql_core::vector::InMemoryVectorIndex;
use nl2sql_storage::{runs, DatasourceFixture, Registry, SurrealHandle};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "nl2sql")]
#[command(author = "nl2sql maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Natural-language-to-SQL orchestration pipeline", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding the persistent schema store, local registry, and run log
    #[arg(long, global = true, env = "NL2SQL_DATA_DIR", default_value = ".nl2sql")]
    data_dir: PathBuf,

    /// Optional TOML file overriding pipeline configuration defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a datasource's schema contract and fixture rows
    RegisterDatasource {
        /// Datasource ID the rest of the pipeline will address it by
        ds_id: String,

        /// Path to a JSON fixture: `{description, sample_questions, tables: {...}}`
        #[arg(long)]
        fixture: PathBuf,
    },

    /// Grant a role access to datasources and table patterns
    RegisterPolicy {
        /// Role ID, matched against `--roles` on `query`
        role: String,

        /// Comma-separated datasource IDs this role may query
        #[arg(long, value_delimiter = ',')]
        datasources: Vec<String>,

        /// Comma-separated table patterns: `ds_id.table`, `ds_id.*`, or `*`
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Run the pipeline for a natural-language question
    Query {
        /// The natural-language question
        question: String,

        /// Tenant ID for the caller
        #[arg(long, default_value = "default")]
        tenant: String,

        /// User ID for the caller
        #[arg(long, default_value = "cli")]
        user: String,

        /// Comma-separated roles held by the caller
        #[arg(long, value_delimiter = ',', default_value = "analyst")]
        roles: Vec<String>,

        /// LLM provider endpoint; overrides NL2SQL_LLM_ENDPOINT
        #[arg(long, env = "NL2SQL_LLM_ENDPOINT")]
        llm_endpoint: Option<String>,

        /// LLM provider API key; overrides NL2SQL_LLM_API_KEY
        #[arg(long, env = "NL2SQL_LLM_API_KEY")]
        llm_api_key: Option<String>,
    },

    /// Re-register a datasource's current fixture as a new schema snapshot
    Snapshot {
        /// Datasource ID to re-snapshot
        ds_id: String,
    },

    /// Inspect past query runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recorded runs, most recent last
    List,
    /// Show the full recorded state for one run
    Show {
        /// Run ID as printed by `query` or `runs list`
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    nl2sql_core::init_tracing(cli.json, level);

    let config = match &cli.config {
        Some(path) => {
            let body = std::fs::read_to_string(path)
                .with_context(|| format!("reading config at {}", path.display()))?;
            PipelineConfig::from_toml_str(&body).with_context(|| format!("parsing config at {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::RegisterDatasource { ds_id, fixture } => {
            cmd_register_datasource(&cli.data_dir, &ds_id, &fixture).await
        }
        Commands::RegisterPolicy { role, datasources, tables } => {
            cmd_register_policy(&cli.data_dir, &role, datasources, tables)
        }
        Commands::Query { question, tenant, user, roles, llm_endpoint, llm_api_key } => {
            cmd_query(&cli.data_dir, &config, &question, &tenant, &user, roles, llm_endpoint, llm_api_key).await
        }
        Commands::Snapshot { ds_id } => cmd_snapshot(&cli.data_dir, &ds_id).await,
        Commands::Runs { action } => match action {
            RunsAction::List => cmd_runs_list(&cli.data_dir),
            RunsAction::Show { run_id } => cmd_runs_show(&cli.data_dir, &run_id),
        },
    }
}

fn registry_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("registry.json")
}

fn runs_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("runs.jsonl")
}

async fn cmd_register_datasource(data_dir: &std::path::Path, ds_id: &str, fixture_path: &std::path::Path) -> Result<()> {
    let body = std::fs::read_to_string(fixture_path)
        .with_context(|| format!("reading fixture at {}", fixture_path.display()))?;
    let fixture: DatasourceFixture =
        serde_json::from_str(&body).with_context(|| format!("parsing fixture at {}", fixture_path.display()))?;

    let handle = SurrealHandle::setup_file(data_dir).await.context("opening schema store")?;
    let version = handle
        .register(ds_id, fixture.contract(), SchemaMetadata::default())
        .await
        .context("registering schema snapshot")?;

    let mut registry = Registry::load(&registry_path(data_dir))?;
    registry.datasources.insert(ds_id.to_string(), fixture);
    registry.save(&registry_path(data_dir))?;

    println!("registered datasource '{ds_id}' at schema version {}", version.as_str());
    Ok(())
}

fn cmd_register_policy(data_dir: &std::path::Path, role: &str, datasources: Vec<String>, tables: Vec<String>) -> Result<()> {
    let policy = RolePolicy { allowed_datasources: datasources, allowed_tables: tables };
    // Validate against the full RBAC loader before persisting a typo'd pattern.
    PolicyEngine::empty().with_role(role, policy.clone())?;

    let path = registry_path(data_dir);
    let mut registry = Registry::load(&path)?;
    registry.roles.insert(role.to_string(), policy);
    registry.save(&path)?;

    println!("registered role '{role}'");
    Ok(())
}

async fn cmd_snapshot(data_dir: &std::path::Path, ds_id: &str) -> Result<()> {
    let registry = Registry::load(&registry_path(data_dir))?;
    let Some(fixture) = registry.datasources.get(ds_id) else {
        bail!("datasource '{ds_id}' is not registered; run register-datasource first");
    };

    let handle = SurrealHandle::setup_file(data_dir).await.context("opening schema store")?;
    let version = handle
        .register(ds_id, fixture.contract(), SchemaMetadata::default())
        .await
        .context("registering schema snapshot")?;

    println!("datasource '{ds_id}' is now at schema version {}", version.as_str());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_query(
    data_dir: &std::path::Path,
    config: &PipelineConfig,
    question: &str,
    tenant: &str,
    user: &str,
    roles: Vec<String>,
    llm_endpoint: Option<String>,
    llm_api_key: Option<String>,
) -> Result<()> {
    let registry = Registry::load(&registry_path(data_dir))?;
    if registry.datasources.is_empty() {
        bail!("no datasources registered; run register-datasource first");
    }

    let schema_store = SurrealHandle::setup_file(data_dir).await.context("opening schema store")?;

    let vector_index = InMemoryVectorIndex::new();
    let mut adapters = AdapterRegistry::new();
    let mut policy = PolicyEngine::empty();
    for (role_id, role_policy) in &registry.roles {
        policy = policy.with_role(role_id.clone(), role_policy.clone())?;
    }

    for (ds_id, fixture) in &registry.datasources {
        let snapshot = schema_store
            .latest_version(ds_id)
            .await
            .context("resolving latest schema version")?
            .ok_or_else(|| anyhow::anyhow!("datasource '{ds_id}' has no registered schema"))?;
        let snapshot = schema_store.get(ds_id, Some(snapshot.as_str())).await.context("loading schema snapshot")?;

        let chunks = build_chunks(ds_id, &snapshot, &fixture.description, fixture.sample_questions.clone());
        vector_index.refresh(ds_id, chunks).await?;

        let adapter = MemoryAdapter::new(ds_id.clone(), fixture.row_limit, fixture.max_bytes);
        for (table, table_fixture) in &fixture.tables {
            let columns: Vec<String> = table_fixture.columns.keys().cloned().collect();
            adapter.load_table(table.clone(), columns, table_fixture.rows.clone());
        }
        adapters.register(Arc::new(adapter) as Arc<dyn Adapter>);
    }

    let Some(endpoint) = llm_endpoint else {
        bail!("no LLM provider configured; pass --llm-endpoint or set NL2SQL_LLM_ENDPOINT");
    };
    let llm = HttpStructuredLlm::new(endpoint, llm_api_key);

    let validator_config = ValidatorConfig { strict_columns: config.logical_validator_strict_columns };
    let deps = PipelineDeps {
        vector_index: &vector_index,
        schema_store: &schema_store,
        llm: &llm,
        adapters: &adapters,
        artifact_store: &schema_store,
        policy: &policy,
        llm_breaker: &CircuitBreaker::new("llm", config.breakers.llm),
        vector_breaker: &CircuitBreaker::new("vector", config.breakers.vector),
        db_breaker: &CircuitBreaker::new("db", config.breakers.db),
        config: config.clone(),
        validator_config,
    };

    let trace_id = uuid::Uuid::new_v4().to_string();
    let request = PipelineRequest {
        trace_id: trace_id.clone(),
        request_id: uuid::Uuid::new_v4().to_string(),
        user_query: question.to_string(),
        user_context: UserContext::new(user, tenant, roles.clone()),
        datasource_id: None,
        requested_schema_version: None,
    };

    info!(trace_id = %trace_id, "starting query");
    let state = run_pipeline(&deps, request).await;

    let run_id = uuid::Uuid::new_v4().to_string();
    let record = runs::RunRecord {
        run_id: run_id.clone(),
        trace_id: trace_id.clone(),
        created_at: chrono::Utc::now(),
        tenant_id: tenant.to_string(),
        user_id: user.to_string(),
        roles,
        user_query: question.to_string(),
        status: if state.has_critical_error() { "error".to_string() } else { "ok".to_string() },
        error_count: state.errors.len(),
        warning_count: state.warnings.len(),
        answer: state.synth_resp.clone(),
        state: serde_json::to_value(&state)?,
    };
    runs::append(&runs_path(data_dir), &record)?;

    println!("run {run_id}");
    if let Some(answer) = &state.synth_resp {
        println!("{answer}");
    }
    if !state.errors.is_empty() {
        println!("errors:");
        for err in &state.errors {
            println!("  - {err}");
        }
    }
    if !state.warnings.is_empty() {
        println!("warnings:");
        for warn in &state.warnings {
            println!("  - {warn}");
        }
    }

    Ok(())
}

fn cmd_runs_list(data_dir: &std::path::Path) -> Result<()> {
    let records = runs::list(&runs_path(data_dir))?;
    if records.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }
    for record in records {
        println!(
            "{}  {}  {}  {}  \"{}\"",
            record.run_id, record.created_at.to_rfc3339(), record.status, record.tenant_id, record.user_query
        );
    }
    Ok(())
}

fn cmd_runs_show(data_dir: &std::path::Path, run_id: &str) -> Result<()> {
    let Some(record) = runs::find(&runs_path(data_dir), run_id)? else {
        bail!("no run found with id '{run_id}'");
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
