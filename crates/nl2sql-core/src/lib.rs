//! Natural-language-to-SQL core: the orchestration engine that turns a free
//! text query into per-datasource SQL, executes it through registered
//! adapters, and synthesizes an answer — all without ever interpreting the
//! user's words as raw SQL itself.
//!
//! The crate is organized around the pipeline's control graph. `orchestrator`
//! is the entry point; everything else is a stage it drives or a seam it
//! drives stages through (`llm`, `adapter`, `vector`, `artifact`,
//! `schema_store` are the external-collaborator traits).

pub mod adapter;
pub mod aggregator;
pub mod artifact;
pub mod breaker;
pub mod config;
pub mod decomposer;
pub mod domain;
pub mod error;
pub mod gate;
pub mod generator;
pub mod ids;
pub mod llm;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod planner;
pub mod schema_store;
pub mod subgraph;
pub mod synthesizer;
pub mod telemetry;
pub mod validator;
pub mod vector;

pub use adapter::{Adapter, AdapterRegistry};
pub use aggregator::{aggregate, AggregatorResponse};
pub use artifact::{ArtifactStore, LocalArtifactStore};
pub use breaker::{BreakerState, CircuitBreaker};
pub use config::{PipelineConfig, SchemaVersionMismatchPolicy};
pub use decomposer::decompose;
pub use domain::{
    build_chunks, AdapterRequest, ArtifactRef, Capability, CapabilitySet, Chunk, DecomposerResponse,
    ExecutionDAG, GraphState, PlanModel, ResultFrame, SchemaContract, SchemaSnapshot, SchemaVersion,
    StateUpdate, SubQuery, SubgraphOutput, SubgraphStatus, UserContext,
};
pub use error::{Nl2SqlError, PipelineError, PipelineErrorCode, Result, Severity};
pub use gate::{PolicyEngine, RolePolicy};
pub use generator::{generate, AnsiSqlBuilder, SqlBuilder};
pub use llm::{HttpStructuredLlm, StructuredLlm, StructuredLlmExt};
pub use orchestrator::{run_pipeline, PipelineDeps, PipelineRequest};
pub use planner::plan_global;
pub use schema_store::SchemaSnapshotStore;
pub use subgraph::{run_subgraph, SubgraphDeps};
pub use synthesizer::synthesize;
pub use telemetry::init_tracing;
pub use validator::{validate, ValidatorConfig};
pub use vector::{RetrievalFilter, VectorIndex};

/// Crate version, surfaced in CLI/server `--version` output.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
