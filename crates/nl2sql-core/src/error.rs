//! Error taxonomy: infrastructure errors ([`Nl2SqlError`]) and pipeline
//! domain errors ([`PipelineError`] / [`PipelineErrorCode`]).
//!
//! The two layers are kept distinct on purpose. `Nl2SqlError` covers
//! failures that are exceptional at the Rust level (serialization, storage,
//! digest mismatches) — the kind of thing a `?` chain propagates. A
//! `PipelineError` is a first-class *value*: it gets pushed onto
//! `state.errors` and inspected by routing logic (`is_retryable`,
//! `severity`) rather than unwound as a Rust error. `PipelineError`
//! implements `std::error::Error` so it composes with `?` at node
//! boundaries, but its natural home is a `Vec<PipelineError>`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Infrastructure-level errors: the kind every crate-level `Result` uses.
#[derive(Debug, thiserror::Error)]
pub enum Nl2SqlError {
    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("schema not found: {ds_id} (version {version:?})")]
    SchemaNotFound { ds_id: String, version: Option<String> },

    #[error("adapter not found: {0}")]
    AdapterNotFound(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("llm provider request failed: {0}")]
    LlmRequestFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;

/// Severity of a [`PipelineError`]; controls routing and propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// The fixed set of domain error codes the pipeline emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineErrorCode {
    SecurityViolation,
    NoCompatibleSubgraph,
    PlanningFailure,
    InvalidPlanStructure,
    ColumnNotFound,
    JoinTableNotInPlan,
    SqlGenFailed,
    MissingSql,
    MissingDatasourceId,
    ExecutionFailed,
    ExecutorCrash,
    ExecutionTimeout,
    AggregatorFailed,
    DecomposerFailed,
    PlannerFailed,
    SchemaFallbackUsed,
    PlanFeedback,
    ServiceUnavailable,
    PipelineTimeout,
    Cancelled,
    InvalidState,
    SchemaVersionMismatch,
    UnknownError,
}

impl fmt::Display for PipelineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::SecurityViolation => "SECURITY_VIOLATION",
            Self::NoCompatibleSubgraph => "NO_COMPATIBLE_SUBGRAPH",
            Self::PlanningFailure => "PLANNING_FAILURE",
            Self::InvalidPlanStructure => "INVALID_PLAN_STRUCTURE",
            Self::ColumnNotFound => "COLUMN_NOT_FOUND",
            Self::JoinTableNotInPlan => "JOIN_TABLE_NOT_IN_PLAN",
            Self::SqlGenFailed => "SQL_GEN_FAILED",
            Self::MissingSql => "MISSING_SQL",
            Self::MissingDatasourceId => "MISSING_DATASOURCE_ID",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::ExecutorCrash => "EXECUTOR_CRASH",
            Self::ExecutionTimeout => "EXECUTION_TIMEOUT",
            Self::AggregatorFailed => "AGGREGATOR_FAILED",
            Self::DecomposerFailed => "DECOMPOSER_FAILED",
            Self::PlannerFailed => "PLANNER_FAILED",
            Self::SchemaFallbackUsed => "SCHEMA_FALLBACK_USED",
            Self::PlanFeedback => "PLAN_FEEDBACK",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::PipelineTimeout => "PIPELINE_TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::InvalidState => "INVALID_STATE",
            Self::SchemaVersionMismatch => "SCHEMA_VERSION_MISMATCH",
            Self::UnknownError => "UNKNOWN_ERROR",
        };
        f.write_str(s)
    }
}

impl PipelineErrorCode {
    /// Severity baked into the code per the error taxonomy.
    pub fn default_severity(self) -> Severity {
        use PipelineErrorCode::*;
        match self {
            SecurityViolation | NoCompatibleSubgraph | SqlGenFailed | MissingSql
            | MissingDatasourceId | AggregatorFailed | DecomposerFailed | PlannerFailed
            | PipelineTimeout | Cancelled | InvalidState | SchemaVersionMismatch
            | UnknownError => Severity::Critical,
            PlanningFailure | InvalidPlanStructure | ColumnNotFound | JoinTableNotInPlan
            | ExecutionFailed | ExecutorCrash | ExecutionTimeout | ServiceUnavailable => {
                Severity::Error
            }
            SchemaFallbackUsed | PlanFeedback => Severity::Warning,
        }
    }

    /// Whether this code drives the subgraph retry/refine loop by default.
    pub fn default_retryable(self) -> bool {
        matches!(
            self,
            PipelineErrorCode::PlanningFailure
                | PipelineErrorCode::InvalidPlanStructure
                | PipelineErrorCode::ColumnNotFound
                | PipelineErrorCode::JoinTableNotInPlan
                | PipelineErrorCode::ServiceUnavailable
        )
    }
}

/// A first-class pipeline error value, accumulated into `state.errors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineError {
    pub code: PipelineErrorCode,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
}

impl PipelineError {
    /// Construct a `PipelineError` with the code's default severity/retryable flags.
    pub fn new(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: code.default_severity(),
            message: message.into(),
            details: None,
            retryable: code.default_retryable(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}): {}", self.code, self.severity, self.message)
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_severity_matches_taxonomy() {
        assert_eq!(
            PipelineErrorCode::SecurityViolation.default_severity(),
            Severity::Critical
        );
        assert_eq!(
            PipelineErrorCode::ColumnNotFound.default_severity(),
            Severity::Error
        );
        assert_eq!(
            PipelineErrorCode::PlanFeedback.default_severity(),
            Severity::Warning
        );
    }

    #[test]
    fn retryable_codes_drive_refine_loop() {
        assert!(PipelineErrorCode::ColumnNotFound.default_retryable());
        assert!(!PipelineErrorCode::SecurityViolation.default_retryable());
        assert!(!PipelineErrorCode::ExecutionFailed.default_retryable());
    }

    #[test]
    fn display_renders_screaming_case_code() {
        let err = PipelineError::new(PipelineErrorCode::ColumnNotFound, "customer_name_x");
        assert!(err.to_string().starts_with("COLUMN_NOT_FOUND"));
    }
}
