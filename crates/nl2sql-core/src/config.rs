//! Pipeline configuration: every tunable the orchestrator exposes, with
//! defaults matching the reference numbers exactly. Loaded from TOML by
//! `nl2sql-cli`/`nl2sql-server`; flags and env vars override file values at
//! the binary boundary, not here.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_sec: f64,
    pub max_delay_sec: f64,
    pub jitter_sec: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_sec: 0.5,
            max_delay_sec: 8.0,
            jitter_sec: 0.25,
        }
    }
}

impl RetryConfig {
    /// `min(max_delay, base * 2^retry_count) + uniform(0, jitter)`.
    pub fn backoff_seconds(&self, retry_count: u32) -> f64 {
        let exp = self.base_delay_sec * 2f64.powi(retry_count as i32);
        let bounded = exp.min(self.max_delay_sec);
        bounded + rand::Rng::gen_range(&mut rand::thread_rng(), 0.0..=self.jitter_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubgraphConfig {
    pub max_retries: u32,
    pub retry: RetryConfig,
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Similarity threshold above which schema-level retrieval is considered
    /// confident (L1 = datasource/table candidate selection).
    pub l1_threshold: f64,
    /// Similarity threshold for column-level retrieval (L2).
    pub l2_threshold: f64,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            l1_threshold: 0.55,
            l2_threshold: 0.35,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub row_limit_default: u64,
    pub max_bytes_default: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            row_limit_default: 1000,
            max_bytes_default: 50_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_sec: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_sec: 30.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub llm: BreakerConfig,
    pub vector: BreakerConfig,
    pub db: BreakerConfig,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            llm: BreakerConfig::default(),
            vector: BreakerConfig::default(),
            db: BreakerConfig::default(),
        }
    }
}

/// Whether a disagreement between a caller-supplied `schema_version` and the
/// resolver's latest-known version is a warning or a terminating failure.
/// Every run picks one of exactly these two — no silent third state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaVersionMismatchPolicy {
    Warn,
    Fail,
}

impl Default for SchemaVersionMismatchPolicy {
    fn default() -> Self {
        Self::Warn
    }
}

/// Top-level pipeline configuration. Every field carries the same default
/// the pipeline runs with when no config file is supplied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub global_timeout_seconds: u64,
    pub subgraph: SubgraphConfig,
    pub vector: VectorConfig,
    pub limits: LimitsConfig,
    pub breakers: BreakersConfig,
    pub schema_version_mismatch_policy: SchemaVersionMismatchPolicy,
    /// If false, the `LogicalValidator`'s column-resolution check downgrades
    /// `COLUMN_NOT_FOUND` to a warning instead of a retryable error.
    pub logical_validator_strict_columns: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            global_timeout_seconds: 30,
            subgraph: SubgraphConfig::default(),
            vector: VectorConfig::default(),
            limits: LimitsConfig::default(),
            breakers: BreakersConfig::default(),
            schema_version_mismatch_policy: SchemaVersionMismatchPolicy::default(),
            logical_validator_strict_columns: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }
}
