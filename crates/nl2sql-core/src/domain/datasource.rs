//! Datasource identity, capability sets, and the adapter request/response shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Capabilities an adapter may advertise. Stored as a set so capability-subset
/// matching (`required ⊆ advertised`) is a plain set operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SupportsSql,
    SupportsSchemaIntrospection,
    SupportsDryRun,
    SupportsCostEstimate,
    SupportsCancellation,
}

pub type CapabilitySet = BTreeSet<Capability>;

/// A registered datasource. Identity is `id`; immutable for the life of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: String,
    pub engine_type: String,
    pub capabilities: CapabilitySet,
}

impl Datasource {
    pub fn new(id: impl Into<String>, engine_type: impl Into<String>, capabilities: CapabilitySet) -> Self {
        Self {
            id: id.into(),
            engine_type: engine_type.into(),
            capabilities,
        }
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        self.capabilities.contains(&cap)
    }
}

/// Resource limits attached to an [`AdapterRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLimits {
    pub row_limit: u64,
    pub byte_limit: u64,
    pub timeout_ms: u64,
}

/// Request handed to an [`crate::adapter::Adapter`]'s `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRequest {
    pub plan_type: String,
    pub payload: String,
    pub limits: RequestLimits,
    pub trace_id: String,
    pub tenant_id: String,
}

impl AdapterRequest {
    pub fn sql(sql: impl Into<String>, limits: RequestLimits, trace_id: impl Into<String>, tenant_id: impl Into<String>) -> Self {
        Self {
            plan_type: "sql".to_string(),
            payload: sql.into(),
            limits,
            trace_id: trace_id.into(),
            tenant_id: tenant_id.into(),
        }
    }
}

/// Standard adapter response: a tabular result, or an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultFrame {
    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            row_count: 0,
            error: None,
        }
    }

    pub fn ok(columns: Vec<String>, rows: Vec<Vec<serde_json::Value>>) -> Self {
        let row_count = rows.len() as u64;
        Self {
            columns,
            rows,
            row_count,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            row_count: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
