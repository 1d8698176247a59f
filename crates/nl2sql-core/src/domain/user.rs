//! Caller identity and tenancy, carried through `GraphState` for RBAC checks.

use serde::{Deserialize, Serialize};

/// Identity of the caller driving a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, tenant_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: tenant_id.into(),
            roles,
        }
    }
}
