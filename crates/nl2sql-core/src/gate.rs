//! Policy / RBAC gate: role-keyed access control with strict
//! `datasource.table` namespacing and fail-closed evaluation.
//!
//! A role maps to a set of allowed datasources and a set of allowed table
//! patterns. Every pattern must be one of `ds_id.table`, `ds_id.*`, or `*` —
//! the loader rejects anything else so a typo can never silently widen
//! access. Evaluation is fail-closed: an absent `ds_id` at check time is a
//! denial, never an allow.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Nl2SqlError, Result};

/// One role's access grant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolePolicy {
    pub allowed_datasources: Vec<String>,
    /// Each entry is `ds_id.table`, `ds_id.*`, or `*`.
    pub allowed_tables: Vec<String>,
}

/// `role_id -> RolePolicy`, validated at load time.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    roles: BTreeMap<String, RolePolicy>,
}

fn validate_table_pattern(pattern: &str) -> Result<()> {
    if pattern == "*" {
        return Ok(());
    }
    if let Some((ds, table)) = pattern.split_once('.') {
        if !ds.is_empty() && !table.is_empty() {
            return Ok(());
        }
    }
    Err(Nl2SqlError::Storage(format!(
        "invalid table pattern '{pattern}': must be 'ds_id.table', 'ds_id.*', or '*'"
    )))
}

impl PolicyEngine {
    /// Load from a role-keyed map, rejecting any non-namespaced table entry.
    pub fn load(roles: BTreeMap<String, RolePolicy>) -> Result<Self> {
        for (role_id, policy) in &roles {
            for pattern in &policy.allowed_tables {
                validate_table_pattern(pattern).map_err(|e| {
                    Nl2SqlError::Storage(format!("role '{role_id}': {e}"))
                })?;
            }
        }
        Ok(Self { roles })
    }

    pub fn empty() -> Self {
        Self { roles: BTreeMap::new() }
    }

    pub fn with_role(mut self, role_id: impl Into<String>, policy: RolePolicy) -> Result<Self> {
        for pattern in &policy.allowed_tables {
            validate_table_pattern(pattern)?;
        }
        self.roles.insert(role_id.into(), policy);
        Ok(self)
    }

    /// Union of `allowed_datasources` across every role the user holds.
    pub fn allowed_datasources(&self, roles: &[String]) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for role_id in roles {
            if let Some(policy) = self.roles.get(role_id) {
                out.extend(policy.allowed_datasources.iter().cloned());
            }
        }
        out
    }

    /// `true` iff some held role grants access to `ds_id.table`.
    ///
    /// Fail-closed: an empty or absent `ds_id` never matches.
    pub fn allowed_table(&self, roles: &[String], ds_id: &str, table: &str) -> bool {
        if ds_id.is_empty() {
            return false;
        }
        for role_id in roles {
            let Some(policy) = self.roles.get(role_id) else { continue };
            if !policy.allowed_datasources.iter().any(|d| d == ds_id) {
                continue;
            }
            for pattern in &policy.allowed_tables {
                if pattern == "*" {
                    return true;
                }
                if let Some((pds, ptable)) = pattern.split_once('.') {
                    if pds == ds_id && (ptable == "*" || ptable == table) {
                        return true;
                    }
                }
            }
        }
        false
    }
}
