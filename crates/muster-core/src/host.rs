//! Hosts: the managed nodes at the leaves of the inventory graph.

use crate::id::{HostId, InventoryId, SourceId};
use crate::vars::{effective_host_name, parse_vars, VarMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Outcome summary of the most recent job run against a host.
///
/// Written by the job-tracking subsystem; the aggregation engine only
/// reads it. The failure flag on a host reflects this summary alone, not
/// any historical aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: u64,
    pub failed: bool,
}

/// Denormalized flags kept up to date by the aggregation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostComputed {
    /// Whether the last job against this host failed.
    pub has_active_failures: bool,
    /// Whether any cloud source created or updated this host.
    pub has_inventory_sources: bool,
}

/// A managed node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: HostId,
    pub inventory_id: InventoryId,
    /// Unique within the owning inventory.
    pub name: String,
    /// Whether this host is available for running jobs.
    pub enabled: bool,
    /// Identifier assigned by a remote inventory source, if any.
    pub instance_id: String,
    /// Host variables as JSON text.
    pub variables: String,
    /// Sources that created or modified this host.
    pub source_ids: BTreeSet<SourceId>,
    /// Most recent job outcome, if any job has run.
    pub last_job_summary: Option<JobSummary>,
    pub computed: HostComputed,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Host {
    pub fn new(id: HostId, inventory_id: InventoryId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            inventory_id,
            name: name.into(),
            enabled: true,
            instance_id: String::new(),
            variables: String::new(),
            source_ids: BTreeSet::new(),
            last_job_summary: None,
            computed: HostComputed::default(),
            created: now,
            modified: now,
        }
    }

    /// The host's variables, parsed from the stored text.
    pub fn variables_dict(&self) -> VarMap {
        parse_vars(&self.variables)
    }

    /// The name actually used to connect to this host.
    pub fn effective_name(&self) -> String {
        effective_host_name(&self.name, &self.variables_dict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_host_defaults() {
        let host = Host::new(HostId(1), InventoryId(1), "db01");
        assert!(host.enabled);
        assert!(host.last_job_summary.is_none());
        assert!(!host.computed.has_active_failures);
    }

    #[test]
    fn test_effective_name_reads_variables() {
        let mut host = Host::new(HostId(1), InventoryId(1), "db01");
        host.variables = r#"{"ansible_host": "192.168.1.5"}"#.to_string();
        assert_eq!(host.effective_name(), "192.168.1.5");
        assert_eq!(host.variables_dict()["ansible_host"], json!("192.168.1.5"));
    }
}
