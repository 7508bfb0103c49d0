//! Inventories: the namespaces that scope a graph of groups and hosts.

use crate::id::InventoryId;
use crate::vars::{parse_vars, VarMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How an inventory's host membership is defined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryKind {
    /// Hosts have a direct link to this inventory.
    #[default]
    Standard,
    /// Membership is derived from an externally evaluated host filter and
    /// cached into a lookup table. A smart inventory has no groups.
    Smart,
}

impl std::fmt::Display for InventoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Smart => write!(f, "smart"),
        }
    }
}

/// Denormalized roll-up counters kept up to date by the aggregation engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryComputed {
    /// Whether any host in this inventory has an active failure.
    pub has_active_failures: bool,
    pub total_hosts: u64,
    pub hosts_with_active_failures: u64,
    pub total_groups: u64,
    pub groups_with_active_failures: u64,
    /// Whether any cloud inventory source is configured.
    pub has_inventory_sources: bool,
    pub total_inventory_sources: u64,
    pub inventory_sources_with_failures: u64,
}

/// A named collection of hosts and groups forming one graph scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inventory {
    pub id: InventoryId,
    pub name: String,
    pub kind: InventoryKind,
    /// Inventory variables as JSON text.
    pub variables: String,
    /// Set while the inventory is being torn down; deletion runs
    /// asynchronously after the flag is persisted.
    pub pending_deletion: bool,
    pub computed: InventoryComputed,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Inventory {
    pub fn new(id: InventoryId, name: impl Into<String>, kind: InventoryKind) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            kind,
            variables: String::new(),
            pending_deletion: false,
            computed: InventoryComputed::default(),
            created: now,
            modified: now,
        }
    }

    /// The inventory's variables, parsed from the stored text.
    pub fn variables_dict(&self) -> VarMap {
        parse_vars(&self.variables)
    }

    /// Whether membership comes from the smart-filter lookup table.
    pub fn is_smart(&self) -> bool {
        self.kind == InventoryKind::Smart
    }
}
