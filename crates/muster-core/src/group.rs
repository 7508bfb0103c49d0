//! Groups: named nodes that aggregate hosts and other groups.
//!
//! A group participates in two many-to-many relations scoped to its
//! inventory: direct host membership, and the asymmetric parent/child
//! relation between groups ("parents" are the groups this group is a
//! member of, "children" are its members). Neither relation is required
//! to be acyclic.

use crate::id::{GroupId, InventoryId, SourceId};
use crate::vars::{parse_vars, VarMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Denormalized counters kept up to date by the aggregation engine.
///
/// All counts cover the group's full descendant closure, not just direct
/// members.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupComputed {
    /// Hosts directly or indirectly in this group.
    pub total_hosts: u64,
    /// Whether any such host has an active failure.
    pub has_active_failures: bool,
    /// Number of such hosts with active failures.
    pub hosts_with_active_failures: u64,
    /// Child groups contained within this group, transitively.
    pub total_groups: u64,
    /// Number of those child groups with active failures.
    pub groups_with_active_failures: u64,
    /// Whether any cloud source created or updated this group.
    pub has_inventory_sources: bool,
}

/// A named node aggregating hosts and child groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub inventory_id: InventoryId,
    /// Unique within the owning inventory.
    pub name: String,
    /// Group variables as JSON text.
    pub variables: String,
    /// Sources that created or modified this group.
    pub source_ids: BTreeSet<SourceId>,
    pub computed: GroupComputed,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl Group {
    pub fn new(id: GroupId, inventory_id: InventoryId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            inventory_id,
            name: name.into(),
            variables: String::new(),
            source_ids: BTreeSet::new(),
            computed: GroupComputed::default(),
            created: now,
            modified: now,
        }
    }

    /// The group's variables, parsed from the stored text.
    pub fn variables_dict(&self) -> VarMap {
        parse_vars(&self.variables)
    }
}
