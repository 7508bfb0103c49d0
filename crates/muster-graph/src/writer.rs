//! Diff-and-persist for computed fields.
//!
//! Every write of computed state goes through an explicit field-by-field
//! diff: unchanged fields are dropped, an empty diff produces no write at
//! all, and batches are capped so no single pass touches an unbounded
//! number of records at once.

use crate::store::{InventoryStore, StoreError};
use muster_core::{GroupComputed, GroupId, HostComputed, HostId, InventoryComputed, InventoryId};
use tracing::debug;

/// Records written per batch.
pub const WRITE_BATCH_SIZE: usize = 500;

macro_rules! diff_field {
    ($diff:expr, $field:ident, $current:expr, $target:expr) => {
        if $current.$field != $target.$field {
            $diff.$field = Some($target.$field);
        }
    };
}

macro_rules! apply_field {
    ($diff:expr, $field:ident, $computed:expr) => {
        if let Some(value) = $diff.$field {
            $computed.$field = value;
        }
    };
}

/// Changed computed fields for one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostDiff {
    pub has_active_failures: Option<bool>,
    pub has_inventory_sources: Option<bool>,
}

impl HostDiff {
    pub fn between(current: &HostComputed, target: &HostComputed) -> Self {
        let mut diff = Self::default();
        diff_field!(diff, has_active_failures, current, target);
        diff_field!(diff, has_inventory_sources, current, target);
        diff
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, computed: &mut HostComputed) {
        apply_field!(self, has_active_failures, computed);
        apply_field!(self, has_inventory_sources, computed);
    }
}

/// Changed computed fields for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupDiff {
    pub total_hosts: Option<u64>,
    pub has_active_failures: Option<bool>,
    pub hosts_with_active_failures: Option<u64>,
    pub total_groups: Option<u64>,
    pub groups_with_active_failures: Option<u64>,
    pub has_inventory_sources: Option<bool>,
}

impl GroupDiff {
    pub fn between(current: &GroupComputed, target: &GroupComputed) -> Self {
        let mut diff = Self::default();
        diff_field!(diff, total_hosts, current, target);
        diff_field!(diff, has_active_failures, current, target);
        diff_field!(diff, hosts_with_active_failures, current, target);
        diff_field!(diff, total_groups, current, target);
        diff_field!(diff, groups_with_active_failures, current, target);
        diff_field!(diff, has_inventory_sources, current, target);
        diff
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, computed: &mut GroupComputed) {
        apply_field!(self, total_hosts, computed);
        apply_field!(self, has_active_failures, computed);
        apply_field!(self, hosts_with_active_failures, computed);
        apply_field!(self, total_groups, computed);
        apply_field!(self, groups_with_active_failures, computed);
        apply_field!(self, has_inventory_sources, computed);
    }
}

/// Changed roll-up fields for one inventory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InventoryDiff {
    pub has_active_failures: Option<bool>,
    pub total_hosts: Option<u64>,
    pub hosts_with_active_failures: Option<u64>,
    pub total_groups: Option<u64>,
    pub groups_with_active_failures: Option<u64>,
    pub has_inventory_sources: Option<bool>,
    pub total_inventory_sources: Option<u64>,
    pub inventory_sources_with_failures: Option<u64>,
}

impl InventoryDiff {
    pub fn between(current: &InventoryComputed, target: &InventoryComputed) -> Self {
        let mut diff = Self::default();
        diff_field!(diff, has_active_failures, current, target);
        diff_field!(diff, total_hosts, current, target);
        diff_field!(diff, hosts_with_active_failures, current, target);
        diff_field!(diff, total_groups, current, target);
        diff_field!(diff, groups_with_active_failures, current, target);
        diff_field!(diff, has_inventory_sources, current, target);
        diff_field!(diff, total_inventory_sources, current, target);
        diff_field!(diff, inventory_sources_with_failures, current, target);
        diff
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, computed: &mut InventoryComputed) {
        apply_field!(self, has_active_failures, computed);
        apply_field!(self, total_hosts, computed);
        apply_field!(self, hosts_with_active_failures, computed);
        apply_field!(self, total_groups, computed);
        apply_field!(self, groups_with_active_failures, computed);
        apply_field!(self, has_inventory_sources, computed);
        apply_field!(self, total_inventory_sources, computed);
        apply_field!(self, inventory_sources_with_failures, computed);
    }
}

/// Applies precomputed diffs and target values to stored records.
pub struct ComputedFieldWriter<'a> {
    store: &'a InventoryStore,
}

impl<'a> ComputedFieldWriter<'a> {
    pub fn new(store: &'a InventoryStore) -> Self {
        Self { store }
    }

    /// Applies host diffs in batches. Each entry names the host's owning
    /// inventory, which for smart-inventory runs is not the inventory
    /// being aggregated. Returns the number of hosts written.
    pub fn apply_host_diffs(
        &self,
        diffs: &[(InventoryId, HostId, HostDiff)],
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for batch in diffs.chunks(WRITE_BATCH_SIZE) {
            for &(owner, host_id, diff) in batch {
                if diff.is_empty() {
                    continue;
                }
                let mut host = self.store.host(owner, host_id)?;
                diff.apply(&mut host.computed);
                self.store.save_host(&host)?;
                written += 1;
            }
        }
        if written > 0 {
            debug!(hosts = written, "applied host computed-field updates");
        }
        Ok(written)
    }

    /// Writes group targets in batches, diffing each against the stored
    /// record and skipping groups whose fields all match. Returns the
    /// number of groups written.
    pub fn write_group_updates(
        &self,
        inventory: InventoryId,
        updates: &[(GroupId, GroupComputed)],
    ) -> Result<usize, StoreError> {
        let mut written = 0;
        for batch in updates.chunks(WRITE_BATCH_SIZE) {
            for &(group_id, target) in batch {
                let mut group = self.store.group(inventory, group_id)?;
                let diff = GroupDiff::between(&group.computed, &target);
                if diff.is_empty() {
                    continue;
                }
                diff.apply(&mut group.computed);
                self.store.save_group(&group)?;
                written += 1;
            }
        }
        if written > 0 {
            debug!(groups = written, "applied group computed-field updates");
        }
        Ok(written)
    }

    /// Writes the inventory roll-up. The canonical row is re-read
    /// immediately before the write to narrow (not eliminate) the race
    /// window against concurrent writers. Returns whether a write was
    /// issued.
    pub fn write_inventory_update(
        &self,
        inventory: InventoryId,
        target: &InventoryComputed,
    ) -> Result<bool, StoreError> {
        let mut record = self.store.inventory(inventory)?;
        let diff = InventoryDiff::between(&record.computed, target);
        if diff.is_empty() {
            return Ok(false);
        }
        diff.apply(&mut record.computed);
        self.store.save_inventory(&record)?;
        Ok(true)
    }
}
