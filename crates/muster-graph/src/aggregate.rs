//! The aggregation engine.
//!
//! Recomputes every denormalized counter for one inventory from a fresh
//! snapshot: a per-host pass (plain set arithmetic), a per-group pass
//! (deepest-first closure traversal), and a final inventory roll-up read
//! straight from storage predicates. Runs are idempotent; a second run
//! over unchanged data issues no writes.

use crate::depth;
use crate::index::GraphIndex;
use crate::store::{InventoryStore, StoreError};
use crate::writer::{ComputedFieldWriter, HostDiff};
use muster_core::{
    Group, GroupComputed, GroupId, Host, HostId, Inventory, InventoryComputed, InventoryId,
    InventorySource, SourceId, SourceKind,
};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// Everything one aggregation run works from, loaded up front.
///
/// The context is rebuilt on every run; no state is carried between runs
/// or shared across inventories.
pub struct RunContext {
    pub inventory: Inventory,
    pub hosts: Vec<Host>,
    pub groups: Vec<Group>,
    pub sources: Vec<InventorySource>,
    pub index: GraphIndex,
}

impl RunContext {
    /// Loads a fresh snapshot of an inventory.
    ///
    /// For a smart inventory the host list comes from the membership
    /// lookup table and the graph side stays empty: a smart inventory has
    /// no groups and no sources of its own.
    pub fn load(store: &InventoryStore, id: InventoryId) -> Result<Self, StoreError> {
        let inventory = store.inventory(id)?;
        if inventory.is_smart() {
            return Ok(Self {
                hosts: store.smart_member_hosts(id)?,
                groups: Vec::new(),
                sources: Vec::new(),
                index: GraphIndex::empty(),
                inventory,
            });
        }
        let hosts = store.hosts(id)?;
        let groups = store.groups(id)?;
        let sources = store.sources(id)?;
        let group_ids: HashSet<GroupId> = groups.iter().map(|g| g.id).collect();
        let host_ids: HashSet<HostId> = hosts.iter().map(|h| h.id).collect();
        let index = GraphIndex::build(
            &store.group_host_edges(id)?,
            &store.group_parent_edges(id)?,
            &group_ids,
            &host_ids,
        );
        Ok(Self {
            inventory,
            hosts,
            groups,
            sources,
            index,
        })
    }

    /// Hosts whose most recent job summary reports a failure.
    fn failed_host_ids(&self) -> HashSet<HostId> {
        self.hosts
            .iter()
            .filter(|host| host.last_job_summary.is_some_and(|summary| summary.failed))
            .map(|host| host.id)
            .collect()
    }
}

/// Counts of writes issued by one aggregation run; all zero on a rerun
/// over unchanged data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationOutcome {
    pub hosts_updated: usize,
    pub groups_updated: usize,
    pub inventory_updated: bool,
}

/// Recomputes denormalized counters for inventories.
pub struct AggregationEngine<'a> {
    store: &'a InventoryStore,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(store: &'a InventoryStore) -> Self {
        Self { store }
    }

    /// Runs a full aggregation pass over one inventory.
    pub fn update_computed_fields(
        &self,
        id: InventoryId,
    ) -> Result<AggregationOutcome, StoreError> {
        debug!(inventory = %id, "updating inventory computed fields");
        let started = Instant::now();

        let ctx = RunContext::load(self.store, id)?;
        let hosts_updated = self.update_host_computed_fields(&ctx)?;
        let groups_updated = if ctx.inventory.is_smart() {
            0
        } else {
            self.update_group_computed_fields(&ctx)?
        };
        let inventory_updated = self.update_inventory_rollup(&ctx.inventory)?;

        debug!(
            inventory = %id,
            hosts_updated,
            groups_updated,
            inventory_updated,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "finished updating inventory computed fields"
        );
        Ok(AggregationOutcome {
            hosts_updated,
            groups_updated,
            inventory_updated,
        })
    }

    /// Source kinds for every inventory owning a host in this run. A
    /// smart inventory's members keep the sources of their own owners.
    fn source_kinds(&self, ctx: &RunContext) -> Result<HashMap<SourceId, SourceKind>, StoreError> {
        let mut kinds = HashMap::new();
        let mut seen: HashSet<InventoryId> = HashSet::new();
        for host in &ctx.hosts {
            if seen.insert(host.inventory_id) {
                for source in self.store.sources(host.inventory_id)? {
                    kinds.insert(source.id, source.kind);
                }
            }
        }
        Ok(kinds)
    }

    /// Per-host pass: plain set arithmetic, no graph traversal.
    fn update_host_computed_fields(&self, ctx: &RunContext) -> Result<usize, StoreError> {
        let kinds = self.source_kinds(ctx)?;

        let with_failures = ctx.failed_host_ids();
        let with_cloud: HashSet<HostId> = ctx
            .hosts
            .iter()
            .filter(|host| {
                host.source_ids
                    .iter()
                    .any(|id| kinds.get(id).is_some_and(|kind| kind.is_cloud()))
            })
            .map(|host| host.id)
            .collect();
        let flagged_failed: HashSet<HostId> = ctx
            .hosts
            .iter()
            .filter(|host| host.computed.has_active_failures)
            .map(|host| host.id)
            .collect();
        let flagged_cloud: HashSet<HostId> = ctx
            .hosts
            .iter()
            .filter(|host| host.computed.has_inventory_sources)
            .map(|host| host.id)
            .collect();

        // Set differences against stored state: only hosts whose flags
        // actually flip get a diff entry.
        let mut diffs: HashMap<HostId, HostDiff> = HashMap::new();
        for &id in with_failures.difference(&flagged_failed) {
            diffs.entry(id).or_default().has_active_failures = Some(true);
        }
        for &id in flagged_failed.difference(&with_failures) {
            diffs.entry(id).or_default().has_active_failures = Some(false);
        }
        for &id in with_cloud.difference(&flagged_cloud) {
            diffs.entry(id).or_default().has_inventory_sources = Some(true);
        }
        for &id in flagged_cloud.difference(&with_cloud) {
            diffs.entry(id).or_default().has_inventory_sources = Some(false);
        }

        let owners: HashMap<HostId, InventoryId> = ctx
            .hosts
            .iter()
            .map(|host| (host.id, host.inventory_id))
            .collect();
        let mut updates: Vec<(InventoryId, HostId, HostDiff)> = diffs
            .into_iter()
            .filter_map(|(id, diff)| owners.get(&id).map(|&owner| (owner, id, diff)))
            .collect();
        updates.sort_by_key(|&(_, id, _)| id);

        ComputedFieldWriter::new(self.store).apply_host_diffs(&updates)
    }

    /// Per-group pass in sequencer order, deepest groups first.
    fn update_group_computed_fields(&self, ctx: &RunContext) -> Result<usize, StoreError> {
        let active_hosts: HashSet<HostId> = ctx.hosts.iter().map(|h| h.id).collect();
        let failed_hosts = ctx.failed_host_ids();
        let kinds = self.source_kinds(ctx)?;
        let cloud_groups: HashSet<GroupId> = ctx
            .groups
            .iter()
            .filter(|group| {
                group
                    .source_ids
                    .iter()
                    .any(|id| kinds.get(id).is_some_and(|kind| kind.is_cloud()))
            })
            .map(|group| group.id)
            .collect();

        let roots = ctx.index.roots(ctx.groups.iter().map(|g| g.id));
        let order = depth::sequence(&roots, &ctx.index);

        // Groups found to be failing accumulate here as the pass walks
        // upward; an ancestor's groups_with_active_failures is only valid
        // because its descendants were processed first.
        let mut failed_groups: HashSet<GroupId> = HashSet::new();
        let mut updates: Vec<(GroupId, GroupComputed)> = Vec::with_capacity(order.len());

        for group_id in order {
            let (child_ids, host_ids) = ctx.index.descendants(group_id);
            let failing = failed_hosts.intersection(&host_ids).count() as u64;
            let computed = GroupComputed {
                total_hosts: active_hosts.intersection(&host_ids).count() as u64,
                has_active_failures: failing > 0,
                hosts_with_active_failures: failing,
                total_groups: child_ids.len() as u64,
                groups_with_active_failures: failed_groups.intersection(&child_ids).count()
                    as u64,
                has_inventory_sources: cloud_groups.contains(&group_id),
            };
            if computed.has_active_failures {
                failed_groups.insert(group_id);
            }
            updates.push((group_id, computed));
        }

        ComputedFieldWriter::new(self.store).write_group_updates(ctx.inventory.id, &updates)
    }

    /// Inventory roll-up, computed from fresh storage reads rather than
    /// the run's in-memory maps.
    fn update_inventory_rollup(&self, inventory: &Inventory) -> Result<bool, StoreError> {
        let hosts = if inventory.is_smart() {
            self.store.smart_member_hosts(inventory.id)?
        } else {
            self.store.hosts(inventory.id)?
        };
        let failed_hosts = hosts
            .iter()
            .filter(|h| h.computed.has_active_failures)
            .count() as u64;

        let (total_groups, failed_groups) = if inventory.is_smart() {
            (0, 0)
        } else {
            let groups = self.store.groups(inventory.id)?;
            let failed = groups
                .iter()
                .filter(|g| g.computed.has_active_failures)
                .count() as u64;
            (groups.len() as u64, failed)
        };

        let (total_sources, failed_sources) = if inventory.is_smart() {
            (0, 0)
        } else {
            let cloud: Vec<InventorySource> = self
                .store
                .sources(inventory.id)?
                .into_iter()
                .filter(|s| s.kind.is_cloud())
                .collect();
            let failed = cloud.iter().filter(|s| s.last_job_failed).count() as u64;
            (cloud.len() as u64, failed)
        };

        let computed = InventoryComputed {
            has_active_failures: failed_hosts > 0,
            total_hosts: hosts.len() as u64,
            hosts_with_active_failures: failed_hosts,
            total_groups,
            groups_with_active_failures: failed_groups,
            has_inventory_sources: total_sources > 0,
            total_inventory_sources: total_sources,
            inventory_sources_with_failures: failed_sources,
        };
        ComputedFieldWriter::new(self.store).write_inventory_update(inventory.id, &computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::{InventoryKind, JobSummary};
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, InventoryStore) {
        let dir = tempdir().unwrap();
        let store = InventoryStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn fail_host(store: &InventoryStore, host: &Host) {
        let mut record = host.clone();
        record.last_job_summary = Some(JobSummary {
            job_id: 7,
            failed: true,
        });
        store.save_host(&record).unwrap();
    }

    #[test]
    fn test_host_failure_flag_follows_latest_summary() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        fail_host(&store, &host);

        let engine = AggregationEngine::new(&store);
        engine.update_computed_fields(inv.id).unwrap();
        assert!(store.host(inv.id, host.id).unwrap().computed.has_active_failures);

        // A passing summary clears the flag on the next run.
        let mut record = store.host(inv.id, host.id).unwrap();
        record.last_job_summary = Some(JobSummary {
            job_id: 8,
            failed: false,
        });
        store.save_host(&record).unwrap();
        engine.update_computed_fields(inv.id).unwrap();
        assert!(!store.host(inv.id, host.id).unwrap().computed.has_active_failures);
    }

    #[test]
    fn test_cloud_source_sets_host_flag() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let cloud = store.create_source(inv.id, "aws", SourceKind::Ec2).unwrap();
        let manual = store
            .create_source(inv.id, "by-hand", SourceKind::Manual)
            .unwrap();

        let mut imported = store.create_host(inv.id, "web01").unwrap();
        imported.source_ids.insert(cloud.id);
        store.save_host(&imported).unwrap();
        let mut local = store.create_host(inv.id, "web02").unwrap();
        local.source_ids.insert(manual.id);
        store.save_host(&local).unwrap();

        AggregationEngine::new(&store)
            .update_computed_fields(inv.id)
            .unwrap();
        assert!(
            store
                .host(inv.id, imported.id)
                .unwrap()
                .computed
                .has_inventory_sources
        );
        assert!(
            !store
                .host(inv.id, local.id)
                .unwrap()
                .computed
                .has_inventory_sources
        );
    }

    #[test]
    fn test_group_counters_cover_descendant_closure() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let parent = store.create_group(inv.id, "all-web").unwrap();
        let child = store.create_group(inv.id, "web-east").unwrap();
        store.add_group_parent(inv.id, child.id, parent.id).unwrap();
        let direct = store.create_host(inv.id, "lb01").unwrap();
        let nested = store.create_host(inv.id, "web01").unwrap();
        store.add_host_to_group(inv.id, parent.id, direct.id).unwrap();
        store.add_host_to_group(inv.id, child.id, nested.id).unwrap();
        fail_host(&store, &nested);

        AggregationEngine::new(&store)
            .update_computed_fields(inv.id)
            .unwrap();

        let parent = store.group(inv.id, parent.id).unwrap();
        assert_eq!(parent.computed.total_hosts, 2);
        assert_eq!(parent.computed.total_groups, 1);
        assert_eq!(parent.computed.hosts_with_active_failures, 1);
        assert!(parent.computed.has_active_failures);
        // The failing child was processed first, so the parent sees it.
        assert_eq!(parent.computed.groups_with_active_failures, 1);

        let child = store.group(inv.id, child.id).unwrap();
        assert_eq!(child.computed.total_hosts, 1);
        assert_eq!(child.computed.total_groups, 0);
        assert!(child.computed.has_active_failures);
    }

    #[test]
    fn test_cyclic_graph_aggregates_each_node_once() {
        // A → B → C with a back edge C → A, host only in C.
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let a = store.create_group(inv.id, "a").unwrap();
        let b = store.create_group(inv.id, "b").unwrap();
        let c = store.create_group(inv.id, "c").unwrap();
        store.add_group_parent(inv.id, b.id, a.id).unwrap();
        store.add_group_parent(inv.id, c.id, b.id).unwrap();
        store.add_group_parent(inv.id, a.id, c.id).unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        store.add_host_to_group(inv.id, c.id, host.id).unwrap();

        let ctx = RunContext::load(&store, inv.id).unwrap();
        assert_eq!(
            ctx.index.all_hosts(a.id),
            [host.id].into_iter().collect()
        );

        AggregationEngine::new(&store)
            .update_computed_fields(inv.id)
            .unwrap();
        // No group is a root (the cycle gives every group a parent), so
        // none are sequenced; the inventory roll-up still lands.
        let inv_record = store.inventory(inv.id).unwrap();
        assert_eq!(inv_record.computed.total_hosts, 1);
        assert_eq!(inv_record.computed.total_groups, 3);
    }

    #[test]
    fn test_cycle_below_root_counts_members_once_each() {
        // root → a → b → c → a: the cycle hangs off a proper root, so
        // every member is sequenced. The closure of `a` re-enters `a`.
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let root = store.create_group(inv.id, "root").unwrap();
        let a = store.create_group(inv.id, "a").unwrap();
        let b = store.create_group(inv.id, "b").unwrap();
        let c = store.create_group(inv.id, "c").unwrap();
        store.add_group_parent(inv.id, a.id, root.id).unwrap();
        store.add_group_parent(inv.id, b.id, a.id).unwrap();
        store.add_group_parent(inv.id, c.id, b.id).unwrap();
        store.add_group_parent(inv.id, a.id, c.id).unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        store.add_host_to_group(inv.id, c.id, host.id).unwrap();

        AggregationEngine::new(&store)
            .update_computed_fields(inv.id)
            .unwrap();

        let a_record = store.group(inv.id, a.id).unwrap();
        // b and c each counted exactly once; the back edge also counts a
        // itself, exactly as the closure semantics define.
        assert_eq!(a_record.computed.total_groups, 3);
        assert_eq!(a_record.computed.total_hosts, 1);
        let root_record = store.group(inv.id, root.id).unwrap();
        assert_eq!(root_record.computed.total_hosts, 1);
    }

    #[test]
    fn test_second_run_issues_zero_writes() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap();
        let group = store.create_group(inv.id, "web").unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        store.add_host_to_group(inv.id, group.id, host.id).unwrap();
        fail_host(&store, &host);

        let engine = AggregationEngine::new(&store);
        let first = engine.update_computed_fields(inv.id).unwrap();
        assert!(first.hosts_updated > 0);
        assert!(first.inventory_updated);

        let second = engine.update_computed_fields(inv.id).unwrap();
        assert_eq!(second, AggregationOutcome::default());
    }

    #[test]
    fn test_smart_inventory_skips_groups() {
        let (_dir, store) = open_store();
        let owner = store
            .create_inventory("all-servers", InventoryKind::Standard)
            .unwrap();
        let smart = store
            .create_inventory("failing", InventoryKind::Smart)
            .unwrap();
        let host = store.create_host(owner.id, "web01").unwrap();
        fail_host(&store, &host);
        store.add_smart_member(smart.id, owner.id, host.id).unwrap();

        AggregationEngine::new(&store)
            .update_computed_fields(smart.id)
            .unwrap();

        let record = store.inventory(smart.id).unwrap();
        assert_eq!(record.computed.total_hosts, 1);
        assert_eq!(record.computed.hosts_with_active_failures, 1);
        assert!(record.computed.has_active_failures);
        assert_eq!(record.computed.total_groups, 0);
        assert_eq!(record.computed.total_inventory_sources, 0);
        // The member host itself was updated in its owning inventory.
        assert!(store.host(owner.id, host.id).unwrap().computed.has_active_failures);
    }
}
