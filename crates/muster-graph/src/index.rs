//! Per-run adjacency index over one inventory's membership graph.
//!
//! The index is rebuilt from fresh edge snapshots on every aggregation
//! run; nothing here is cached across runs. All closure traversals use a
//! frontier plus a visited set, so they terminate on any cyclic input
//! without recursion.

use muster_core::{GroupId, HostId};
use std::collections::{HashMap, HashSet};

/// Adjacency mappings for one inventory, keyed by group id.
#[derive(Debug, Default)]
pub struct GraphIndex {
    /// group → hosts directly in the group
    group_hosts: HashMap<GroupId, HashSet<HostId>>,
    /// group → groups it is a member of
    group_parents: HashMap<GroupId, HashSet<GroupId>>,
    /// group → groups that are members of it (inverse of parents)
    group_children: HashMap<GroupId, HashSet<GroupId>>,
}

impl GraphIndex {
    /// An index over no edges at all (used for smart inventories).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the three adjacency maps from raw edge snapshots.
    ///
    /// Each relation is consumed in a single pass; the children map is the
    /// inverse of the parents map, built from the same pass. An edge whose
    /// endpoints are not both known members of the inventory is discarded,
    /// so identifiers leaking in from another inventory can never join the
    /// graph.
    pub fn build(
        group_host_edges: &[(GroupId, HostId)],
        group_parent_edges: &[(GroupId, GroupId)],
        group_ids: &HashSet<GroupId>,
        host_ids: &HashSet<HostId>,
    ) -> Self {
        let mut index = Self::default();
        for &(group, host) in group_host_edges {
            if !group_ids.contains(&group) || !host_ids.contains(&host) {
                continue;
            }
            index.group_hosts.entry(group).or_default().insert(host);
        }
        for &(child, parent) in group_parent_edges {
            if !group_ids.contains(&child) || !group_ids.contains(&parent) {
                continue;
            }
            index.group_parents.entry(child).or_default().insert(parent);
            index
                .group_children
                .entry(parent)
                .or_default()
                .insert(child);
        }
        index
    }

    /// Direct child groups of `group`.
    pub fn children_of(&self, group: GroupId) -> impl Iterator<Item = GroupId> + '_ {
        self.group_children
            .get(&group)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Direct hosts of `group`.
    pub fn hosts_of(&self, group: GroupId) -> impl Iterator<Item = HostId> + '_ {
        self.group_hosts
            .get(&group)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Whether `group` has no parent within the inventory.
    pub fn is_root(&self, group: GroupId) -> bool {
        self.group_parents
            .get(&group)
            .map_or(true, |parents| parents.is_empty())
    }

    /// The root groups among `groups` (members with no parent).
    pub fn roots(&self, groups: impl IntoIterator<Item = GroupId>) -> Vec<GroupId> {
        groups.into_iter().filter(|&g| self.is_root(g)).collect()
    }

    /// All groups reachable from `group` via child edges.
    ///
    /// The group itself is excluded unless a cycle leads back to it.
    pub fn all_children(&self, group: GroupId) -> HashSet<GroupId> {
        let (children, _) = self.descendants(group);
        children
    }

    /// All groups reachable from `group` via parent edges.
    ///
    /// The group itself is excluded unless a cycle leads back to it.
    pub fn all_parents(&self, group: GroupId) -> HashSet<GroupId> {
        let mut parents = HashSet::new();
        let mut checked = HashSet::new();
        let mut frontier = vec![group];
        while let Some(current) = frontier.pop() {
            if !checked.insert(current) {
                continue;
            }
            if let Some(direct) = self.group_parents.get(&current) {
                parents.extend(direct.iter().copied());
                frontier.extend(direct.iter().copied().filter(|p| !checked.contains(p)));
            }
        }
        parents
    }

    /// All hosts associated with `group` or any of its descendants.
    pub fn all_hosts(&self, group: GroupId) -> HashSet<HostId> {
        let (_, hosts) = self.descendants(group);
        hosts
    }

    /// The full descendant closure of `group`: every group below it and
    /// every host reachable through those groups, in one walk.
    pub fn descendants(&self, group: GroupId) -> (HashSet<GroupId>, HashSet<HostId>) {
        let mut child_ids = HashSet::new();
        let mut host_ids = HashSet::new();
        let mut checked = HashSet::new();
        let mut frontier = vec![group];
        while let Some(current) = frontier.pop() {
            if !checked.insert(current) {
                continue;
            }
            if let Some(children) = self.group_children.get(&current) {
                child_ids.extend(children.iter().copied());
                frontier.extend(children.iter().copied().filter(|c| !checked.contains(c)));
            }
            if let Some(hosts) = self.group_hosts.get(&current) {
                host_ids.extend(hosts.iter().copied());
            }
        }
        (child_ids, host_ids)
    }

    /// All groups a host belongs to, directly or through parent edges,
    /// given the groups it is a direct member of.
    pub fn host_memberships(&self, direct_groups: &HashSet<GroupId>) -> HashSet<GroupId> {
        let mut memberships = direct_groups.clone();
        let mut checked = HashSet::new();
        let mut frontier: Vec<GroupId> = direct_groups.iter().copied().collect();
        while let Some(current) = frontier.pop() {
            if !checked.insert(current) {
                continue;
            }
            if let Some(parents) = self.group_parents.get(&current) {
                memberships.extend(parents.iter().copied());
                frontier.extend(parents.iter().copied().filter(|p| !checked.contains(p)));
            }
        }
        memberships
    }
}
