//! Processing order for group aggregation.
//!
//! Groups are aggregated deepest-first so that a group's descendants are
//! (normally) processed before the group itself. Depth is the longest
//! path from any root; it is an approximation of topological order, not
//! the real thing — see the note on `sequence`.

use crate::index::GraphIndex;
use muster_core::GroupId;
use std::collections::{HashMap, VecDeque};

/// Traversal beyond this many hops from a root is ignored. Cycles deeper
/// than the cap stop accumulating depth instead of looping forever.
pub const MAX_DEPTH: usize = 100;

/// Orders groups by descending maximum depth from any root.
///
/// Breadth-first from every root; each group keeps the largest depth it
/// was reached at, and a revisit that does not improve on the recorded
/// depth is skipped. Groups unreachable from any root (a parentless
/// cycle) are not sequenced at all.
///
/// Depth order can differ from topological order on diamond shapes where
/// an ancestor's depth assignment lags behind a shared descendant's; that
/// ordering is intentional and must not be "fixed" without revisiting the
/// consumers of the group counters.
pub fn sequence(roots: &[GroupId], index: &GraphIndex) -> Vec<GroupId> {
    let mut depths: HashMap<GroupId, usize> = HashMap::new();
    let mut queue: VecDeque<(GroupId, usize)> = roots.iter().map(|&root| (root, 0)).collect();

    while let Some((group, depth)) = queue.pop_front() {
        if depth > MAX_DEPTH {
            continue;
        }
        match depths.get(&group) {
            Some(&known) if known >= depth => continue,
            _ => {}
        }
        depths.insert(group, depth);
        for child in index.children_of(group) {
            queue.push_back((child, depth + 1));
        }
    }

    let mut ordered: Vec<(usize, GroupId)> = depths
        .into_iter()
        .map(|(group, depth)| (depth, group))
        .collect();
    // Deepest first; ties broken by descending id for a stable order.
    ordered.sort_by(|a, b| b.cmp(a));
    ordered.into_iter().map(|(_, group)| group).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use muster_core::HostId;
    use std::collections::HashSet;

    fn index_of(parent_edges: &[(u64, u64)]) -> (GraphIndex, Vec<GroupId>) {
        let mut group_ids: HashSet<GroupId> = HashSet::new();
        for &(child, parent) in parent_edges {
            group_ids.insert(GroupId(child));
            group_ids.insert(GroupId(parent));
        }
        let edges: Vec<(GroupId, GroupId)> = parent_edges
            .iter()
            .map(|&(child, parent)| (GroupId(child), GroupId(parent)))
            .collect();
        let host_ids: HashSet<HostId> = HashSet::new();
        let index = GraphIndex::build(&[], &edges, &group_ids, &host_ids);
        let mut all: Vec<GroupId> = group_ids.into_iter().collect();
        all.sort();
        let roots = index.roots(all);
        (index, roots)
    }

    #[test]
    fn test_chain_orders_deepest_first() {
        // 1 → 2 → 3 (3 is the deepest)
        let (index, roots) = index_of(&[(2, 1), (3, 2)]);
        let order = sequence(&roots, &index);
        assert_eq!(order, vec![GroupId(3), GroupId(2), GroupId(1)]);
    }

    #[test]
    fn test_diamond_takes_maximum_depth() {
        // 1 → 2 → 4 and 1 → 4: group 4 is reachable at depth 1 and 2,
        // and must be sequenced at depth 2, before group 2.
        let (index, roots) = index_of(&[(2, 1), (4, 2), (4, 1)]);
        let order = sequence(&roots, &index);
        assert_eq!(order, vec![GroupId(4), GroupId(2), GroupId(1)]);
    }

    #[test]
    fn test_cycle_terminates() {
        // 1 → 2 → 3 → 1: the back edge keeps increasing candidate depths
        // until the cap; the walk must still terminate.
        let (index, _) = index_of(&[(2, 1), (3, 2), (1, 3)]);
        // No true roots exist; seed from group 1 explicitly.
        let order = sequence(&[GroupId(1)], &index);
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn test_depth_cap_limits_long_chains() {
        // A chain of 105 groups: everything past the cap is left out.
        let edges: Vec<(u64, u64)> = (1..105).map(|n| (n + 1, n)).collect();
        let (index, roots) = index_of(&edges);
        let order = sequence(&roots, &index);
        assert_eq!(order.len(), MAX_DEPTH + 1);
        // The first sequenced group is the deepest one still under the cap.
        assert_eq!(order[0], GroupId(MAX_DEPTH as u64 + 1));
    }

    #[test]
    fn test_parentless_cycle_is_not_sequenced() {
        // 5 ↔ 6 with no root leading in: no group gets a depth.
        let (index, roots) = index_of(&[(5, 6), (6, 5)]);
        assert!(roots.is_empty());
        assert!(sequence(&roots, &index).is_empty());
    }
}
