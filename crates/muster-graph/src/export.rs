//! Inventory snapshot export.
//!
//! Produces the script-data document consumed by automation runners: a
//! top-level mapping from group name to hosts/children/vars, a
//! distinguished "all" entry carrying inventory variables and ungrouped
//! hosts, and an optional `_meta.hostvars` section. The host set can be
//! partitioned into shards with a `slice<N>of<M>` token.

use crate::store::{InventoryStore, StoreError};
use muster_core::{GroupId, HostId, InventoryId};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SliceError {
    #[error("could not parse subset as slice specification")]
    Malformed,
    #[error("slice number must be 1 or higher")]
    NumberTooLow,
    #[error("slice number must be less than total number of slices")]
    NumberTooHigh,
}

/// Parses a `slice<N>of<M>` token into `(number, count)`.
pub fn parse_slice_params(token: &str) -> Result<(usize, usize), SliceError> {
    let rest = token.strip_prefix("slice").ok_or(SliceError::Malformed)?;
    let (number, count) = rest.split_once("of").ok_or(SliceError::Malformed)?;
    let number: usize = number.parse().map_err(|_| SliceError::Malformed)?;
    let count: usize = count.parse().map_err(|_| SliceError::Malformed)?;
    if number > count {
        return Err(SliceError::NumberTooHigh);
    }
    if number < 1 {
        return Err(SliceError::NumberTooLow);
    }
    Ok((number, count))
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Slice(#[from] SliceError),
}

/// Options shaping the exported document.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Include a `_meta.hostvars` section.
    pub hostvars: bool,
    /// Augment hostvars with the remote enablement state and internal id.
    pub remote_vars: bool,
    /// Include disabled hosts.
    pub show_all: bool,
    /// 1-based shard to export.
    pub slice_number: usize,
    /// Total number of shards.
    pub slice_count: usize,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            hostvars: false,
            remote_vars: false,
            show_all: false,
            slice_number: 1,
            slice_count: 1,
        }
    }
}

impl ExportOptions {
    /// Applies a `slice<N>of<M>` token to these options.
    pub fn with_subset(mut self, token: &str) -> Result<Self, SliceError> {
        let (number, count) = parse_slice_params(token)?;
        self.slice_number = number;
        self.slice_count = count;
        Ok(self)
    }
}

/// The contiguous range of `len` items belonging to 1-based shard
/// `number` of `count`; shard sizes differ by at most one.
fn slice_bounds(len: usize, number: usize, count: usize) -> (usize, usize) {
    let base = len / count;
    let remainder = len % count;
    let index = number - 1;
    let start = index * base + index.min(remainder);
    let size = base + usize::from(index < remainder);
    (start, start + size)
}

/// Builds the exportable snapshot of one inventory.
pub fn export_script_data(
    store: &InventoryStore,
    inventory_id: InventoryId,
    opts: &ExportOptions,
) -> Result<Value, ExportError> {
    let inventory = store.inventory(inventory_id)?;

    let mut hosts = if inventory.is_smart() {
        store.smart_member_hosts(inventory_id)?
    } else {
        store.hosts(inventory_id)?
    };
    if !opts.show_all {
        hosts.retain(|host| host.enabled);
    }
    hosts.sort_by(|a, b| a.name.cmp(&b.name));
    if opts.slice_count > 1 {
        let (start, end) = slice_bounds(hosts.len(), opts.slice_number, opts.slice_count);
        hosts = hosts[start..end].to_vec();
    }

    let mut data = Map::new();
    let mut all_group = Map::new();
    let inventory_vars = inventory.variables_dict();
    if !inventory_vars.is_empty() {
        all_group.insert("vars".to_string(), Value::Object(inventory_vars));
    }

    if inventory.is_smart() {
        // A smart inventory has no groups; every member is in "all".
        let names: Vec<Value> = hosts.iter().map(|h| json!(h.name)).collect();
        all_group.insert("hosts".to_string(), Value::Array(names));
    } else {
        let shard_names: HashMap<HostId, &str> = hosts
            .iter()
            .map(|host| (host.id, host.name.as_str()))
            .collect();
        let mut grouped: HashSet<&str> = HashSet::new();

        // Group membership, limited to hosts in the current shard.
        let mut hosts_by_group: HashMap<GroupId, Vec<&str>> = HashMap::new();
        for (group, host) in store.group_host_edges(inventory_id)? {
            if let Some(&name) = shard_names.get(&host) {
                hosts_by_group.entry(group).or_default().push(name);
                grouped.insert(name);
            }
        }

        let groups = store.groups(inventory_id)?;
        let names_by_id: HashMap<GroupId, &str> = groups
            .iter()
            .map(|group| (group.id, group.name.as_str()))
            .collect();
        let mut children_by_parent: HashMap<GroupId, Vec<&str>> = HashMap::new();
        for (child, parent) in store.group_parent_edges(inventory_id)? {
            if let Some(&name) = names_by_id.get(&child) {
                children_by_parent.entry(parent).or_default().push(name);
            }
        }

        for group in &groups {
            let mut host_names: Vec<&str> =
                hosts_by_group.get(&group.id).cloned().unwrap_or_default();
            host_names.sort_unstable();
            let mut child_names: Vec<&str> = children_by_parent
                .get(&group.id)
                .cloned()
                .unwrap_or_default();
            child_names.sort_unstable();
            // Groups with no hosts and no children are left out entirely.
            if host_names.is_empty() && child_names.is_empty() {
                continue;
            }
            data.insert(
                group.name.clone(),
                json!({
                    "hosts": host_names,
                    "children": child_names,
                    "vars": Value::Object(group.variables_dict()),
                }),
            );
        }

        let ungrouped: Vec<Value> = hosts
            .iter()
            .filter(|host| !grouped.contains(host.name.as_str()))
            .map(|host| json!(host.name))
            .collect();
        all_group.insert("hosts".to_string(), Value::Array(ungrouped));
    }

    data.insert("all".to_string(), Value::Object(all_group));

    if opts.hostvars {
        let mut hostvars = Map::new();
        for host in &hosts {
            let mut vars = host.variables_dict();
            if opts.remote_vars {
                vars.insert(
                    "remote_muster_enabled".to_string(),
                    json!(host.enabled.to_string()),
                );
                vars.insert("remote_muster_id".to_string(), json!(host.id.0));
            }
            hostvars.insert(host.name.clone(), Value::Object(vars));
        }
        data.insert("_meta".to_string(), json!({ "hostvars": hostvars }));
    }

    Ok(Value::Object(data))
}
