//! Persistent inventory storage.
//!
//! Records are bincode-encoded into sled trees, one tree per record kind
//! plus one per association. Keys are big-endian id bytes prefixed with
//! the owning inventory id, so every per-inventory read is a single prefix
//! scan and an edge can only ever exist inside one inventory.

use chrono::Utc;
use muster_core::{
    Group, GroupId, Host, HostId, Inventory, InventoryId, InventoryKind, InventorySource,
    SourceId, SourceKind,
};
use sled::transaction::TransactionError;
use sled::{Batch, Db, Transactional, Tree};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("inventory {0} not found")]
    InventoryNotFound(InventoryId),
    #[error("group {0} not found in inventory {1}")]
    GroupNotFound(GroupId, InventoryId),
    #[error("host {0} not found in inventory {1}")]
    HostNotFound(HostId, InventoryId),
    #[error("a group cannot be its own parent")]
    SelfParent,
    #[error("inventory {0} is not a smart inventory")]
    NotSmartInventory(InventoryId),
    #[error("transaction aborted")]
    TransactionAborted,
}

fn scoped_key(inventory: InventoryId, id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&inventory.to_bytes());
    key[8..].copy_from_slice(&id.to_be_bytes());
    key
}

fn edge_key(inventory: InventoryId, from: u64, to: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..8].copy_from_slice(&inventory.to_bytes());
    key[8..16].copy_from_slice(&from.to_be_bytes());
    key[16..].copy_from_slice(&to.to_be_bytes());
    key
}

/// Splits the two trailing ids out of an edge key.
fn edge_ids(key: &[u8]) -> Option<(u64, u64)> {
    if key.len() != 24 {
        return None;
    }
    let from = u64::from_be_bytes(key[8..16].try_into().ok()?);
    let to = u64::from_be_bytes(key[16..24].try_into().ok()?);
    Some((from, to))
}

/// The sled-backed store for inventories, their graphs and their sources.
pub struct InventoryStore {
    db: Db,
    inventories: Tree,
    groups: Tree,
    hosts: Tree,
    sources: Tree,
    /// (inventory, group, host) membership edges.
    group_host_edges: Tree,
    /// (inventory, child, parent) edges: child is a member of parent.
    group_parent_edges: Tree,
    /// (smart inventory, owning inventory, host) smart membership entries,
    /// maintained by the external filter engine.
    smart_memberships: Tree,
}

impl InventoryStore {
    /// Opens or creates a store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Ok(Self {
            inventories: db.open_tree("inventories")?,
            groups: db.open_tree("groups")?,
            hosts: db.open_tree("hosts")?,
            sources: db.open_tree("sources")?,
            group_host_edges: db.open_tree("group_host_edges")?,
            group_parent_edges: db.open_tree("group_parent_edges")?,
            smart_memberships: db.open_tree("smart_memberships")?,
            db,
        })
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_id(&self) -> Result<u64, StoreError> {
        // sled ids start at 0; records use 1-based ids
        Ok(self.db.generate_id()? + 1)
    }

    // ---- inventories ----

    pub fn create_inventory(
        &self,
        name: impl Into<String>,
        kind: InventoryKind,
    ) -> Result<Inventory, StoreError> {
        let inventory = Inventory::new(InventoryId(self.next_id()?), name, kind);
        self.inventories
            .insert(inventory.id.to_bytes(), bincode::serialize(&inventory)?)?;
        Ok(inventory)
    }

    pub fn inventory(&self, id: InventoryId) -> Result<Inventory, StoreError> {
        match self.inventories.get(id.to_bytes())? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(StoreError::InventoryNotFound(id)),
        }
    }

    pub fn inventories(&self) -> Result<Vec<Inventory>, StoreError> {
        let mut result = Vec::new();
        for entry in self.inventories.iter() {
            let (_, bytes) = entry?;
            result.push(bincode::deserialize(&bytes)?);
        }
        Ok(result)
    }

    pub fn save_inventory(&self, inventory: &Inventory) -> Result<(), StoreError> {
        let mut record = inventory.clone();
        record.modified = Utc::now();
        self.inventories
            .insert(record.id.to_bytes(), bincode::serialize(&record)?)?;
        Ok(())
    }

    /// Removes an inventory and every record scoped to it, including smart
    /// membership entries pointing at its hosts from other inventories.
    pub fn delete_inventory(&self, id: InventoryId) -> Result<(), StoreError> {
        let prefix = id.to_bytes();
        for tree in [
            &self.groups,
            &self.hosts,
            &self.sources,
            &self.group_host_edges,
            &self.group_parent_edges,
            &self.smart_memberships,
        ] {
            let mut batch = Batch::default();
            for entry in tree.scan_prefix(prefix) {
                let (key, _) = entry?;
                batch.remove(key);
            }
            tree.apply_batch(batch)?;
        }
        // Memberships held by other smart inventories over this
        // inventory's hosts carry the owner id in the key's middle slot.
        let mut batch = Batch::default();
        for entry in self.smart_memberships.iter() {
            let (key, _) = entry?;
            if key.len() == 24 && key[8..16] == prefix {
                batch.remove(key);
            }
        }
        self.smart_memberships.apply_batch(batch)?;
        self.inventories.remove(prefix)?;
        Ok(())
    }

    // ---- groups ----

    pub fn create_group(
        &self,
        inventory: InventoryId,
        name: impl Into<String>,
    ) -> Result<Group, StoreError> {
        self.inventory(inventory)?;
        let group = Group::new(GroupId(self.next_id()?), inventory, name);
        self.groups.insert(
            scoped_key(inventory, group.id.0),
            bincode::serialize(&group)?,
        )?;
        Ok(group)
    }

    pub fn group(&self, inventory: InventoryId, id: GroupId) -> Result<Group, StoreError> {
        match self.groups.get(scoped_key(inventory, id.0))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(StoreError::GroupNotFound(id, inventory)),
        }
    }

    pub fn groups(&self, inventory: InventoryId) -> Result<Vec<Group>, StoreError> {
        let mut result = Vec::new();
        for entry in self.groups.scan_prefix(inventory.to_bytes()) {
            let (_, bytes) = entry?;
            result.push(bincode::deserialize(&bytes)?);
        }
        Ok(result)
    }

    pub fn save_group(&self, group: &Group) -> Result<(), StoreError> {
        let mut record = group.clone();
        record.modified = Utc::now();
        self.groups.insert(
            scoped_key(record.inventory_id, record.id.0),
            bincode::serialize(&record)?,
        )?;
        Ok(())
    }

    // ---- hosts ----

    pub fn create_host(
        &self,
        inventory: InventoryId,
        name: impl Into<String>,
    ) -> Result<Host, StoreError> {
        self.inventory(inventory)?;
        let host = Host::new(HostId(self.next_id()?), inventory, name);
        self.hosts
            .insert(scoped_key(inventory, host.id.0), bincode::serialize(&host)?)?;
        Ok(host)
    }

    pub fn host(&self, inventory: InventoryId, id: HostId) -> Result<Host, StoreError> {
        match self.hosts.get(scoped_key(inventory, id.0))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Err(StoreError::HostNotFound(id, inventory)),
        }
    }

    pub fn hosts(&self, inventory: InventoryId) -> Result<Vec<Host>, StoreError> {
        let mut result = Vec::new();
        for entry in self.hosts.scan_prefix(inventory.to_bytes()) {
            let (_, bytes) = entry?;
            result.push(bincode::deserialize(&bytes)?);
        }
        Ok(result)
    }

    pub fn save_host(&self, host: &Host) -> Result<(), StoreError> {
        let mut record = host.clone();
        record.modified = Utc::now();
        self.hosts.insert(
            scoped_key(record.inventory_id, record.id.0),
            bincode::serialize(&record)?,
        )?;
        Ok(())
    }

    // ---- sources ----

    pub fn create_source(
        &self,
        inventory: InventoryId,
        name: impl Into<String>,
        kind: SourceKind,
    ) -> Result<InventorySource, StoreError> {
        self.inventory(inventory)?;
        let source = InventorySource::new(SourceId(self.next_id()?), inventory, name, kind);
        self.sources.insert(
            scoped_key(inventory, source.id.0),
            bincode::serialize(&source)?,
        )?;
        Ok(source)
    }

    pub fn sources(&self, inventory: InventoryId) -> Result<Vec<InventorySource>, StoreError> {
        let mut result = Vec::new();
        for entry in self.sources.scan_prefix(inventory.to_bytes()) {
            let (_, bytes) = entry?;
            result.push(bincode::deserialize(&bytes)?);
        }
        Ok(result)
    }

    pub fn save_source(&self, source: &InventorySource) -> Result<(), StoreError> {
        let mut record = source.clone();
        record.modified = Utc::now();
        self.sources.insert(
            scoped_key(record.inventory_id, record.id.0),
            bincode::serialize(&record)?,
        )?;
        Ok(())
    }

    // ---- membership edges ----

    /// Adds a direct group→host membership edge.
    ///
    /// Both endpoints must already exist inside `inventory`; an id from
    /// another inventory is reported as not found, so a cross-inventory
    /// edge can never be recorded.
    pub fn add_host_to_group(
        &self,
        inventory: InventoryId,
        group: GroupId,
        host: HostId,
    ) -> Result<(), StoreError> {
        self.group(inventory, group)?;
        self.host(inventory, host)?;
        self.group_host_edges
            .insert(edge_key(inventory, group.0, host.0), &[])?;
        Ok(())
    }

    pub fn remove_host_from_group(
        &self,
        inventory: InventoryId,
        group: GroupId,
        host: HostId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .group_host_edges
            .remove(edge_key(inventory, group.0, host.0))?
            .is_some())
    }

    /// Makes `child` a member of `parent`.
    pub fn add_group_parent(
        &self,
        inventory: InventoryId,
        child: GroupId,
        parent: GroupId,
    ) -> Result<(), StoreError> {
        if child == parent {
            return Err(StoreError::SelfParent);
        }
        self.group(inventory, child)?;
        self.group(inventory, parent)?;
        self.group_parent_edges
            .insert(edge_key(inventory, child.0, parent.0), &[])?;
        Ok(())
    }

    pub fn remove_group_parent(
        &self,
        inventory: InventoryId,
        child: GroupId,
        parent: GroupId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .group_parent_edges
            .remove(edge_key(inventory, child.0, parent.0))?
            .is_some())
    }

    /// One bulk read of the group→host relation for an inventory.
    pub fn group_host_edges(
        &self,
        inventory: InventoryId,
    ) -> Result<Vec<(GroupId, HostId)>, StoreError> {
        let mut result = Vec::new();
        for entry in self.group_host_edges.scan_prefix(inventory.to_bytes()) {
            let (key, _) = entry?;
            if let Some((group, host)) = edge_ids(&key) {
                result.push((GroupId(group), HostId(host)));
            }
        }
        Ok(result)
    }

    /// One bulk read of the group→parent relation for an inventory.
    ///
    /// Pairs are `(child, parent)`: the child group is a member of the
    /// parent group.
    pub fn group_parent_edges(
        &self,
        inventory: InventoryId,
    ) -> Result<Vec<(GroupId, GroupId)>, StoreError> {
        let mut result = Vec::new();
        for entry in self.group_parent_edges.scan_prefix(inventory.to_bytes()) {
            let (key, _) = entry?;
            if let Some((child, parent)) = edge_ids(&key) {
                result.push((GroupId(child), GroupId(parent)));
            }
        }
        Ok(result)
    }

    // ---- smart membership ----

    /// Records that `host` (owned by `owner`) matched a smart inventory's
    /// filter. The lookup table itself is maintained externally; the store
    /// only persists it.
    pub fn add_smart_member(
        &self,
        smart: InventoryId,
        owner: InventoryId,
        host: HostId,
    ) -> Result<(), StoreError> {
        let inventory = self.inventory(smart)?;
        if !inventory.is_smart() {
            return Err(StoreError::NotSmartInventory(smart));
        }
        self.host(owner, host)?;
        let mut key = [0u8; 24];
        key[..8].copy_from_slice(&smart.to_bytes());
        key[8..16].copy_from_slice(&owner.to_bytes());
        key[16..].copy_from_slice(&host.to_bytes());
        self.smart_memberships.insert(key, &[])?;
        Ok(())
    }

    pub fn remove_smart_member(
        &self,
        smart: InventoryId,
        owner: InventoryId,
        host: HostId,
    ) -> Result<bool, StoreError> {
        let mut key = [0u8; 24];
        key[..8].copy_from_slice(&smart.to_bytes());
        key[8..16].copy_from_slice(&owner.to_bytes());
        key[16..].copy_from_slice(&host.to_bytes());
        Ok(self.smart_memberships.remove(key)?.is_some())
    }

    /// Resolves a smart inventory's membership table into host records.
    ///
    /// Entries whose host has since been deleted are skipped.
    pub fn smart_member_hosts(&self, smart: InventoryId) -> Result<Vec<Host>, StoreError> {
        let mut result = Vec::new();
        for entry in self.smart_memberships.scan_prefix(smart.to_bytes()) {
            let (key, _) = entry?;
            let Some((owner, host)) = edge_ids(&key) else {
                continue;
            };
            match self.host(InventoryId(owner), HostId(host)) {
                Ok(record) => result.push(record),
                Err(StoreError::HostNotFound(..)) => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(result)
    }

    // ---- cascade sweep ----

    /// Deletes the marked groups and hosts, every edge touching a marked
    /// node, and any smart membership entries over the marked hosts, as a
    /// single all-or-nothing transaction.
    pub(crate) fn sweep_marked(
        &self,
        inventory: InventoryId,
        marked_groups: &HashSet<GroupId>,
        marked_hosts: &HashSet<HostId>,
        group_host_edges: &[(GroupId, HostId)],
        group_parent_edges: &[(GroupId, GroupId)],
    ) -> Result<(), StoreError> {
        let group_keys: Vec<[u8; 16]> = marked_groups
            .iter()
            .map(|g| scoped_key(inventory, g.0))
            .collect();
        let host_keys: Vec<[u8; 16]> = marked_hosts
            .iter()
            .map(|h| scoped_key(inventory, h.0))
            .collect();
        let gh_keys: Vec<[u8; 24]> = group_host_edges
            .iter()
            .filter(|(g, h)| marked_groups.contains(g) || marked_hosts.contains(h))
            .map(|(g, h)| edge_key(inventory, g.0, h.0))
            .collect();
        let gp_keys: Vec<[u8; 24]> = group_parent_edges
            .iter()
            .filter(|(child, parent)| {
                marked_groups.contains(child) || marked_groups.contains(parent)
            })
            .map(|(child, parent)| edge_key(inventory, child.0, parent.0))
            .collect();
        // Smart membership keys have to be collected outside the
        // transaction; transactional trees cannot be scanned.
        let mut smart_keys: Vec<sled::IVec> = Vec::new();
        for entry in self.smart_memberships.iter() {
            let (key, _) = entry?;
            if key.len() == 24 && key[8..16] == inventory.to_bytes() {
                if let Some((_, host)) = edge_ids(&key) {
                    if marked_hosts.contains(&HostId(host)) {
                        smart_keys.push(key);
                    }
                }
            }
        }

        (
            &self.groups,
            &self.hosts,
            &self.group_host_edges,
            &self.group_parent_edges,
            &self.smart_memberships,
        )
            .transaction(|(groups, hosts, gh, gp, smart)| {
                for key in &group_keys {
                    groups.remove(key.as_slice())?;
                }
                for key in &host_keys {
                    hosts.remove(key.as_slice())?;
                }
                for key in &gh_keys {
                    gh.remove(key.as_slice())?;
                }
                for key in &gp_keys {
                    gp.remove(key.as_slice())?;
                }
                for key in &smart_keys {
                    smart.remove(key.clone())?;
                }
                Ok(())
            })
            .map_err(|err: TransactionError<()>| match err {
                TransactionError::Storage(e) => StoreError::Sled(e),
                TransactionError::Abort(()) => StoreError::TransactionAborted,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store() -> (tempfile::TempDir, InventoryStore) {
        let dir = tempdir().unwrap();
        let store = InventoryStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_inventory_round_trip() {
        let (_dir, store) = open_store();
        let created = store
            .create_inventory("production", InventoryKind::Standard)
            .unwrap();
        let loaded = store.inventory(created.id).unwrap();
        assert_eq!(loaded.name, "production");
        assert_eq!(loaded.kind, InventoryKind::Standard);
        assert!(!loaded.pending_deletion);
    }

    #[test]
    fn test_missing_inventory_errors() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.inventory(InventoryId(42)),
            Err(StoreError::InventoryNotFound(InventoryId(42)))
        ));
    }

    #[test]
    fn test_scans_are_inventory_scoped() {
        let (_dir, store) = open_store();
        let a = store.create_inventory("a", InventoryKind::Standard).unwrap();
        let b = store.create_inventory("b", InventoryKind::Standard).unwrap();
        store.create_host(a.id, "web01").unwrap();
        store.create_host(b.id, "web02").unwrap();
        store.create_host(b.id, "web03").unwrap();

        assert_eq!(store.hosts(a.id).unwrap().len(), 1);
        assert_eq!(store.hosts(b.id).unwrap().len(), 2);
    }

    #[test]
    fn test_cross_inventory_edge_rejected() {
        let (_dir, store) = open_store();
        let a = store.create_inventory("a", InventoryKind::Standard).unwrap();
        let b = store.create_inventory("b", InventoryKind::Standard).unwrap();
        let group = store.create_group(a.id, "web").unwrap();
        let host = store.create_host(b.id, "web01").unwrap();

        // The host lives in inventory b, so inventory a cannot link it.
        assert!(matches!(
            store.add_host_to_group(a.id, group.id, host.id),
            Err(StoreError::HostNotFound(..))
        ));
        assert!(store.group_host_edges(a.id).unwrap().is_empty());
    }

    #[test]
    fn test_self_parent_rejected() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("a", InventoryKind::Standard)
            .unwrap();
        let group = store.create_group(inv.id, "web").unwrap();
        assert!(matches!(
            store.add_group_parent(inv.id, group.id, group.id),
            Err(StoreError::SelfParent)
        ));
    }

    #[test]
    fn test_edge_snapshots() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("a", InventoryKind::Standard)
            .unwrap();
        let parent = store.create_group(inv.id, "all-web").unwrap();
        let child = store.create_group(inv.id, "web-east").unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        store.add_group_parent(inv.id, child.id, parent.id).unwrap();
        store.add_host_to_group(inv.id, child.id, host.id).unwrap();

        assert_eq!(
            store.group_parent_edges(inv.id).unwrap(),
            vec![(child.id, parent.id)]
        );
        assert_eq!(
            store.group_host_edges(inv.id).unwrap(),
            vec![(child.id, host.id)]
        );
    }

    #[test]
    fn test_smart_membership_requires_smart_kind() {
        let (_dir, store) = open_store();
        let standard = store
            .create_inventory("a", InventoryKind::Standard)
            .unwrap();
        let host = store.create_host(standard.id, "web01").unwrap();
        assert!(matches!(
            store.add_smart_member(standard.id, standard.id, host.id),
            Err(StoreError::NotSmartInventory(_))
        ));
    }

    #[test]
    fn test_smart_membership_resolves_hosts() {
        let (_dir, store) = open_store();
        let owner = store
            .create_inventory("all-servers", InventoryKind::Standard)
            .unwrap();
        let smart = store
            .create_inventory("failing", InventoryKind::Smart)
            .unwrap();
        let host = store.create_host(owner.id, "web01").unwrap();
        store.add_smart_member(smart.id, owner.id, host.id).unwrap();

        let members = store.smart_member_hosts(smart.id).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name, "web01");
        // The record still belongs to its owner.
        assert_eq!(members[0].inventory_id, owner.id);
    }

    #[test]
    fn test_delete_inventory_purges_scope() {
        let (_dir, store) = open_store();
        let inv = store
            .create_inventory("a", InventoryKind::Standard)
            .unwrap();
        let group = store.create_group(inv.id, "web").unwrap();
        let host = store.create_host(inv.id, "web01").unwrap();
        store.add_host_to_group(inv.id, group.id, host.id).unwrap();

        store.delete_inventory(inv.id).unwrap();
        assert!(store.inventory(inv.id).is_err());
        assert!(store.groups(inv.id).unwrap().is_empty());
        assert!(store.hosts(inv.id).unwrap().is_empty());
        assert!(store.group_host_edges(inv.id).unwrap().is_empty());
    }
}
