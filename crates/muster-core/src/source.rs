//! External inventory sources.
//!
//! A source describes where hosts and groups were imported from. Only the
//! cloud-backed kinds count toward the `has_inventory_sources` flags; a
//! manually maintained or file-backed source does not.

use crate::id::{InventoryId, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an inventory source pulls its data from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Hosts entered by hand.
    Manual,
    /// A file, directory or script.
    File,
    /// Sourced from a project under source control.
    Scm,
    /// Amazon EC2.
    Ec2,
    /// Google Compute Engine.
    Gce,
    /// Microsoft Azure Resource Manager.
    AzureRm,
    /// VMware vCenter.
    Vmware,
    /// Red Hat Satellite 6.
    Satellite6,
    /// OpenStack.
    Openstack,
    /// Red Hat Virtualization.
    Rhv,
    /// Another automation controller.
    Controller,
    /// Custom import script.
    Custom,
}

impl SourceKind {
    /// Whether this source kind is a cloud provider.
    pub fn is_cloud(self) -> bool {
        matches!(
            self,
            SourceKind::Ec2
                | SourceKind::Gce
                | SourceKind::AzureRm
                | SourceKind::Vmware
                | SourceKind::Satellite6
                | SourceKind::Openstack
                | SourceKind::Rhv
                | SourceKind::Controller
        )
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Manual => "manual",
            Self::File => "file",
            Self::Scm => "scm",
            Self::Ec2 => "ec2",
            Self::Gce => "gce",
            Self::AzureRm => "azure_rm",
            Self::Vmware => "vmware",
            Self::Satellite6 => "satellite6",
            Self::Openstack => "openstack",
            Self::Rhv => "rhv",
            Self::Controller => "controller",
            Self::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// An external source feeding hosts and groups into one inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventorySource {
    pub id: SourceId,
    pub inventory_id: InventoryId,
    pub name: String,
    pub kind: SourceKind,
    /// Whether the most recent synchronization of this source failed.
    pub last_job_failed: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl InventorySource {
    pub fn new(
        id: SourceId,
        inventory_id: InventoryId,
        name: impl Into<String>,
        kind: SourceKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            inventory_id,
            name: name.into(),
            kind,
            last_job_failed: false,
            created: now,
            modified: now,
        }
    }
}
