//! Muster Core - Inventory data model
//!
//! This crate defines the records the rest of Muster operates on: an
//! inventory scopes a directed (and possibly cyclic) graph of groups and
//! hosts, plus the external sources that feed it. Each record carries a
//! block of denormalized counters maintained by the aggregation engine in
//! `muster-graph`; nothing in this crate computes them.

mod group;
mod host;
mod id;
mod inventory;
mod source;
mod vars;

pub use group::{Group, GroupComputed};
pub use host::{Host, HostComputed, JobSummary};
pub use id::{GroupId, HostId, InventoryId, SourceId};
pub use inventory::{Inventory, InventoryComputed, InventoryKind};
pub use source::{InventorySource, SourceKind};
pub use vars::{effective_host_name, parse_vars, vars_to_text, VarMap};
