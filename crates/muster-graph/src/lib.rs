//! Muster Graph - Inventory aggregation engine
//!
//! This crate keeps an inventory's denormalized statistics consistent
//! with its membership graph. The graph is directed and may be cyclic;
//! every traversal here is a frontier walk over per-run adjacency maps,
//! so runs terminate on any input and recompute from a fresh snapshot
//! each time.
//!
//! # Architecture
//!
//! One aggregation run flows through four stages:
//! 1. [`GraphIndex`] — adjacency maps from bulk edge reads
//! 2. [`depth::sequence`] — deepest-first processing order for groups
//! 3. [`AggregationEngine`] — host pass, group pass, inventory roll-up
//! 4. [`ComputedFieldWriter`] — field-level diffs, batched writes
//!
//! [`CascadingDeleter`] runs independently: mark-and-sweep removal of a
//! group and its orphaned descendants in one transaction, followed by a
//! queued re-aggregation.
//!
//! # Example
//!
//! ```no_run
//! use muster_graph::{AggregationEngine, InventoryStore};
//! use muster_core::InventoryKind;
//!
//! let store = InventoryStore::open(".muster").unwrap();
//! let inventory = store.create_inventory("prod", InventoryKind::Standard).unwrap();
//! let outcome = AggregationEngine::new(&store)
//!     .update_computed_fields(inventory.id)
//!     .unwrap();
//! println!("{} hosts updated", outcome.hosts_updated);
//! ```

mod aggregate;
mod delete;
pub mod depth;
mod export;
mod index;
mod notify;
mod store;
mod writer;

pub use aggregate::{AggregationEngine, AggregationOutcome, RunContext};
pub use delete::{CascadingDeleter, DeleteError, DeleteOutcome};
pub use export::{export_script_data, parse_slice_params, ExportError, ExportOptions, SliceError};
pub use index::GraphIndex;
pub use notify::{
    job_channel, InventoryStatus, Job, JobQueue, JobRunner, StatusBroadcaster, StatusEvent,
};
pub use store::{InventoryStore, StoreError};
pub use writer::{ComputedFieldWriter, GroupDiff, HostDiff, InventoryDiff, WRITE_BATCH_SIZE};
