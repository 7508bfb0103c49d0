//! CLI command implementations.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use muster_core::{vars_to_text, GroupId, InventoryId, InventoryKind, VarMap};
use muster_graph::{
    export_script_data, job_channel, AggregationEngine, CascadingDeleter, ExportOptions,
    InventoryStore, Job, JobQueue, JobRunner, StatusBroadcaster,
};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// List all inventories with their headline counts.
pub fn list(db: &Path) -> Result<()> {
    let store = InventoryStore::open(db)?;
    let inventories = store.inventories()?;
    if inventories.is_empty() {
        println!("No inventories. Run {} to create one", "muster import".cyan());
        return Ok(());
    }
    for inventory in inventories {
        let failures = if inventory.computed.has_active_failures {
            format!("{} failing", inventory.computed.hosts_with_active_failures).red()
        } else {
            "healthy".green()
        };
        println!(
            "  {} {} ({}) - {} hosts, {} groups, {}",
            inventory.id.to_string().cyan(),
            inventory.name,
            inventory.kind,
            inventory.computed.total_hosts,
            inventory.computed.total_groups,
            failures
        );
    }
    Ok(())
}

/// Show one inventory in detail.
pub fn show(db: &Path, inventory: u64) -> Result<()> {
    let store = InventoryStore::open(db)?;
    let record = store.inventory(InventoryId(inventory))?;
    let c = &record.computed;

    println!("{} {} ({})", "Inventory".cyan(), record.name, record.kind);
    if record.pending_deletion {
        println!("  {}", "pending deletion".red());
    }
    println!("  hosts:   {} ({} failing)", c.total_hosts, c.hosts_with_active_failures);
    println!("  groups:  {} ({} failing)", c.total_groups, c.groups_with_active_failures);
    println!(
        "  sources: {} ({} failing)",
        c.total_inventory_sources, c.inventory_sources_with_failures
    );
    for group in store.groups(record.id)? {
        println!(
            "  {} {} - {} hosts, {} groups{}",
            "group".yellow(),
            group.name,
            group.computed.total_hosts,
            group.computed.total_groups,
            if group.computed.has_active_failures {
                format!(", {}", "failing".red())
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// An inventory definition as accepted by `muster import`.
#[derive(Deserialize)]
struct InventoryDefinition {
    name: String,
    #[serde(default)]
    kind: InventoryKind,
    #[serde(default)]
    variables: VarMap,
    #[serde(default)]
    hosts: Vec<HostDefinition>,
    #[serde(default)]
    groups: Vec<GroupDefinition>,
}

#[derive(Deserialize)]
struct HostDefinition {
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    variables: VarMap,
}

fn default_enabled() -> bool {
    true
}

#[derive(Deserialize)]
struct GroupDefinition {
    name: String,
    #[serde(default)]
    variables: VarMap,
    #[serde(default)]
    hosts: Vec<String>,
    #[serde(default)]
    children: Vec<String>,
}

/// Import an inventory from a JSON definition and aggregate it.
pub fn import(db: &Path, file: &Path) -> Result<()> {
    let definition: InventoryDefinition = serde_json::from_str(&fs::read_to_string(file)?)?;
    let store = InventoryStore::open(db)?;

    let mut inventory = store.create_inventory(&definition.name, definition.kind)?;
    inventory.variables = vars_to_text(&definition.variables);
    store.save_inventory(&inventory)?;

    let mut host_ids = std::collections::HashMap::new();
    for host_def in &definition.hosts {
        let mut host = store.create_host(inventory.id, &host_def.name)?;
        host.enabled = host_def.enabled;
        host.variables = vars_to_text(&host_def.variables);
        store.save_host(&host)?;
        host_ids.insert(host_def.name.clone(), host.id);
    }

    let mut group_ids = std::collections::HashMap::new();
    for group_def in &definition.groups {
        let mut group = store.create_group(inventory.id, &group_def.name)?;
        group.variables = vars_to_text(&group_def.variables);
        store.save_group(&group)?;
        group_ids.insert(group_def.name.clone(), group.id);
    }

    // Membership edges once every node exists.
    for group_def in &definition.groups {
        let group_id = group_ids[&group_def.name];
        for host_name in &group_def.hosts {
            let host_id = host_ids
                .get(host_name)
                .ok_or_else(|| format!("unknown host {:?} in group {:?}", host_name, group_def.name))?;
            store.add_host_to_group(inventory.id, group_id, *host_id)?;
        }
        for child_name in &group_def.children {
            let child_id = group_ids
                .get(child_name)
                .ok_or_else(|| format!("unknown group {:?} in group {:?}", child_name, group_def.name))?;
            store.add_group_parent(inventory.id, *child_id, group_id)?;
        }
    }

    AggregationEngine::new(&store).update_computed_fields(inventory.id)?;
    store.flush()?;

    println!(
        "{} Imported inventory {} ({} hosts, {} groups) as id {}",
        "✓".green(),
        definition.name,
        definition.hosts.len(),
        definition.groups.len(),
        inventory.id.to_string().cyan()
    );
    Ok(())
}

/// Recompute the denormalized statistics of an inventory.
pub fn aggregate(db: &Path, inventory: u64) -> Result<()> {
    let store = InventoryStore::open(db)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner.set_message("Aggregating...");

    let outcome = AggregationEngine::new(&store).update_computed_fields(InventoryId(inventory))?;
    store.flush()?;

    spinner.finish_and_clear();
    println!(
        "{} Updated {} hosts, {} groups{}",
        "✓".green(),
        outcome.hosts_updated.to_string().cyan(),
        outcome.groups_updated.to_string().cyan(),
        if outcome.inventory_updated {
            " and the inventory roll-up"
        } else {
            ""
        }
    );
    Ok(())
}

/// Export script data for an inventory.
pub fn export(
    db: &Path,
    inventory: u64,
    output: Option<&Path>,
    hostvars: bool,
    remote_vars: bool,
    all: bool,
    subset: Option<&str>,
) -> Result<()> {
    let store = InventoryStore::open(db)?;
    let mut opts = ExportOptions {
        hostvars,
        remote_vars,
        show_all: all,
        ..Default::default()
    };
    if let Some(token) = subset {
        opts = opts.with_subset(token)?;
    }

    let data = export_script_data(&store, InventoryId(inventory), &opts)?;
    let rendered = serde_json::to_string_pretty(&data)?;
    match output {
        Some(path) => {
            fs::write(path, rendered)?;
            println!("{} Exported to {}", "✓".green(), path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

/// Delete a group and everything orphaned below it.
pub fn delete_group(db: &Path, inventory: u64, group: u64) -> Result<()> {
    let store = InventoryStore::open(db)?;
    let (queue, mut runner) = job_channel();
    let status = StatusBroadcaster::default();
    let deleter = CascadingDeleter::new(&store, &queue, &status);

    let outcome = deleter.delete_group_recursive(InventoryId(inventory), GroupId(group))?;
    println!(
        "{} Deleted {} groups and {} hosts",
        "✓".green(),
        outcome.groups.len().to_string().cyan(),
        outcome.hosts.len().to_string().cyan()
    );

    run_pending_jobs(&store, &mut runner, &queue, &status)?;
    store.flush()?;
    Ok(())
}

/// Schedule an inventory for deletion and run the teardown.
pub fn delete_inventory(db: &Path, inventory: u64) -> Result<()> {
    let store = InventoryStore::open(db)?;
    let (queue, mut runner) = job_channel();
    let status = StatusBroadcaster::default();
    let deleter = CascadingDeleter::new(&store, &queue, &status);

    deleter.schedule_inventory_deletion(InventoryId(inventory))?;
    run_pending_jobs(&store, &mut runner, &queue, &status)?;
    println!("{} Inventory {} deleted", "✓".green(), inventory.to_string().cyan());
    Ok(())
}

/// Drains the follow-up job queue, running each job inline. A worker
/// daemon would do the same in a loop; the CLI settles the queue before
/// returning.
fn run_pending_jobs(
    store: &InventoryStore,
    runner: &mut JobRunner,
    queue: &JobQueue,
    status: &StatusBroadcaster,
) -> Result<()> {
    loop {
        let jobs = runner.drain();
        if jobs.is_empty() {
            return Ok(());
        }
        for job in jobs {
            match job {
                Job::UpdateComputedFields(id) => {
                    AggregationEngine::new(store).update_computed_fields(id)?;
                }
                Job::DeleteInventory(id) => {
                    CascadingDeleter::new(store, queue, status).delete_inventory(id)?;
                }
            }
        }
    }
}
