//! Muster CLI - Command-line interface for Muster
//!
//! This is the main entry point for users interacting with Muster.
//! It provides commands for importing inventories, running aggregation,
//! exporting script data and deleting graph nodes.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "muster")]
#[command(author = "Muster Contributors")]
#[command(version)]
#[command(about = "Inventory graph aggregation for automation workflows", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the inventory database
    #[arg(long, global = true, default_value = ".muster")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all inventories
    List,

    /// Show an inventory and its computed statistics
    Show {
        /// Inventory id
        inventory: u64,
    },

    /// Import an inventory definition from a JSON file
    Import {
        /// Path to the definition file
        file: PathBuf,
    },

    /// Recompute the denormalized statistics of an inventory
    Aggregate {
        /// Inventory id
        inventory: u64,
    },

    /// Export an inventory as script data
    Export {
        /// Inventory id
        inventory: u64,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Include a _meta.hostvars section
        #[arg(long)]
        hostvars: bool,

        /// Add remote enablement state and internal ids to hostvars
        #[arg(long)]
        remote_vars: bool,

        /// Include disabled hosts
        #[arg(long)]
        all: bool,

        /// Shard selector of the form slice<N>of<M>
        #[arg(long)]
        subset: Option<String>,
    },

    /// Delete a group and its orphaned descendants
    DeleteGroup {
        /// Inventory id
        inventory: u64,

        /// Group id
        group: u64,
    },

    /// Schedule an inventory for deletion and tear it down
    DeleteInventory {
        /// Inventory id
        inventory: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::List => commands::list(&cli.db),
        Commands::Show { inventory } => commands::show(&cli.db, inventory),
        Commands::Import { file } => commands::import(&cli.db, &file),
        Commands::Aggregate { inventory } => commands::aggregate(&cli.db, inventory),
        Commands::Export {
            inventory,
            output,
            hostvars,
            remote_vars,
            all,
            subset,
        } => commands::export(
            &cli.db,
            inventory,
            output.as_deref(),
            hostvars,
            remote_vars,
            all,
            subset.as_deref(),
        ),
        Commands::DeleteGroup { inventory, group } => {
            commands::delete_group(&cli.db, inventory, group)
        }
        Commands::DeleteInventory { inventory } => {
            commands::delete_inventory(&cli.db, inventory)
        }
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
