//! CLI command implementations.

pub mod inspect;
pub mod serve;
pub mod sweep;

use clap::Args;

/// Arguments for the inspect command.
#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Only list expired entries.
    #[arg(long)]
    pub expired: bool,
}

/// Arguments for the sweep command.
#[derive(Debug, Args)]
pub struct SweepArgs {
    /// Report what would be evicted without deleting anything.
    #[arg(long)]
    pub dry_run: bool,
}
