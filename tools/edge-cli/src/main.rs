//! edge-cdn - Single-node edge caching proxy.
//!
//! Commands:
//! - `edge-cdn` - Run the proxy
//! - `edge-cdn sweep` - Run one eviction sweep and print the report
//! - `edge-cdn inspect` - List stored cache records

mod commands;
mod config;
mod context;
mod output;

use anyhow::{Context as _, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use edge_core::ConfigError;
use edge_observability::init_logging;

use commands::{InspectArgs, SweepArgs};
use config::{FileConfig, ProxyArgs, Settings};

/// Edge caching proxy in front of a single origin
#[derive(Parser)]
#[command(name = "edge-cdn")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    proxy: ProxyArgs,

    /// Use JSON output format for command results
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one eviction sweep and exit
    Sweep(SweepArgs),

    /// List stored cache records
    Inspect(InspectArgs),
}

/// Whether `command` needs the origin; `inspect` only reads local state.
fn requires_origin(command: Option<&Commands>) -> bool {
    !matches!(command, Some(Commands::Inspect(_)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file = match &cli.proxy.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = match Settings::resolve(&cli.proxy, file) {
        Ok(settings) => settings,
        Err(e) => usage_error(&e),
    };
    if requires_origin(cli.command.as_ref()) {
        if let Err(e) = settings.origin() {
            usage_error(&e);
        }
    }

    init_logging(settings.log_format, settings.log_level)
        .context("Failed to initialize logging")?;

    let output = output::Output::new(cli.json);
    let ctx = context::Context::new(settings, output);

    let result = match cli.command {
        None => commands::serve::run(&ctx).await,
        Some(Commands::Sweep(args)) => commands::sweep::run(args, &ctx).await,
        Some(Commands::Inspect(args)) => commands::inspect::run(args, &ctx).await,
    };

    if let Err(e) = result {
        ctx.output.error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

/// Report a configuration error the way clap reports bad flags (exit 2).
fn usage_error(err: &ConfigError) -> ! {
    let kind = match err {
        ConfigError::Missing(_) => ErrorKind::MissingRequiredArgument,
        _ => ErrorKind::InvalidValue,
    };
    Cli::command().error(kind, err).exit()
}
