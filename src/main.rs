use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use wp_ops::app::{App, Command};
use wp_ops::utils::logging;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Append logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Decide what would change without touching anything
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    logging::init(log_level, cli.log_file.as_deref());
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    log::info!("Starting wp-ops v{}{}", env!("CARGO_PKG_VERSION"), if cli.dry_run { " (dry run)" } else { "" });

    let app = App::new(cli.config.as_deref(), cli.dry_run)?;
    let summary = app.run(&cli.command)?;

    log::info!("Done: {} changed, {} failed", summary.changed, summary.failed);
    if summary.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}
