//! spillway-bench: random block read/write benchmark over spillway disk queues.

mod bench;
mod cli;
mod striping;

use anyhow::Result;
use clap::Parser;
use spillway_io::Diagnostics;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::Cli;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    info!("spillway-bench starting with {:?}", cli);

    let report = bench::run(&cli, &Diagnostics::current())?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        info!(
            "{} requests completed, {} bytes read, {} bytes written, {} errors",
            report.stats.completed(),
            report.stats.bytes_read,
            report.stats.bytes_written,
            report.stats.errors
        );
    }
    Ok(())
}
