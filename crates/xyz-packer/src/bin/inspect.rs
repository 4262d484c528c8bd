use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use env_logger::Env;
use log::info;
use xyz_packer::mirror::summarize_mirror;
use xyz_packer::reader::summarize;

/// Print counts for a packed container and/or mirror.
#[derive(Debug, Parser)]
#[command(author, version, about = "Summarize xyz-pack outputs", long_about = None)]
struct Cli {
    /// Container directory written by xyz-pack
    #[arg(long, value_name = "PATH")]
    container: Option<PathBuf>,

    /// SQLite mirror written by xyz-pack --mirror
    #[arg(long, value_name = "PATH")]
    mirror: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    if cli.container.is_none() && cli.mirror.is_none() {
        bail!("nothing to inspect (use --container and/or --mirror)");
    }
    if let Some(path) = &cli.container {
        let summary = summarize(path)?;
        info!(
            "{}: {} batch(es), {} config(s), {} atom(s), drop_last={:?}",
            path.display(),
            summary.batches,
            summary.configs,
            summary.atoms,
            summary.drop_last
        );
        if let Some(last) = summary.batch_sizes.last() {
            info!("Final batch holds {last} config(s)");
        }
    }
    if let Some(path) = &cli.mirror {
        let summary = summarize_mirror(path)?;
        info!(
            "{}: {} record(s), {} atom(s), {} distinct formula(s)",
            path.display(),
            summary.records,
            summary.atoms,
            summary.formulas.len()
        );
        for (formula, count) in &summary.formulas {
            info!("  {formula}: {count}");
        }
    }
    Ok(())
}
