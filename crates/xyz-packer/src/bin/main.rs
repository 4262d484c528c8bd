use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Parser;
use env_logger::Env;
use log::{info, warn};
use xyz_packer::{PackConfig, PackOptions, pack_xyz};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Pack concatenated extended-XYZ structures into a batched npy tree"
)]
struct Cli {
    /// Input .xyz/.extxyz file (optionally .gz) or a directory of them
    #[arg(long, value_name = "PATH", env = "XYZ_PACK_INPUT")]
    input: Option<PathBuf>,

    /// Output container directory
    #[arg(long, value_name = "PATH", env = "XYZ_PACK_OUTPUT")]
    output: Option<PathBuf>,

    /// Also mirror every structure into this SQLite file
    #[arg(long, value_name = "PATH", env = "XYZ_PACK_MIRROR")]
    mirror: Option<PathBuf>,

    /// TOML file with job settings; flags override its values
    #[arg(long, value_name = "FILE", env = "XYZ_PACK_CONFIG")]
    config: Option<PathBuf>,

    /// Structures per config_batch group
    #[arg(long, value_name = "N", env = "XYZ_PACK_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// config_type for structures that do not set one
    #[arg(long, value_name = "LABEL", env = "XYZ_PACK_CONFIG_TYPE")]
    config_type: Option<String>,

    /// weight for structures without config_weight
    #[arg(long, value_name = "FLOAT", env = "XYZ_PACK_WEIGHT")]
    weight: Option<f64>,

    /// Overwrite existing outputs if present
    #[arg(long, env = "XYZ_PACK_OVERWRITE")]
    overwrite: bool,

    /// Write the container and the mirror concurrently
    #[arg(long, env = "XYZ_PACK_PARALLEL_SINKS")]
    parallel_sinks: bool,

    /// Number of worker threads for parallel sinks (defaults to Rayon default)
    #[arg(long, value_name = "N", env = "XYZ_PACK_WORKERS")]
    workers: Option<usize>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut cfg = match &cli.config {
        Some(path) => PackConfig::from_toml(path)?,
        None => PackConfig::default(),
    };
    if let Some(n) = cli.batch_size {
        cfg.layout.batch_size = n;
    }
    if let Some(label) = cli.config_type {
        cfg.layout.config_type = label;
    }
    if let Some(w) = cli.weight {
        cfg.layout.weight = w;
    }
    cfg.layout.validate()?;

    let options = PackOptions {
        input: cli
            .input
            .or(cfg.input)
            .ok_or_else(|| anyhow!("no input given (use --input or set it in --config)"))?,
        output: cli
            .output
            .or(cfg.output)
            .ok_or_else(|| anyhow!("no output given (use --output or set it in --config)"))?,
        mirror: cli.mirror.or(cfg.mirror),
        layout: cfg.layout,
        overwrite: cli.overwrite || cfg.overwrite,
        parallel_sinks: cli.parallel_sinks || cfg.parallel_sinks,
        workers: cli.workers.or(cfg.workers),
    };

    let summary = pack_xyz(options)?;
    if summary.failed() > 0 {
        warn!("{} structure(s) could not be decoded", summary.failed());
    }
    for tail in &summary.incomplete {
        let source = tail
            .source
            .as_ref()
            .map_or_else(|| "input".to_string(), |p| p.display().to_string());
        warn!(
            "{source}: truncated structure at line {} was dropped",
            tail.block.line + 1
        );
    }
    info!(
        "Completed packing: {} found, {} decoded, {} failed, {} skipped line(s), {} written in {} batch(es)",
        summary.found,
        summary.decoded,
        summary.failed(),
        summary.skipped_lines,
        summary.written,
        summary.batches
    );
    if let Some(n) = summary.mirrored {
        info!("Mirrored {n} structure(s)");
    }
    Ok(())
}
