pub mod batch;
pub mod config;
pub mod container;
pub mod decoder;
pub mod elements;
pub mod error;
pub mod header;
pub mod input;
pub mod mirror;
pub mod reader;
pub mod sink;
pub mod structure;
pub mod tokenizer;
pub mod writer;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

pub use config::{LayoutConfig, PackConfig};
pub use decoder::decode_block;
pub use error::{DecodeError, DecodeErrorKind, HeaderError};
pub use sink::{HierarchicalSink, MirrorSink, SinkReport, StructureSink};
pub use structure::{FieldData, MetaValue, PerAtomField, Structure};
pub use tokenizer::{BlockTokenizer, IncompleteBlock, TextBlock, TokenizeReport};

/// Everything one packing job needs.
#[derive(Clone, Debug)]
pub struct PackOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub mirror: Option<PathBuf>,
    pub layout: LayoutConfig,
    pub overwrite: bool,
    pub parallel_sinks: bool,
    pub workers: Option<usize>,
}

#[derive(Debug, Default)]
pub struct PackSummary {
    /// Blocks the tokenizer found.
    pub found: usize,
    pub decoded: usize,
    pub failures: Vec<DecodeError>,
    pub skipped_lines: usize,
    pub incomplete: Vec<IncompleteInput>,
    pub batches: usize,
    pub written: usize,
    pub mirrored: Option<usize>,
}

impl PackSummary {
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Tail block cut off by the end of its source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncompleteInput {
    /// File the block came from; `None` for in-memory lines.
    pub source: Option<PathBuf>,
    pub block: IncompleteBlock,
}

/// Structures decoded from one or more line sequences plus what was dropped
/// on the way. Ordinals keep counting across sources.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    pub structures: Vec<Structure>,
    pub failures: Vec<DecodeError>,
    /// Blocks the tokenizer found.
    pub blocks: usize,
    pub skipped_lines: usize,
    pub incomplete: Vec<IncompleteInput>,
}

impl DecodeOutcome {
    fn decode_source(
        &mut self,
        lines: &[String],
        source: Option<&Path>,
        pb: Option<&ProgressBar>,
        line_offset: usize,
    ) {
        let label = source.map_or_else(|| "input".to_string(), |p| p.display().to_string());
        let mut tokenizer = BlockTokenizer::new(lines);
        while let Some(mut block) = tokenizer.next() {
            block.ordinal += self.blocks;
            match decode_block(&block) {
                Ok(structure) => {
                    debug!(
                        "Parsed structure #{} ({} atoms, {})",
                        block.ordinal,
                        structure.n_atoms(),
                        structure.formula()
                    );
                    self.structures.push(structure);
                }
                Err(err) => {
                    warn!("skipping {err} in {label}");
                    self.failures.push(err);
                }
            }
            if let Some(pb) = pb {
                pb.set_position((line_offset + tokenizer.cursor()) as u64);
            }
        }
        let report: TokenizeReport = tokenizer.report();
        self.blocks += report.blocks;
        self.skipped_lines += report.skipped_lines;
        if let Some(tail) = report.incomplete {
            warn!(
                "incomplete structure at line {} of {label}: {} atoms declared but only {} lines remain; \
                 ignoring the rest of it",
                tail.line + 1,
                tail.declared,
                tail.available
            );
            self.incomplete.push(IncompleteInput {
                source: source.map(Path::to_path_buf),
                block: tail,
            });
        }
    }
}

/// Tokenize `lines` and decode every block, skipping blocks that fail.
pub fn decode_lines(lines: &[String], pb: Option<&ProgressBar>) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    outcome.decode_source(lines, None, pb, 0);
    outcome
}

/// Decode every source in order. Each file is tokenized on its own, so a
/// truncated tail in one file never swallows lines of the next.
pub fn decode_input(input: &input::InputText, pb: Option<&ProgressBar>) -> DecodeOutcome {
    let mut outcome = DecodeOutcome::default();
    let mut offset = 0;
    for source in &input.sources {
        outcome.decode_source(&source.lines, Some(&source.path), pb, offset);
        offset += source.lines.len();
    }
    outcome
}

/// Read, decode and write one input according to `opts`.
pub fn pack_xyz(opts: PackOptions) -> Result<PackSummary> {
    opts.layout.validate()?;
    if opts.workers == Some(0) {
        bail!("workers must be > 0 when specified");
    }
    for target in std::iter::once(&opts.output).chain(opts.mirror.as_ref()) {
        if target.exists() && !opts.overwrite {
            bail!("{} already exists (use --overwrite)", target.display());
        }
    }
    if opts.mirror.as_ref() == Some(&opts.output) {
        bail!("container and mirror must be different paths");
    }

    let input = input::read_input(&opts.input)
        .with_context(|| format!("failed to read input {}", opts.input.display()))?;
    info!(
        "Read {} lines from {} file(s)",
        input.line_count(),
        input.sources.len()
    );

    let pb = default_progress_bar(input.line_count() as u64);
    let outcome = decode_input(&input, Some(&pb));
    pb.finish_with_message("input parsed");
    info!("Found {} structures", outcome.structures.len());
    if outcome.structures.is_empty() {
        warn!("No structures decoded from {}", opts.input.display());
    }

    let mut sinks: Vec<Box<dyn StructureSink>> = vec![Box::new(HierarchicalSink {
        path: opts.output.clone(),
        layout: opts.layout.clone(),
        overwrite: opts.overwrite,
    })];
    if let Some(mirror) = &opts.mirror {
        sinks.push(Box::new(MirrorSink {
            path: mirror.clone(),
            overwrite: opts.overwrite,
        }));
    }

    let structures = &outcome.structures;
    let pb = default_progress_bar((structures.len() * sinks.len()) as u64);
    let reports = if opts.parallel_sinks {
        let mut run = || -> Result<Vec<SinkReport>> {
            sinks
                .par_iter_mut()
                .map(|sink| sink.consume(structures, Some(&pb)))
                .collect()
        };
        match opts.workers {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .context("failed to build rayon thread pool")?
                .install(run)?,
            None => run()?,
        }
    } else {
        sinks
            .iter_mut()
            .map(|sink| sink.consume(structures, Some(&pb)))
            .collect::<Result<Vec<_>>>()?
    };
    pb.finish_with_message("outputs written");

    let mut summary = PackSummary {
        found: outcome.blocks,
        decoded: outcome.structures.len(),
        failures: outcome.failures,
        skipped_lines: outcome.skipped_lines,
        incomplete: outcome.incomplete,
        ..PackSummary::default()
    };
    for report in reports {
        match report.sink {
            "mirror" => summary.mirrored = Some(report.structures),
            _ => {
                summary.batches = report.batches;
                summary.written = report.structures;
            }
        }
    }
    Ok(summary)
}

pub fn default_progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {wide_bar} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb
}
