//! Output destinations for a decoded structure sequence.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::info;

use crate::config::LayoutConfig;
use crate::container::{HierarchicalContainer, NpyTreeContainer};
use crate::mirror::write_mirror;
use crate::structure::Structure;
use crate::writer::write_hierarchy;

/// What one sink wrote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: &'static str,
    pub structures: usize,
    /// Batch groups written; zero for sinks without batching.
    pub batches: usize,
}

/// A pass that consumes the full structure sequence once and publishes one
/// output. A failed pass must not leave output behind that looks complete.
pub trait StructureSink: Send {
    fn name(&self) -> &'static str;

    fn consume(&mut self, structures: &[Structure], pb: Option<&ProgressBar>)
    -> Result<SinkReport>;
}

/// Writes the batched npy tree.
#[derive(Clone, Debug)]
pub struct HierarchicalSink {
    pub path: PathBuf,
    pub layout: LayoutConfig,
    pub overwrite: bool,
}

impl StructureSink for HierarchicalSink {
    fn name(&self) -> &'static str {
        "container"
    }

    fn consume(
        &mut self,
        structures: &[Structure],
        pb: Option<&ProgressBar>,
    ) -> Result<SinkReport> {
        let mut container = NpyTreeContainer::create(&self.path, self.overwrite)?;
        let summary = write_hierarchy(&mut container, structures, &self.layout, pb)
            .with_context(|| format!("failed to write container {}", self.path.display()))?;
        container
            .close()
            .with_context(|| format!("failed to publish container {}", self.path.display()))?;
        info!(
            "Wrote {} with {} batch(es)",
            self.path.display(),
            summary.batches
        );
        Ok(SinkReport {
            sink: self.name(),
            structures: summary.configs,
            batches: summary.batches,
        })
    }
}

/// Writes every structure to the SQLite mirror keyed by position.
#[derive(Clone, Debug)]
pub struct MirrorSink {
    pub path: PathBuf,
    pub overwrite: bool,
}

impl StructureSink for MirrorSink {
    fn name(&self) -> &'static str {
        "mirror"
    }

    fn consume(
        &mut self,
        structures: &[Structure],
        pb: Option<&ProgressBar>,
    ) -> Result<SinkReport> {
        let records = write_mirror(&self.path, structures, self.overwrite, pb)?;
        info!("Wrote {} with {} records", self.path.display(), records);
        Ok(SinkReport {
            sink: self.name(),
            structures: records as usize,
            batches: 0,
        })
    }
}
