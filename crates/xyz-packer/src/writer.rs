//! Map batches of structures onto the grouped container layout.
//!
//! ```text
//! /                          drop_last = false
//! /config_batch_{k}/config_{i}/
//!     positions (N,3) f64, atomic_numbers (N,) i64, cell (3,3) f64,
//!     pbc (3,) bool, weight (1,) f64, config_type scalar string
//!     properties/        per-atom fields and numeric metadata
//!     property_weights/  empty
//! ```

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::{debug, info, warn};

use crate::batch::{Batch, assemble_batches};
use crate::config::LayoutConfig;
use crate::container::{Dataset, GroupPath, HierarchicalContainer, is_valid_entry_name};
use crate::structure::{FieldData, MetaValue, PerAtomField, Structure};

pub const BATCH_PREFIX: &str = "config_batch_";
pub const CONFIG_PREFIX: &str = "config_";
pub const PROPERTIES_GROUP: &str = "properties";
pub const PROPERTY_WEIGHTS_GROUP: &str = "property_weights";

/// Metadata key that overrides the default `config_type`.
pub const CONFIG_TYPE_KEY: &str = "config_type";
/// Metadata key that overrides the default `weight`.
pub const CONFIG_WEIGHT_KEY: &str = "config_weight";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub batches: usize,
    pub configs: usize,
    pub atoms: usize,
    /// Metadata entries left out because of a name clash or invalid name.
    pub skipped_metadata: usize,
}

/// Write every structure into `container` using `layout`.
///
/// The container is left open; the caller decides whether to close it. Any
/// container failure aborts the write.
pub fn write_hierarchy<C: HierarchicalContainer>(
    container: &mut C,
    structures: &[Structure],
    layout: &LayoutConfig,
    pb: Option<&ProgressBar>,
) -> Result<WriteSummary> {
    layout.validate()?;
    let root = GroupPath::root();
    container
        .set_attribute(&root, "drop_last", &MetaValue::Bool(false))
        .context("failed to set root attributes")?;

    let batches = assemble_batches(structures, layout.batch_size)?;
    let mut summary = WriteSummary::default();
    for batch in &batches {
        write_batch(container, &root, batch, layout, &mut summary, pb)?;
        summary.batches += 1;
    }
    info!(
        "Wrote {} configs ({} atoms) in {} batch(es)",
        summary.configs, summary.atoms, summary.batches
    );
    Ok(summary)
}

fn write_batch<C: HierarchicalContainer>(
    container: &mut C,
    root: &GroupPath,
    batch: &Batch<'_>,
    layout: &LayoutConfig,
    summary: &mut WriteSummary,
    pb: Option<&ProgressBar>,
) -> Result<()> {
    let name = format!("{BATCH_PREFIX}{}", batch.index);
    let group = container
        .create_group(root, &name)
        .with_context(|| format!("failed to create batch group {name}"))?;
    debug!("Writing {} with {} configs", group, batch.len());
    for (i, structure) in batch.structures.iter().enumerate() {
        let config = container.create_group(&group, &format!("{CONFIG_PREFIX}{i}"))?;
        summary.skipped_metadata += write_config(container, &config, structure, layout)
            .with_context(|| format!("failed to write {config}"))?;
        summary.configs += 1;
        summary.atoms += structure.n_atoms();
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    Ok(())
}

/// Write one `config_{i}` group; returns the number of skipped metadata keys.
fn write_config<C: HierarchicalContainer>(
    container: &mut C,
    config: &GroupPath,
    structure: &Structure,
    layout: &LayoutConfig,
) -> Result<usize> {
    let n = structure.n_atoms() as u64;
    let positions: Vec<f64> = structure.positions().iter().flatten().copied().collect();
    container.create_dataset(config, "positions", &Dataset::f64(vec![n, 3], positions)?)?;
    container.create_dataset(
        config,
        "atomic_numbers",
        &Dataset::i64(vec![n], structure.atomic_numbers().to_vec())?,
    )?;
    let cell: Vec<f64> = structure.cell().iter().flatten().copied().collect();
    container.create_dataset(config, "cell", &Dataset::f64(vec![3, 3], cell)?)?;
    container.create_dataset(config, "pbc", &Dataset::bool(vec![3], structure.pbc().to_vec())?)?;
    container.create_dataset(
        config,
        "weight",
        &Dataset::f64(vec![1], vec![config_weight(structure, layout)])?,
    )?;
    container.create_dataset(
        config,
        "config_type",
        &Dataset::scalar_string(config_type(structure, layout))?,
    )?;

    let properties = container.create_group(config, PROPERTIES_GROUP)?;
    let mut skipped = 0usize;
    for (name, field) in structure.per_atom_fields() {
        if !is_valid_entry_name(name) {
            warn!("{config}: per-atom field '{name}' has an unusable name; skipped");
            skipped += 1;
            continue;
        }
        container.create_dataset(&properties, name, &field_dataset(field, structure.n_atoms())?)?;
    }

    for (key, value) in structure.metadata() {
        if is_override(key, value) {
            continue;
        }
        if !is_valid_entry_name(key) {
            warn!("{config}: metadata key '{key}' has an unusable name; skipped");
            skipped += 1;
            continue;
        }
        match value.as_numeric() {
            Some(values) => {
                if structure.per_atom_fields().contains_key(key) {
                    warn!("{config}: metadata '{key}' clashes with a per-atom field; skipped");
                    skipped += 1;
                    continue;
                }
                let shape = vec![values.len() as u64];
                container.create_dataset(&properties, key, &Dataset::f64(shape, values)?)?;
            }
            None => container.set_attribute(config, key, value)?,
        }
    }
    container.create_group(config, PROPERTY_WEIGHTS_GROUP)?;
    Ok(skipped)
}

/// Whether a metadata entry is consumed as the `config_type` or weight of its config.
fn is_override(key: &str, value: &MetaValue) -> bool {
    match key {
        CONFIG_TYPE_KEY => value.as_str().is_some(),
        CONFIG_WEIGHT_KEY => value.as_numeric().is_some_and(|v| v.len() == 1),
        _ => false,
    }
}

fn config_type<'a>(structure: &'a Structure, layout: &'a LayoutConfig) -> &'a str {
    structure
        .metadata()
        .get(CONFIG_TYPE_KEY)
        .and_then(MetaValue::as_str)
        .unwrap_or(layout.config_type.as_str())
}

fn config_weight(structure: &Structure, layout: &LayoutConfig) -> f64 {
    match structure.metadata().get(CONFIG_WEIGHT_KEY).and_then(MetaValue::as_numeric) {
        Some(values) if values.len() == 1 => values[0],
        _ => layout.weight,
    }
}

fn field_dataset(field: &PerAtomField, n_atoms: usize) -> Result<Dataset> {
    let shape = field.shape(n_atoms);
    match &field.data {
        FieldData::Real(v) => Dataset::f64(shape, v.clone()),
        FieldData::Int(v) => Dataset::i64(shape, v.clone()),
        FieldData::Bool(v) => Dataset::bool(shape, v.clone()),
        FieldData::Str(v) => Dataset::strings(shape, v),
    }
}
