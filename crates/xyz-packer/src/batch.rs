use anyhow::{Result, bail};

use crate::structure::Structure;

/// A contiguous run of structures sharing one `config_batch_{index}` group.
#[derive(Clone, Copy, Debug)]
pub struct Batch<'a> {
    pub index: usize,
    pub structures: &'a [Structure],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }
}

/// Split `structures` into dense, zero-based batches of `batch_size`.
///
/// The last batch may be short; nothing is ever dropped to align batches.
pub fn assemble_batches(structures: &[Structure], batch_size: usize) -> Result<Vec<Batch<'_>>> {
    if batch_size == 0 {
        bail!("batch_size must be > 0");
    }
    Ok(structures
        .chunks(batch_size)
        .enumerate()
        .map(|(index, structures)| Batch { index, structures })
        .collect())
}
