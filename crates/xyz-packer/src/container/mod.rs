//! Hierarchical container abstraction used by the dataset writer.
//!
//! The writer only needs four operations: create a group, create a dataset in
//! a group, set an attribute and close. [`NpyTreeContainer`] maps that model
//! onto a directory of `.npy` files; [`MemoryContainer`] keeps everything in
//! ordered maps and is what the schema tests inspect.

mod memory;
mod npy_tree;

use std::fmt;

use anyhow::{Result, bail};

use crate::structure::MetaValue;

pub use memory::{MemoryContainer, MemoryGroup};
pub use npy_tree::{ATTRS_FILE, NpyTreeContainer};

/// Slash separated path of a group; the empty path is the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupPath(String);

impl GroupPath {
    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn child(&self, name: &str) -> Self {
        if self.0.is_empty() {
            Self(name.to_string())
        } else {
            Self(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }
}

impl fmt::Display for GroupPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("/")
        } else {
            write!(f, "/{}", self.0)
        }
    }
}

/// Element storage of a dataset, flattened in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayData {
    F64(Vec<f64>),
    I64(Vec<i64>),
    Bool(Vec<bool>),
    /// Fixed-width byte strings (`|S{width}`), each item at most `width` bytes.
    Bytes { width: usize, items: Vec<Vec<u8>> },
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::F64(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::Bool(v) => v.len(),
            ArrayData::Bytes { items, .. } => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A typed n-dimensional array. An empty `shape` is a scalar holding one element.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    shape: Vec<u64>,
    data: ArrayData,
}

impl Dataset {
    pub fn new(shape: Vec<u64>, data: ArrayData) -> Result<Self> {
        let expected: u64 = shape.iter().product();
        if expected != data.len() as u64 {
            bail!(
                "dataset shape {:?} needs {} elements but {} were supplied",
                shape,
                expected,
                data.len()
            );
        }
        if let ArrayData::Bytes { width, items } = &data {
            if *width == 0 || items.iter().any(|item| item.len() > *width) {
                bail!("byte strings must fit a non-zero width of {width}");
            }
        }
        Ok(Self { shape, data })
    }

    pub fn f64(shape: Vec<u64>, values: Vec<f64>) -> Result<Self> {
        Self::new(shape, ArrayData::F64(values))
    }

    pub fn i64(shape: Vec<u64>, values: Vec<i64>) -> Result<Self> {
        Self::new(shape, ArrayData::I64(values))
    }

    pub fn bool(shape: Vec<u64>, values: Vec<bool>) -> Result<Self> {
        Self::new(shape, ArrayData::Bool(values))
    }

    /// Fixed-width UTF-8 strings; the width is the longest item (at least 1).
    pub fn strings(shape: Vec<u64>, values: &[String]) -> Result<Self> {
        let items: Vec<Vec<u8>> = values.iter().map(|s| s.as_bytes().to_vec()).collect();
        let width = items.iter().map(Vec::len).max().unwrap_or(0).max(1);
        Self::new(shape, ArrayData::Bytes { width, items })
    }

    pub fn scalar_string(value: &str) -> Result<Self> {
        Self::strings(Vec::new(), &[value.to_string()])
    }

    pub fn shape(&self) -> &[u64] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }
}

/// Operations the hierarchical writer needs from a storage backend.
///
/// Every call either succeeds or returns an error that the caller treats as
/// fatal; implementations are not expected to roll back earlier calls. A
/// container that is dropped without [`close`](Self::close) must not leave
/// output that looks complete.
pub trait HierarchicalContainer {
    /// Create `name` under `parent` and return its path. Fails if it exists.
    fn create_group(&mut self, parent: &GroupPath, name: &str) -> Result<GroupPath>;

    /// Create dataset `name` inside `group`. Fails if it exists.
    fn create_dataset(&mut self, group: &GroupPath, name: &str, dataset: &Dataset) -> Result<()>;

    /// Set (or replace) attribute `key` on `target`.
    fn set_attribute(&mut self, target: &GroupPath, key: &str, value: &MetaValue) -> Result<()>;

    /// Flush and publish the container.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}

/// Whether `name` can be used as a group, dataset or attribute name.
///
/// Names become path components in the on-disk tree, so separators, dot
/// prefixes (reserved for sidecar files) and control characters are refused.
pub fn is_valid_entry_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.chars().any(|c| c == '/' || c == '\\' || c.is_control())
}

pub(crate) fn check_entry_name(name: &str) -> Result<()> {
    if !is_valid_entry_name(name) {
        bail!("invalid container entry name '{name}'");
    }
    Ok(())
}
