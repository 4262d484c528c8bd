use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, warn};
use npyz::{DType, TypeStr, WriterBuilder};

use super::{ArrayData, Dataset, GroupPath, HierarchicalContainer, check_entry_name};
use crate::structure::MetaValue;

/// Per-group attribute sidecar inside an npy tree.
pub const ATTRS_FILE: &str = ".attrs.json";

/// Directory-backed container: groups are directories, datasets are `.npy`
/// files and attributes are collected into one `.attrs.json` per group.
///
/// Everything is written under `<path>.partial` and renamed to `<path>` by
/// [`close`](HierarchicalContainer::close). Dropping the container without
/// closing it deletes the staging directory.
pub struct NpyTreeContainer {
    final_path: PathBuf,
    staging: PathBuf,
    overwrite: bool,
    attributes: BTreeMap<GroupPath, BTreeMap<String, MetaValue>>,
    closed: bool,
}

impl NpyTreeContainer {
    /// Start a new tree that will be published at `path`.
    pub fn create(path: &Path, overwrite: bool) -> Result<Self> {
        if path.exists() && !overwrite {
            bail!("{} already exists (use --overwrite)", path.display());
        }
        let staging = staging_path(path);
        if staging.exists() {
            fs::remove_dir_all(&staging)
                .with_context(|| format!("failed to remove stale {}", staging.display()))?;
        }
        fs::create_dir_all(&staging)
            .with_context(|| format!("failed to create {}", staging.display()))?;
        let mut attributes = BTreeMap::new();
        attributes.insert(GroupPath::root(), BTreeMap::new());
        Ok(Self {
            final_path: path.to_path_buf(),
            staging,
            overwrite,
            attributes,
            closed: false,
        })
    }

    fn dir_of(&self, group: &GroupPath) -> PathBuf {
        group
            .segments()
            .fold(self.staging.clone(), |dir, seg| dir.join(seg))
    }

    fn existing_dir(&self, group: &GroupPath) -> Result<PathBuf> {
        if !self.attributes.contains_key(group) {
            bail!("group {group} does not exist");
        }
        Ok(self.dir_of(group))
    }

    fn flush_attributes(&self) -> Result<()> {
        for (group, attrs) in &self.attributes {
            if attrs.is_empty() {
                continue;
            }
            let path = self.dir_of(group).join(ATTRS_FILE);
            let mut file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let json = serde_json::to_string_pretty(attrs)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl HierarchicalContainer for NpyTreeContainer {
    fn create_group(&mut self, parent: &GroupPath, name: &str) -> Result<GroupPath> {
        check_entry_name(name)?;
        let dir = self.existing_dir(parent)?.join(name);
        fs::create_dir(&dir).with_context(|| format!("failed to create group {}", dir.display()))?;
        let path = parent.child(name);
        self.attributes.insert(path.clone(), BTreeMap::new());
        Ok(path)
    }

    fn create_dataset(&mut self, group: &GroupPath, name: &str, dataset: &Dataset) -> Result<()> {
        check_entry_name(name)?;
        let dir = self.existing_dir(group)?;
        if dir.join(name).exists() {
            bail!("{} already exists as a group", group.child(name));
        }
        let path = dir.join(format!("{name}.npy"));
        if path.exists() {
            bail!("dataset {} already exists", group.child(name));
        }
        write_npy(&path, dataset)
            .with_context(|| format!("failed to write dataset {}", group.child(name)))
    }

    fn set_attribute(&mut self, target: &GroupPath, key: &str, value: &MetaValue) -> Result<()> {
        check_entry_name(key)?;
        self.attributes
            .get_mut(target)
            .ok_or_else(|| anyhow!("group {target} does not exist"))?
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.flush_attributes()?;
        if self.final_path.exists() {
            if !self.overwrite {
                bail!("{} appeared while writing", self.final_path.display());
            }
            let removed = if self.final_path.is_dir() {
                fs::remove_dir_all(&self.final_path)
            } else {
                fs::remove_file(&self.final_path)
            };
            removed.with_context(|| format!("failed to remove {}", self.final_path.display()))?;
        }
        fs::rename(&self.staging, &self.final_path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                self.staging.display(),
                self.final_path.display()
            )
        })?;
        self.closed = true;
        debug!("Published npy tree at {}", self.final_path.display());
        Ok(())
    }
}

impl Drop for NpyTreeContainer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.staging) {
            warn!(
                "failed to remove unfinished container {}: {err}",
                self.staging.display()
            );
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

fn plain_dtype(descr: &str) -> Result<DType> {
    let ts: TypeStr = descr
        .parse()
        .map_err(|err| anyhow!("invalid dtype '{descr}': {err}"))?;
    Ok(DType::Plain(ts))
}

/// Write one dataset as a little-endian `.npy` file.
pub(crate) fn write_npy(path: &Path, dataset: &Dataset) -> Result<()> {
    let file = BufWriter::new(
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
    );
    let shape = dataset.shape();
    match dataset.data() {
        ArrayData::F64(values) => {
            let mut w = npyz::WriteOptions::new()
                .dtype(plain_dtype("<f8")?)
                .shape(shape)
                .writer(file)
                .begin_nd()?;
            w.extend(values.iter().copied())?;
            w.finish()?;
        }
        ArrayData::I64(values) => {
            let mut w = npyz::WriteOptions::new()
                .dtype(plain_dtype("<i8")?)
                .shape(shape)
                .writer(file)
                .begin_nd()?;
            w.extend(values.iter().copied())?;
            w.finish()?;
        }
        ArrayData::Bool(values) => {
            let mut w = npyz::WriteOptions::new()
                .dtype(plain_dtype("|b1")?)
                .shape(shape)
                .writer(file)
                .begin_nd()?;
            w.extend(values.iter().copied())?;
            w.finish()?;
        }
        ArrayData::Bytes { width, items } => {
            let mut w = npyz::WriteOptions::<[u8]>::new()
                .dtype(plain_dtype(&format!("|S{width}"))?)
                .shape(shape)
                .writer(file)
                .begin_nd()?;
            let mut padded = vec![0u8; *width];
            for item in items {
                padded.fill(0);
                padded[..item.len()].copy_from_slice(item);
                w.push(&padded[..])?;
            }
            w.finish()?;
        }
    }
    Ok(())
}
