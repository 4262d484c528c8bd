//! Read a published npy tree back into typed values.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use npyz::{DType, NpyFile};

use crate::container::{ATTRS_FILE, ArrayData, Dataset};
use crate::structure::MetaValue;
use crate::writer::{BATCH_PREFIX, CONFIG_PREFIX, PROPERTIES_GROUP};

/// Everything stored for one `config_{i}` group.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigRecord {
    pub positions: Vec<[f64; 3]>,
    pub atomic_numbers: Vec<i64>,
    pub cell: [[f64; 3]; 3],
    pub pbc: [bool; 3],
    pub weight: f64,
    pub config_type: String,
    pub properties: BTreeMap<String, Dataset>,
    pub attributes: BTreeMap<String, MetaValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeSummary {
    pub batches: usize,
    pub configs: usize,
    pub atoms: usize,
    /// Size of every batch, in batch order.
    pub batch_sizes: Vec<usize>,
    pub drop_last: Option<bool>,
}

/// Load one `.npy` file as a [`Dataset`].
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let npy = NpyFile::new(BufReader::new(file))
        .with_context(|| format!("failed to read {}", path.display()))?;
    let shape = npy.shape().to_vec();
    let descr = match npy.dtype() {
        DType::Plain(ts) => ts.to_string(),
        other => bail!("{}: unsupported dtype {:?}", path.display(), other),
    };
    let data = match descr.as_str() {
        "<f8" => ArrayData::F64(npy.into_vec::<f64>()?),
        "<i8" => ArrayData::I64(npy.into_vec::<i64>()?),
        "|b1" => ArrayData::Bool(npy.into_vec::<bool>()?),
        s if s.starts_with("|S") => {
            let width: usize = s[2..]
                .parse()
                .map_err(|_| anyhow!("{}: bad string dtype {s}", path.display()))?;
            let items = npy
                .into_vec::<Vec<u8>>()?
                .into_iter()
                .map(|mut item| {
                    while item.last() == Some(&0) {
                        item.pop();
                    }
                    item
                })
                .collect();
            ArrayData::Bytes { width, items }
        }
        other => bail!("{}: unsupported dtype {other}", path.display()),
    };
    Dataset::new(shape, data).with_context(|| format!("inconsistent data in {}", path.display()))
}

/// Attributes of the group stored at `dir`; empty when it has none.
pub fn read_attributes(dir: &Path) -> Result<BTreeMap<String, MetaValue>> {
    let path = dir.join(ATTRS_FILE);
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let text =
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn batch_dir(root: &Path, batch: usize) -> PathBuf {
    root.join(format!("{BATCH_PREFIX}{batch}"))
}

pub fn config_dir(root: &Path, batch: usize, index: usize) -> PathBuf {
    batch_dir(root, batch).join(format!("{CONFIG_PREFIX}{index}"))
}

/// Read `config_batch_{batch}/config_{index}` from the tree at `root`.
pub fn read_config(root: &Path, batch: usize, index: usize) -> Result<ConfigRecord> {
    let dir = config_dir(root, batch, index);
    if !dir.is_dir() {
        bail!("{} not found", dir.display());
    }
    let load = |name: &str| read_dataset(&dir.join(format!("{name}.npy")));

    let positions: Vec<[f64; 3]> = match load("positions")?.data() {
        ArrayData::F64(v) => v.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect(),
        _ => bail!("{}: positions must be f64", dir.display()),
    };
    let atomic_numbers = match load("atomic_numbers")?.data() {
        ArrayData::I64(v) => v.clone(),
        _ => bail!("{}: atomic_numbers must be i64", dir.display()),
    };
    let cell = match load("cell")?.data() {
        ArrayData::F64(v) if v.len() == 9 => {
            [[v[0], v[1], v[2]], [v[3], v[4], v[5]], [v[6], v[7], v[8]]]
        }
        _ => bail!("{}: cell must be 3x3 f64", dir.display()),
    };
    let pbc = match load("pbc")?.data() {
        ArrayData::Bool(v) if v.len() == 3 => [v[0], v[1], v[2]],
        _ => bail!("{}: pbc must be 3 bools", dir.display()),
    };
    let weight = match load("weight")?.data() {
        ArrayData::F64(v) if v.len() == 1 => v[0],
        _ => bail!("{}: weight must be one f64", dir.display()),
    };
    let config_type = match load("config_type")?.data() {
        ArrayData::Bytes { items, .. } if items.len() == 1 => String::from_utf8(items[0].clone())
            .with_context(|| format!("{}: config_type is not UTF-8", dir.display()))?,
        _ => bail!("{}: config_type must be a scalar string", dir.display()),
    };

    let mut properties = BTreeMap::new();
    for path in sorted_entries(&dir.join(PROPERTIES_GROUP))? {
        if path.extension().and_then(|e| e.to_str()) != Some("npy") {
            continue;
        }
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow!("bad dataset name {}", path.display()))?
            .to_string();
        properties.insert(name, read_dataset(&path)?);
    }

    Ok(ConfigRecord {
        positions,
        atomic_numbers,
        cell,
        pbc,
        weight,
        config_type,
        properties,
        attributes: read_attributes(&dir)?,
    })
}

/// Count batches, configs and atoms in the tree at `root`.
pub fn summarize(root: &Path) -> Result<TreeSummary> {
    if !root.is_dir() {
        bail!("{} is not a container directory", root.display());
    }
    let drop_last = match read_attributes(root)?.get("drop_last") {
        Some(MetaValue::Bool(b)) => Some(*b),
        _ => None,
    };
    let mut summary = TreeSummary {
        drop_last,
        ..TreeSummary::default()
    };
    let batches = numbered_children(root, BATCH_PREFIX)?;
    for (expected, (k, batch)) in batches.iter().enumerate() {
        if *k != expected {
            bail!("batch indices are not dense: missing {BATCH_PREFIX}{expected}");
        }
        let configs = numbered_children(batch, CONFIG_PREFIX)?;
        for (i, _) in &configs {
            let record = read_dataset(&config_dir(root, *k, *i).join("atomic_numbers.npy"))?;
            summary.atoms += record.data().len();
        }
        summary.batch_sizes.push(configs.len());
        summary.configs += configs.len();
        summary.batches += 1;
    }
    Ok(summary)
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        entries.push(entry?.path());
    }
    entries.sort();
    Ok(entries)
}

/// Child directories named `{prefix}{n}`, sorted by `n`.
fn numbered_children(dir: &Path, prefix: &str) -> Result<Vec<(usize, PathBuf)>> {
    let mut children: Vec<(usize, PathBuf)> = sorted_entries(dir)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| {
            let index = p
                .file_name()?
                .to_str()?
                .strip_prefix(prefix)?
                .parse()
                .ok()?;
            Some((index, p))
        })
        .collect();
    children.sort_by_key(|(index, _)| *index);
    Ok(children)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::tempdir;

    use super::*;
    use crate::config::LayoutConfig;
    use crate::container::{HierarchicalContainer, NpyTreeContainer};
    use crate::structure::{FieldData, PerAtomField, Structure};
    use crate::writer::write_hierarchy;

    fn sample(n: usize, energy: f64) -> Structure {
        let mut fields = BTreeMap::new();
        fields.insert(
            "forces".to_string(),
            PerAtomField {
                columns: 3,
                data: FieldData::Real((0..n * 3).map(|v| v as f64 * 0.1).collect()),
            },
        );
        fields.insert(
            "label".to_string(),
            PerAtomField {
                columns: 1,
                data: FieldData::Str((0..n).map(|i| format!("a{i}")).collect()),
            },
        );
        let mut meta = BTreeMap::new();
        meta.insert("dft_energy".to_string(), MetaValue::Float(energy));
        meta.insert("source".to_string(), MetaValue::Str("manual".into()));
        Structure::new(
            (0..n).map(|i| [i as f64, 1.5, -2.25]).collect(),
            (0..n).map(|i| 1 + i as i64).collect(),
            [[3.0, 0.0, 0.0], [0.5, 3.0, 0.0], [0.0, 0.0, 9.0]],
            [true, false, true],
            fields,
            meta,
        )
        .unwrap()
    }

    #[test]
    fn written_tree_reads_back() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("set.npt");
        let items = vec![sample(2, -1.0), sample(3, -2.0), sample(1, -3.0)];
        let layout = LayoutConfig {
            batch_size: 2,
            ..LayoutConfig::default()
        };
        let mut c = NpyTreeContainer::create(&root, false).unwrap();
        write_hierarchy(&mut c, &items, &layout, None).unwrap();
        c.close().unwrap();

        let summary = summarize(&root).unwrap();
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.batch_sizes, vec![2, 1]);
        assert_eq!(summary.configs, 3);
        assert_eq!(summary.atoms, 6);
        assert_eq!(summary.drop_last, Some(false));

        let rec = read_config(&root, 0, 1).unwrap();
        let original = &items[1];
        assert_eq!(rec.positions, original.positions());
        assert_eq!(rec.atomic_numbers, original.atomic_numbers());
        assert_eq!(&rec.cell, original.cell());
        assert_eq!(rec.pbc, original.pbc());
        assert_eq!(rec.weight, 1.0);
        assert_eq!(rec.config_type, "DFT");
        assert_eq!(
            rec.properties["dft_energy"].data(),
            &ArrayData::F64(vec![-2.0])
        );
        assert_eq!(rec.properties["forces"].shape(), &[3, 3]);
        assert_eq!(
            rec.properties["label"].data(),
            &ArrayData::Bytes {
                width: 2,
                items: vec![b"a0".to_vec(), b"a1".to_vec(), b"a2".to_vec()]
            }
        );
        assert!(!rec.properties.contains_key("source"));
        assert_eq!(
            rec.attributes.get("source"),
            Some(&MetaValue::Str("manual".into()))
        );

        let last = read_config(&root, 1, 0).unwrap();
        assert_eq!(last.positions, items[2].positions());
        assert!(read_config(&root, 1, 1).is_err());
    }

    #[test]
    fn summarize_rejects_missing_directory() {
        let tmp = tempdir().unwrap();
        assert!(summarize(&tmp.path().join("nothing")).is_err());
    }
}
