//! Key-indexed mirror of decoded structures in an SQLite file.
//!
//! Each structure is stored under its 0-based position in the decoded sequence,
//! with the full record as JSON plus a couple of columns for quick queries.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use indicatif::ProgressBar;
use log::{debug, warn};
use rusqlite::{Connection, params};

use crate::structure::Structure;

pub const MIRROR_FORMAT: &str = "xyz-packer-mirror/1";

/// Writable mirror store. Records go to `<path>.tmp` inside one transaction and
/// the file is moved to `<path>` on [`close`](Self::close).
pub struct MirrorStore {
    conn: Option<Connection>,
    final_path: PathBuf,
    staging: PathBuf,
    overwrite: bool,
    records: u64,
    published: bool,
}

impl MirrorStore {
    pub fn open(path: &Path, overwrite: bool) -> Result<Self> {
        if path.exists() && !overwrite {
            bail!("{} already exists (use --overwrite)", path.display());
        }
        let staging = staging_path(path);
        if staging.exists() {
            fs::remove_file(&staging)
                .with_context(|| format!("failed to remove stale {}", staging.display()))?;
        }
        let conn = Connection::open(&staging)
            .with_context(|| format!("failed to open {}", staging.display()))?;
        conn.pragma_update(None, "synchronous", &"NORMAL")?;
        conn.execute_batch(
            "
            CREATE TABLE structures (
                id INTEGER PRIMARY KEY,
                natoms INT NOT NULL,
                formula TEXT NOT NULL,
                record TEXT NOT NULL
            );
            CREATE TABLE session (
                meta_key TEXT PRIMARY KEY,
                meta_value TEXT NOT NULL
            );
            BEGIN;
            ",
        )
        .with_context(|| format!("failed to initialise {}", staging.display()))?;
        Ok(Self {
            conn: Some(conn),
            final_path: path.to_path_buf(),
            staging,
            overwrite,
            records: 0,
            published: false,
        })
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| anyhow!("mirror store {} is closed", self.final_path.display()))
    }

    /// Store `structure` under `key`. Keys must be unique.
    pub fn put(&mut self, key: u64, structure: &Structure) -> Result<()> {
        let record = serde_json::to_string(structure)?;
        let id = i64::try_from(key).map_err(|_| anyhow!("mirror key {key} out of range"))?;
        self.conn()?
            .prepare_cached(
                "INSERT INTO structures (id, natoms, formula, record) VALUES (?1, ?2, ?3, ?4)",
            )?
            .execute(params![
                id,
                structure.n_atoms() as i64,
                structure.formula(),
                record
            ])
            .with_context(|| {
                format!(
                    "failed to store structure {key} in {}",
                    self.final_path.display()
                )
            })?;
        self.records += 1;
        Ok(())
    }

    /// Commit, close the connection and publish the file.
    pub fn close(mut self) -> Result<u64> {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| anyhow!("mirror store {} is closed", self.final_path.display()))?;
        conn.execute(
            "INSERT INTO session (meta_key, meta_value) VALUES ('format', ?1), ('records', ?2)",
            params![MIRROR_FORMAT, self.records.to_string()],
        )?;
        conn.execute_batch("COMMIT;")
            .with_context(|| format!("failed to commit {}", self.staging.display()))?;
        conn.close()
            .map_err(|(_, err)| err)
            .with_context(|| format!("failed to close {}", self.staging.display()))?;

        if self.final_path.exists() {
            if !self.overwrite {
                bail!("{} appeared while writing", self.final_path.display());
            }
            fs::remove_file(&self.final_path)
                .with_context(|| format!("failed to remove {}", self.final_path.display()))?;
        }
        fs::rename(&self.staging, &self.final_path).with_context(|| {
            format!(
                "failed to rename {} -> {}",
                self.staging.display(),
                self.final_path.display()
            )
        })?;
        self.published = true;
        debug!(
            "Published mirror {} with {} records",
            self.final_path.display(),
            self.records
        );
        Ok(self.records)
    }
}

impl Drop for MirrorStore {
    fn drop(&mut self) {
        // the connection must be gone before the file can be removed
        drop(self.conn.take());
        if self.published || !self.staging.exists() {
            return;
        }
        if let Err(err) = fs::remove_file(&self.staging) {
            warn!(
                "failed to remove unfinished mirror {}: {err}",
                self.staging.display()
            );
        }
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write `structures` to a new mirror at `path`, keyed by position.
pub fn write_mirror(
    path: &Path,
    structures: &[Structure],
    overwrite: bool,
    pb: Option<&ProgressBar>,
) -> Result<u64> {
    let mut store = MirrorStore::open(path, overwrite)?;
    for (key, structure) in structures.iter().enumerate() {
        store
            .put(key as u64, structure)
            .with_context(|| format!("failed to write mirror {}", path.display()))?;
        if let Some(pb) = pb {
            pb.inc(1);
        }
    }
    store
        .close()
        .with_context(|| format!("failed to publish mirror {}", path.display()))
}

/// Every record of the mirror at `path`, in key order.
pub fn load_mirror(path: &Path) -> Result<Vec<(u64, Structure)>> {
    let conn = open_existing(path)?;
    let mut stmt = conn
        .prepare("SELECT id, record FROM structures ORDER BY id ASC")
        .with_context(|| format!("failed to prepare query for {}", path.display()))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .with_context(|| format!("failed to query {}", path.display()))?;
    let mut out = Vec::new();
    for row in rows {
        let (id, record) = row?;
        let structure: Structure = serde_json::from_str(&record)
            .with_context(|| format!("record {id} in {} is not a structure", path.display()))?;
        out.push((id as u64, structure));
    }
    Ok(out)
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub records: usize,
    pub atoms: usize,
    /// Number of records per chemical formula.
    pub formulas: BTreeMap<String, usize>,
}

/// Counts over the mirror at `path` without decoding the JSON records.
pub fn summarize_mirror(path: &Path) -> Result<MirrorSummary> {
    let conn = open_existing(path)?;
    let mut stmt = conn.prepare("SELECT natoms, formula FROM structures")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
    let mut summary = MirrorSummary::default();
    for row in rows {
        let (natoms, formula) = row?;
        summary.records += 1;
        summary.atoms += natoms as usize;
        *summary.formulas.entry(formula).or_default() += 1;
    }
    Ok(summary)
}

fn open_existing(path: &Path) -> Result<Connection> {
    if !path.exists() {
        bail!("missing mirror {}", path.display());
    }
    Connection::open(path).with_context(|| format!("failed to open {}", path.display()))
}
