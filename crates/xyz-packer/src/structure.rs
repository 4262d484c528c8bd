//! In-memory representation of one decoded atomic configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Scalar or small-array value attached to a structure through its header line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    BoolArray(Vec<bool>),
}

impl MetaValue {
    /// Numeric values (scalars and arrays) widened to `f64`, or `None` for
    /// strings and booleans.
    pub fn as_numeric(&self) -> Option<Vec<f64>> {
        match self {
            MetaValue::Int(v) => Some(vec![*v as f64]),
            MetaValue::Float(v) => Some(vec![*v]),
            MetaValue::IntArray(v) => Some(v.iter().map(|&x| x as f64).collect()),
            MetaValue::FloatArray(v) => Some(v.clone()),
            MetaValue::Bool(_) | MetaValue::Str(_) | MetaValue::BoolArray(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Values of one per-atom column group, stored row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "lowercase")]
pub enum FieldData {
    Real(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl FieldData {
    pub fn len(&self) -> usize {
        match self {
            FieldData::Real(v) => v.len(),
            FieldData::Int(v) => v.len(),
            FieldData::Bool(v) => v.len(),
            FieldData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named per-atom quantity such as forces or charges.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerAtomField {
    /// Columns per atom; a value of 1 means the field is a plain vector.
    pub columns: usize,
    pub data: FieldData,
}

impl PerAtomField {
    /// Logical shape `(N,)` or `(N, columns)`.
    pub fn shape(&self, n_atoms: usize) -> Vec<u64> {
        if self.columns == 1 {
            vec![n_atoms as u64]
        } else {
            vec![n_atoms as u64, self.columns as u64]
        }
    }
}

/// One atomic configuration decoded from an extended-XYZ block.
///
/// Structures are built once by the decoder and never mutated afterwards; the
/// constructor enforces the shared-length invariants so downstream writers can
/// index without re-checking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    positions: Vec<[f64; 3]>,
    atomic_numbers: Vec<i64>,
    cell: [[f64; 3]; 3],
    pbc: [bool; 3],
    per_atom_fields: BTreeMap<String, PerAtomField>,
    metadata: BTreeMap<String, MetaValue>,
}

impl Structure {
    /// Assemble a structure, checking that every per-atom sequence has one
    /// entry per atom and that there is at least one atom.
    pub fn new(
        positions: Vec<[f64; 3]>,
        atomic_numbers: Vec<i64>,
        cell: [[f64; 3]; 3],
        pbc: [bool; 3],
        per_atom_fields: BTreeMap<String, PerAtomField>,
        metadata: BTreeMap<String, MetaValue>,
    ) -> Result<Self, String> {
        let n = positions.len();
        if n == 0 {
            return Err("structure has no atoms".to_string());
        }
        if atomic_numbers.len() != n {
            return Err(format!(
                "{} atomic numbers for {} positions",
                atomic_numbers.len(),
                n
            ));
        }
        for (name, field) in &per_atom_fields {
            if field.columns == 0 || field.data.len() != n * field.columns {
                return Err(format!(
                    "per-atom field '{name}' has {} values, expected {} x {}",
                    field.data.len(),
                    n,
                    field.columns
                ));
            }
        }
        Ok(Self {
            positions,
            atomic_numbers,
            cell,
            pbc,
            per_atom_fields,
            metadata,
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.positions.len()
    }

    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    pub fn atomic_numbers(&self) -> &[i64] {
        &self.atomic_numbers
    }

    pub fn cell(&self) -> &[[f64; 3]; 3] {
        &self.cell
    }

    pub fn pbc(&self) -> [bool; 3] {
        self.pbc
    }

    pub fn per_atom_fields(&self) -> &BTreeMap<String, PerAtomField> {
        &self.per_atom_fields
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetaValue> {
        &self.metadata
    }

    pub fn formula(&self) -> String {
        crate::elements::chemical_formula(&self.atomic_numbers)
    }
}
