//! Turn a [`TextBlock`] into a typed [`Structure`].

use std::collections::BTreeMap;

use crate::elements;
use crate::error::{DecodeError, DecodeErrorKind};
use crate::header::{ColumnKind, ColumnSpec, parse_header};
use crate::structure::{FieldData, MetaValue, PerAtomField, Structure};
use crate::tokenizer::TextBlock;

const SPECIES: &str = "species";
const ATOMIC_NUMBER: &str = "Z";
const POSITIONS: &str = "pos";

/// Decode one block, attaching its ordinal and line number to any failure.
pub fn decode_block(block: &TextBlock<'_>) -> Result<Structure, DecodeError> {
    decode_inner(block).map_err(|kind| DecodeError {
        ordinal: block.ordinal,
        line: block.start_line + 1,
        kind,
    })
}

fn decode_inner(block: &TextBlock<'_>) -> Result<Structure, DecodeErrorKind> {
    let count = block.count_line().trim();
    let declared: usize = count
        .parse()
        .map_err(|_| DecodeErrorKind::InvalidCount(count.to_string()))?;
    if declared == 0 {
        return Err(DecodeErrorKind::NoAtoms);
    }
    let atom_lines = block.atom_lines();
    if atom_lines.len() != declared {
        return Err(DecodeErrorKind::AtomCountMismatch {
            declared,
            found: atom_lines.len(),
        });
    }

    let header = parse_header(block.comment())?;
    check_header_finite(header.cell.as_ref(), &header.info)?;
    let layout = ColumnLayout::resolve(&header.properties)?;
    let width = header.row_width();

    let mut columns: Vec<ColumnValues> = header
        .properties
        .iter()
        .map(|spec| ColumnValues::with_capacity(spec, declared))
        .collect();
    for (atom, line) in atom_lines.iter().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != width {
            return Err(DecodeErrorKind::ColumnCount {
                atom,
                expected: width,
                found: tokens.len(),
            });
        }
        let mut offset = 0usize;
        for (spec, values) in header.properties.iter().zip(columns.iter_mut()) {
            for token in &tokens[offset..offset + spec.columns] {
                values.push(spec, atom, token)?;
            }
            offset += spec.columns;
        }
    }

    let mut positions = Vec::with_capacity(declared);
    let mut atomic_numbers = Vec::with_capacity(declared);
    let mut per_atom_fields = BTreeMap::new();
    for (idx, (spec, values)) in header.properties.iter().zip(columns).enumerate() {
        if idx == layout.positions {
            let ColumnValues::Real(flat) = values else {
                unreachable!("positions column validated as real");
            };
            positions.extend(flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));
        } else if idx == layout.element {
            atomic_numbers = match values {
                ColumnValues::Int(z) => checked_atomic_numbers(z)?,
                ColumnValues::Str(symbols) => symbols_to_numbers(&symbols)?,
                _ => unreachable!("element column validated as string or integer"),
            };
        } else {
            per_atom_fields.insert(
                spec.name.clone(),
                PerAtomField {
                    columns: spec.columns,
                    data: values.into_field_data(),
                },
            );
        }
    }

    let pbc = header.pbc.unwrap_or([header.cell.is_some(); 3]);
    let cell = header.cell.unwrap_or([[0.0; 3]; 3]);
    Structure::new(
        positions,
        atomic_numbers,
        cell,
        pbc,
        per_atom_fields,
        header.info,
    )
    .map_err(DecodeErrorKind::Inconsistent)
}

/// Indices of the columns that feed `positions` and `atomic_numbers`.
struct ColumnLayout {
    positions: usize,
    element: usize,
}

impl ColumnLayout {
    fn resolve(specs: &[ColumnSpec]) -> Result<Self, DecodeErrorKind> {
        let positions = specs
            .iter()
            .position(|s| s.name == POSITIONS && s.kind == ColumnKind::Real && s.columns == 3)
            .ok_or(DecodeErrorKind::MissingProperty(POSITIONS))?;
        let species = specs.iter().position(|s| {
            s.name == SPECIES
                && s.columns == 1
                && matches!(s.kind, ColumnKind::Str | ColumnKind::Int)
        });
        let element = match species {
            Some(idx) => idx,
            None => specs
                .iter()
                .position(|s| s.name == ATOMIC_NUMBER && s.kind == ColumnKind::Int && s.columns == 1)
                .ok_or(DecodeErrorKind::MissingProperty(SPECIES))?,
        };
        Ok(Self { positions, element })
    }
}

fn checked_atomic_numbers(numbers: Vec<i64>) -> Result<Vec<i64>, DecodeErrorKind> {
    if let Some((atom, z)) = numbers
        .iter()
        .enumerate()
        .find(|(_, z)| elements::symbol(**z).is_none())
    {
        return Err(DecodeErrorKind::UnknownElement {
            atom,
            symbol: z.to_string(),
        });
    }
    Ok(numbers)
}

fn check_header_finite(
    cell: Option<&[[f64; 3]; 3]>,
    info: &BTreeMap<String, MetaValue>,
) -> Result<(), DecodeErrorKind> {
    if let Some(v) = cell.into_iter().flatten().flatten().find(|v| !v.is_finite()) {
        return Err(DecodeErrorKind::NonFinite {
            what: "Lattice".to_string(),
            value: v.to_string(),
        });
    }
    for (key, value) in info {
        let bad = match value {
            MetaValue::Float(v) => (!v.is_finite()).then_some(*v),
            MetaValue::FloatArray(vs) => vs.iter().copied().find(|v| !v.is_finite()),
            _ => None,
        };
        if let Some(v) = bad {
            return Err(DecodeErrorKind::NonFinite {
                what: format!("metadata '{key}'"),
                value: v.to_string(),
            });
        }
    }
    Ok(())
}

fn symbols_to_numbers(symbols: &[String]) -> Result<Vec<i64>, DecodeErrorKind> {
    symbols
        .iter()
        .enumerate()
        .map(|(atom, sym)| {
            // Some writers emit atomic numbers in the species column.
            if let Ok(z) = sym.parse::<i64>() {
                if elements::symbol(z).is_some() {
                    return Ok(z);
                }
            }
            elements::atomic_number(sym).ok_or_else(|| DecodeErrorKind::UnknownElement {
                atom,
                symbol: sym.clone(),
            })
        })
        .collect()
}

enum ColumnValues {
    Real(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl ColumnValues {
    fn with_capacity(spec: &ColumnSpec, n_atoms: usize) -> Self {
        let cap = spec.columns * n_atoms;
        match spec.kind {
            ColumnKind::Real => Self::Real(Vec::with_capacity(cap)),
            ColumnKind::Int => Self::Int(Vec::with_capacity(cap)),
            ColumnKind::Logical => Self::Bool(Vec::with_capacity(cap)),
            ColumnKind::Str => Self::Str(Vec::with_capacity(cap)),
        }
    }

    fn push(&mut self, spec: &ColumnSpec, atom: usize, token: &str) -> Result<(), DecodeErrorKind> {
        let invalid = || DecodeErrorKind::InvalidValue {
            atom,
            column: spec.name.clone(),
            expected: spec.kind.describe(),
            value: token.to_string(),
        };
        match self {
            Self::Real(v) => {
                let value: f64 = token.parse().map_err(|_| invalid())?;
                if !value.is_finite() {
                    return Err(DecodeErrorKind::NonFinite {
                        what: format!("atom {atom} column '{}'", spec.name),
                        value: token.to_string(),
                    });
                }
                v.push(value);
            }
            Self::Int(v) => v.push(token.parse().map_err(|_| invalid())?),
            Self::Bool(v) => v.push(match token {
                "T" | "t" | "True" | "true" | "TRUE" | "1" => true,
                "F" | "f" | "False" | "false" | "FALSE" | "0" => false,
                _ => return Err(invalid()),
            }),
            Self::Str(v) => v.push(token.to_string()),
        }
        Ok(())
    }

    fn into_field_data(self) -> FieldData {
        match self {
            Self::Real(v) => FieldData::Real(v),
            Self::Int(v) => FieldData::Int(v),
            Self::Bool(v) => FieldData::Bool(v),
            Self::Str(v) => FieldData::Str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::split_lines;

    fn decode(text: &str) -> Result<Structure, DecodeError> {
        let lines = split_lines(text);
        decode_block(&TextBlock::from_lines(&lines))
    }

    #[test]
    fn decodes_extended_block_with_forces() {
        let s = decode(
            "2\n\
             Lattice=\"4 0 0 0 4 0 0 0 4\" Properties=species:S:1:pos:R:3:forces:R:3 dft_energy=-102.4 source=\"manual\"\n\
             Pt 0.0 0.0 0.0 0.1 0.2 0.3\n\
             Sn 2.0 2.0 2.0 -0.1 -0.2 -0.3\n",
        )
        .unwrap();
        assert_eq!(s.n_atoms(), 2);
        assert_eq!(s.atomic_numbers(), &[78, 50]);
        assert_eq!(s.positions()[1], [2.0, 2.0, 2.0]);
        assert_eq!(s.cell()[2], [0.0, 0.0, 4.0]);
        assert_eq!(s.pbc(), [true, true, true]);
        let forces = &s.per_atom_fields()["forces"];
        assert_eq!(forces.columns, 3);
        assert_eq!(
            forces.data,
            FieldData::Real(vec![0.1, 0.2, 0.3, -0.1, -0.2, -0.3])
        );
        assert_eq!(s.metadata()["dft_energy"], MetaValue::Float(-102.4));
        assert_eq!(s.metadata()["source"], MetaValue::Str("manual".into()));
    }

    #[test]
    fn plain_xyz_gets_zero_cell_and_no_pbc() {
        let s = decode("3\nwater\nO 0 0 0\nH 0.96 0 0\nH -0.24 0.93 0\n").unwrap();
        assert_eq!(s.atomic_numbers(), &[8, 1, 1]);
        assert_eq!(s.cell(), &[[0.0; 3]; 3]);
        assert_eq!(s.pbc(), [false; 3]);
        assert!(s.per_atom_fields().is_empty());
        // "water" is a bare flag
        assert_eq!(s.metadata()["water"], MetaValue::Bool(true));
    }

    #[test]
    fn explicit_pbc_overrides_lattice_default() {
        let s = decode(
            "1\nLattice=\"1 0 0 0 1 0 0 0 10\" pbc=\"T T F\"\nC 0 0 0\n",
        )
        .unwrap();
        assert_eq!(s.pbc(), [true, true, false]);
    }

    #[test]
    fn atomic_numbers_from_z_column_and_numeric_species() {
        let s = decode("2\nProperties=Z:I:1:pos:R:3\n1 0 0 0\n8 0 0 1\n").unwrap();
        assert_eq!(s.atomic_numbers(), &[1, 8]);
        let s = decode("1\n\n26 0 0 0\n").unwrap();
        assert_eq!(s.atomic_numbers(), &[26]);
    }

    #[test]
    fn integer_and_logical_columns_become_fields() {
        let s = decode(
            "2\nProperties=species:S:1:pos:R:3:tags:I:1:fixed:L:1\nH 0 0 0 3 T\nH 0 0 1 4 F\n",
        )
        .unwrap();
        assert_eq!(s.per_atom_fields()["tags"].data, FieldData::Int(vec![3, 4]));
        assert_eq!(
            s.per_atom_fields()["fixed"].data,
            FieldData::Bool(vec![true, false])
        );
    }

    #[test]
    fn wrong_column_count_is_reported_with_ordinal() {
        let err = decode("2\nc\nH 0 0 0\nH 0 0\n").unwrap_err();
        assert_eq!(err.ordinal, 1);
        assert_eq!(err.line, 1);
        assert!(matches!(
            err.kind,
            DecodeErrorKind::ColumnCount {
                atom: 1,
                expected: 4,
                found: 3
            }
        ));
    }

    #[test]
    fn non_numeric_coordinate_fails() {
        let err = decode("1\nc\nH 0 x 0\n").unwrap_err();
        match err.kind {
            DecodeErrorKind::InvalidValue { column, value, .. } => {
                assert_eq!(column, "pos");
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn unknown_element_and_missing_positions() {
        let err = decode("1\nc\nQq 0 0 0\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::UnknownElement { .. }));
        let err = decode("1\nProperties=species:S:1:coords:R:3\nH 0 0 0\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::MissingProperty("pos")));
    }

    #[test]
    fn integer_element_column_must_name_a_real_element() {
        let err = decode("2\nProperties=Z:I:1:pos:R:3\n0 0 0 0\n-7 0 0 1\n").unwrap_err();
        match err.kind {
            DecodeErrorKind::UnknownElement { atom, symbol } => {
                assert_eq!(atom, 0);
                assert_eq!(symbol, "0");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let err = decode("1\nProperties=species:I:1:pos:R:3\n119 0 0 0\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::UnknownElement { .. }));
    }

    #[test]
    fn non_finite_reals_are_rejected() {
        let err = decode("1\nenergy=1.0\nH 0 0 inf\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::NonFinite { .. }), "{err}");
        let err = decode("1\nenergy=nan\nH 0 0 0\n").unwrap_err();
        match err.kind {
            DecodeErrorKind::NonFinite { what, .. } => assert_eq!(what, "metadata 'energy'"),
            other => panic!("unexpected error {other:?}"),
        }
        let err = decode("1\nLattice=\"1 0 0 0 1 0 0 0 NaN\"\nH 0 0 0\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::NonFinite { .. }));
        let err = decode("1\nProperties=species:S:1:pos:R:3:forces:R:3\nH 0 0 0 0 -inf 0\n")
            .unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::NonFinite { .. }));
    }

    #[test]
    fn zero_atom_block_is_rejected() {
        let err = decode("0\nempty\n").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::NoAtoms));
    }

    #[test]
    fn atom_count_mismatch_is_rejected() {
        let lines = split_lines("3\nc\nH 0 0 0\nH 0 0 1\n");
        let err = decode_block(&TextBlock::from_lines(&lines)).unwrap_err();
        assert!(matches!(
            err.kind,
            DecodeErrorKind::AtomCountMismatch {
                declared: 3,
                found: 2
            }
        ));
    }
}
