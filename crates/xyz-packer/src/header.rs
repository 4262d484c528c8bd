//! Parser for the extended-XYZ comment line.
//!
//! The comment line is a whitespace separated list of `key=value` pairs.
//! Values are bare tokens, double-quoted strings (which may hold whitespace and
//! `\"` escapes) or `{...}`/`[...]` arrays. A key with no `=` is a flag and is
//! recorded as `true`. Three keys are structural and never end up in the
//! metadata map: `Lattice`, `pbc` and `Properties`.

use std::collections::BTreeMap;

use crate::error::HeaderError;
use crate::structure::MetaValue;

/// Column layout used when the header carries no `Properties` key.
pub const DEFAULT_PROPERTIES: &str = "species:S:1:pos:R:3";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Real,
    Int,
    Logical,
    Str,
}

impl ColumnKind {
    fn from_code(code: &str) -> Option<Self> {
        match code {
            "R" | "r" => Some(Self::Real),
            "I" | "i" => Some(Self::Int),
            "L" | "l" => Some(Self::Logical),
            "S" | "s" => Some(Self::Str),
            _ => None,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Int => "integer",
            Self::Logical => "logical",
            Self::Str => "string",
        }
    }
}

/// One `name:type:cols` entry of the `Properties` schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
    pub columns: usize,
}

/// Decoded comment line.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub cell: Option<[[f64; 3]; 3]>,
    pub pbc: Option<[bool; 3]>,
    pub properties: Vec<ColumnSpec>,
    pub info: BTreeMap<String, MetaValue>,
}

impl Header {
    /// Total number of whitespace separated tokens expected per atom line.
    pub fn row_width(&self) -> usize {
        self.properties.iter().map(|c| c.columns).sum()
    }
}

struct RawPair {
    key: String,
    value: Option<String>,
}

/// Parse a comment line into structural fields and metadata.
pub fn parse_header(line: &str) -> Result<Header, HeaderError> {
    let mut cell = None;
    let mut pbc = None;
    let mut properties = None;
    let mut info = BTreeMap::new();

    for RawPair { key, value } in split_pairs(line)? {
        let Some(value) = value else {
            info.insert(key, MetaValue::Bool(true));
            continue;
        };
        if key.eq_ignore_ascii_case("lattice") {
            cell = Some(parse_lattice(&value)?);
        } else if key.eq_ignore_ascii_case("pbc") {
            pbc = Some(parse_pbc(&value)?);
        } else if key.eq_ignore_ascii_case("properties") {
            properties = Some(parse_properties(&value)?);
        } else {
            info.insert(key, parse_value(&value));
        }
    }

    let properties = match properties {
        Some(p) => p,
        None => parse_properties(DEFAULT_PROPERTIES)?,
    };
    Ok(Header {
        cell,
        pbc,
        properties,
        info,
    })
}

fn split_pairs(line: &str) -> Result<Vec<RawPair>, HeaderError> {
    let chars: Vec<char> = line.chars().collect();
    let mut pairs = Vec::new();
    let mut i = 0usize;
    let skip_ws = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_whitespace() {
            *i += 1;
        }
    };

    loop {
        skip_ws(&mut i);
        if i >= chars.len() {
            break;
        }
        let key_start = i;
        while i < chars.len() && chars[i] != '=' && !chars[i].is_whitespace() {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();

        let mut ahead = i;
        skip_ws(&mut ahead);
        if ahead >= chars.len() || chars[ahead] != '=' {
            if key.is_empty() {
                return Err(HeaderError::EmptyKey);
            }
            pairs.push(RawPair { key, value: None });
            continue;
        }
        if key.is_empty() {
            return Err(HeaderError::EmptyKey);
        }
        i = ahead + 1;
        skip_ws(&mut i);

        let value = match chars.get(i) {
            Some('"') => {
                i += 1;
                let mut out = String::new();
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        '\\' if i + 1 < chars.len() => {
                            out.push(chars[i + 1]);
                            i += 2;
                        }
                        '"' => {
                            closed = true;
                            i += 1;
                            break;
                        }
                        c => {
                            out.push(c);
                            i += 1;
                        }
                    }
                }
                if !closed {
                    return Err(HeaderError::UnterminatedQuote(key));
                }
                out
            }
            Some(&open) if open == '{' || open == '[' => {
                let close = if open == '{' { '}' } else { ']' };
                let start = i + 1;
                let Some(offset) = chars[start..].iter().position(|&c| c == close) else {
                    return Err(HeaderError::UnterminatedQuote(key));
                };
                i = start + offset + 1;
                chars[start..start + offset]
                    .iter()
                    .map(|&c| if c == ',' { ' ' } else { c })
                    .collect()
            }
            _ => {
                let start = i;
                while i < chars.len() && !chars[i].is_whitespace() {
                    i += 1;
                }
                chars[start..i].iter().collect()
            }
        };
        pairs.push(RawPair {
            key,
            value: Some(value),
        });
    }
    Ok(pairs)
}

fn parse_bool(token: &str) -> Option<bool> {
    if token.eq_ignore_ascii_case("t") || token.eq_ignore_ascii_case("true") {
        Some(true)
    } else if token.eq_ignore_ascii_case("f") || token.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Type a raw header value: integer, then float, then logical, else string.
/// Values with several tokens become arrays when every token shares a type.
pub fn parse_value(raw: &str) -> MetaValue {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    match tokens.as_slice() {
        [single] => {
            if let Ok(v) = single.parse::<i64>() {
                MetaValue::Int(v)
            } else if let Ok(v) = single.parse::<f64>() {
                MetaValue::Float(v)
            } else if let Some(b) = parse_bool(single) {
                MetaValue::Bool(b)
            } else {
                MetaValue::Str(raw.to_string())
            }
        }
        [_, _, ..] => {
            if let Ok(v) = tokens.iter().map(|t| t.parse::<i64>()).collect::<Result<Vec<_>, _>>() {
                MetaValue::IntArray(v)
            } else if let Ok(v) = tokens.iter().map(|t| t.parse::<f64>()).collect::<Result<Vec<_>, _>>() {
                MetaValue::FloatArray(v)
            } else if let Some(v) = tokens.iter().map(|t| parse_bool(t)).collect::<Option<Vec<_>>>() {
                MetaValue::BoolArray(v)
            } else {
                MetaValue::Str(raw.to_string())
            }
        }
        [] => MetaValue::Str(raw.to_string()),
    }
}

fn parse_lattice(raw: &str) -> Result<[[f64; 3]; 3], HeaderError> {
    let values: Vec<f64> = raw
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| HeaderError::Lattice(raw.to_string()))?;
    if values.len() != 9 {
        return Err(HeaderError::Lattice(raw.to_string()));
    }
    Ok([
        [values[0], values[1], values[2]],
        [values[3], values[4], values[5]],
        [values[6], values[7], values[8]],
    ])
}

fn parse_pbc(raw: &str) -> Result<[bool; 3], HeaderError> {
    let flags: Vec<bool> = raw
        .split_whitespace()
        .map(|t| match t {
            "1" => Some(true),
            "0" => Some(false),
            other => parse_bool(other),
        })
        .collect::<Option<_>>()
        .ok_or_else(|| HeaderError::Pbc(raw.to_string()))?;
    match flags.as_slice() {
        &[a, b, c] => Ok([a, b, c]),
        _ => Err(HeaderError::Pbc(raw.to_string())),
    }
}

fn parse_properties(raw: &str) -> Result<Vec<ColumnSpec>, HeaderError> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.is_empty() || parts.len() % 3 != 0 {
        return Err(HeaderError::Properties(raw.to_string()));
    }
    let mut specs: Vec<ColumnSpec> = Vec::with_capacity(parts.len() / 3);
    for chunk in parts.chunks(3) {
        let name = chunk[0].trim();
        let kind = ColumnKind::from_code(chunk[1].trim());
        let columns = chunk[2].trim().parse::<usize>().ok().filter(|&c| c > 0);
        match (kind, columns) {
            (Some(kind), Some(columns))
                if !name.is_empty() && !specs.iter().any(|s| s.name == name) =>
            {
                specs.push(ColumnSpec {
                    name: name.to_string(),
                    kind,
                    columns,
                });
            }
            _ => return Err(HeaderError::Properties(raw.to_string())),
        }
    }
    Ok(specs)
}
