use thiserror::Error;

/// A block that could not be turned into a [`crate::Structure`].
///
/// Decode failures are recoverable: the packer logs them, skips the block and
/// keeps tokenizing from the next block boundary.
#[derive(Debug, Error)]
#[error("structure #{ordinal} (line {line}): {kind}")]
pub struct DecodeError {
    /// 1-based position of the block among all blocks the tokenizer emitted.
    pub ordinal: usize,
    /// 1-based line number of the block's count line.
    pub line: usize,
    #[source]
    pub kind: DecodeErrorKind,
}

#[derive(Debug, Error)]
pub enum DecodeErrorKind {
    #[error("invalid atom count '{0}'")]
    InvalidCount(String),
    #[error("structure declares zero atoms")]
    NoAtoms,
    #[error("header declares {declared} atoms but {found} atom lines were supplied")]
    AtomCountMismatch { declared: usize, found: usize },
    #[error("malformed header: {0}")]
    Header(#[from] HeaderError),
    #[error("Properties schema has no '{0}' column")]
    MissingProperty(&'static str),
    #[error("atom {atom}: expected {expected} columns, found {found}")]
    ColumnCount {
        atom: usize,
        expected: usize,
        found: usize,
    },
    #[error("atom {atom}: column '{column}' has invalid {expected} value '{value}'")]
    InvalidValue {
        atom: usize,
        column: String,
        expected: &'static str,
        value: String,
    },
    #[error("atom {atom}: unknown element '{symbol}'")]
    UnknownElement { atom: usize, symbol: String },
    /// NaN or infinity in a real value; the mirror's JSON records cannot hold it.
    #[error("{what} is not finite ({value})")]
    NonFinite { what: String, value: String },
    #[error("{0}")]
    Inconsistent(String),
}

/// Problems in the key=value comment line.
#[derive(Debug, Error, PartialEq)]
pub enum HeaderError {
    #[error("unterminated quoted value for key '{0}'")]
    UnterminatedQuote(String),
    #[error("empty key before '='")]
    EmptyKey,
    #[error("Lattice must contain 9 real numbers, got '{0}'")]
    Lattice(String),
    #[error("pbc must contain 3 logical values, got '{0}'")]
    Pbc(String),
    #[error("invalid Properties schema '{0}'")]
    Properties(String),
}
