//! Error types shared by the decoding, keying and partitioning layers.

use thiserror::Error;

/// A raw line that does not carry the configured number of fields.
///
/// Rejections are recovered by the caller (counted and skipped), they never
/// abort a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected {expected} fields, found {found}")]
pub struct Rejection {
    pub expected: usize,
    pub found: usize,
}

/// A row key that no known partition claims.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("row key {} falls outside every partition range", display_key(.row))]
    Unmapped { row: Vec<u8> },
    #[error(
        "row range {}..={} crosses a gap between partitions",
        display_key(.first),
        display_key(.last)
    )]
    Gap { first: Vec<u8>, last: Vec<u8> },
}

/// A partition boundary set that cannot describe disjoint key ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoundaryError {
    #[error("partition {id} has an empty range")]
    EmptyRange { id: u64 },
    #[error("partitions {left} and {right} overlap")]
    Overlap { left: u64, right: u64 },
    #[error("partition id {0} is used twice")]
    DuplicateId(u64),
    #[error("split keys must be non-empty and strictly ascending")]
    UnorderedSplitKeys,
}

/// Corrupt store keys or values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("cell key has no row terminator")]
    MissingTerminator,
    #[error("invalid escape byte {0:#04x} in cell key")]
    InvalidEscape(u8),
    #[error("cell value is {0} bytes, shorter than its version header")]
    TruncatedValue(usize),
}

/// Invalid dataset schema configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("a schema needs a row key column and at least one value column")]
    TooFewColumns,
    #[error("column {0:?} is declared twice")]
    DuplicateColumn(String),
    #[error("column group must not be empty")]
    EmptyColumnGroup,
    #[error("delimiter {0:?} is not a single-byte character")]
    WideDelimiter(char),
}

pub(crate) fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}
