use std::sync::Arc;

use crate::error::Rejection;
use crate::schema::Schema;

/// One decoded input line, borrowing its fields from the raw line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    fields: Vec<&'a [u8]>,
}

impl<'a> Record<'a> {
    pub fn row_key(&self) -> &'a [u8] {
        self.fields[Schema::ROW_KEY_FIELD]
    }

    pub fn field(&self, index: usize) -> &'a [u8] {
        self.fields[index]
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Splits raw lines into fixed-arity records.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    schema: Arc<Schema>,
}

impl RecordDecoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Splits `line` into at most `field_count` fields; the last field keeps
    /// any further delimiters. Anything short of `field_count` is rejected.
    pub fn decode<'a>(&self, line: &'a [u8]) -> Result<Record<'a>, Rejection> {
        let expected = self.schema.field_count();
        let delimiter = self.schema.delimiter();
        let fields: Vec<&[u8]> = line.splitn(expected, |b| *b == delimiter).collect();
        if fields.len() != expected {
            return Err(Rejection {
                expected,
                found: fields.len(),
            });
        }
        Ok(Record { fields })
    }
}

/// Drops a trailing `\n` or `\r\n`.
pub fn trim_line_terminator(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
