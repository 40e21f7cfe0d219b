use std::sync::Arc;

use crate::record::Record;
use crate::schema::Schema;

/// One store cell. The column group and write version are constant for a
/// run, so they travel with the file rather than with every cell.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cell {
    pub row: Vec<u8>,
    pub column: Vec<u8>,
    pub value: Vec<u8>,
}

/// Maps a decoded record onto its cells, field 0 being the row key.
#[derive(Debug, Clone)]
pub struct KeyValueProjector {
    schema: Arc<Schema>,
}

impl KeyValueProjector {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Cells come out in ascending column-name byte order.
    pub fn project(&self, record: &Record<'_>) -> Vec<Cell> {
        let row = record.row_key();
        self.schema
            .projection()
            .iter()
            .map(|&field| Cell {
                row: row.to_vec(),
                column: self.schema.column_name(field).to_vec(),
                value: record.field(field).to_vec(),
            })
            .collect()
    }
}
