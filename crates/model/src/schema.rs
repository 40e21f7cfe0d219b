use crate::error::SchemaError;

/// Immutable description of one dataset's input layout and store placement.
///
/// Field 0 is always the row key; every other column becomes one cell in
/// `column_group`. The projection order is computed once here so that cells
/// come out in ascending column-name byte order whatever the declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<Vec<u8>>,
    column_group: String,
    delimiter: u8,
    projection: Vec<usize>,
}

impl Schema {
    pub const ROW_KEY_FIELD: usize = 0;

    pub const TBL_LOGS_COLUMN_GROUP: &str = "detail";

    pub const TBL_LOGS_COLUMNS: [&str; 11] = [
        "id",
        "log_id",
        "remote_ip",
        "site_global_ticket",
        "site_global_session",
        "global_user_id",
        "cookie_text",
        "user_agent",
        "ref_url",
        "loc_url",
        "log_time",
    ];

    pub fn new<C, S>(columns: C, column_group: &str, delimiter: char) -> Result<Self, SchemaError>
    where
        C: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns: Vec<Vec<u8>> = columns
            .into_iter()
            .map(|name| name.as_ref().as_bytes().to_vec())
            .collect();
        if columns.len() < 2 {
            return Err(SchemaError::TooFewColumns);
        }
        for (i, name) in columns.iter().enumerate() {
            if columns[..i].contains(name) {
                let name = String::from_utf8_lossy(name).into_owned();
                return Err(SchemaError::DuplicateColumn(name));
            }
        }
        if column_group.is_empty() {
            return Err(SchemaError::EmptyColumnGroup);
        }
        if !delimiter.is_ascii() {
            return Err(SchemaError::WideDelimiter(delimiter));
        }

        Ok(Self::assemble(columns, column_group, delimiter as u8))
    }

    /// The web access log table: 11 tab-delimited fields, one `detail` group.
    pub fn tbl_logs() -> Self {
        let columns = Self::TBL_LOGS_COLUMNS
            .iter()
            .map(|name| name.as_bytes().to_vec())
            .collect();
        Self::assemble(columns, Self::TBL_LOGS_COLUMN_GROUP, b'\t')
    }

    fn assemble(columns: Vec<Vec<u8>>, column_group: &str, delimiter: u8) -> Self {
        let mut projection: Vec<usize> = (1..columns.len()).collect();
        projection.sort_by(|&a, &b| columns[a].cmp(&columns[b]));
        Schema {
            columns,
            column_group: column_group.to_string(),
            delimiter,
            projection,
        }
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_group(&self) -> &str {
        &self.column_group
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn column_name(&self, field: usize) -> &[u8] {
        &self.columns[field]
    }

    /// Non-key field indexes in ascending column-name byte order.
    pub fn projection(&self) -> &[usize] {
        &self.projection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_is_byte_sorted_not_declared() -> anyhow::Result<()> {
        let schema = Schema::new(["key", "zeta", "Alpha", "mid", "alpha"], "cg", ',')?;
        let names: Vec<&[u8]> = schema
            .projection()
            .iter()
            .map(|&i| schema.column_name(i))
            .collect();
        assert_eq!(names, vec![&b"Alpha"[..], b"alpha", b"mid", b"zeta"]);
        assert_eq!(schema.delimiter(), b',');
        Ok(())
    }

    #[test]
    fn tbl_logs_layout() {
        let schema = Schema::tbl_logs();
        assert_eq!(schema.field_count(), 11);
        assert_eq!(schema.column_group(), "detail");
        assert_eq!(schema.delimiter(), b'\t');
        assert_eq!(schema.projection().len(), 10);
        assert!(!schema.projection().contains(&Schema::ROW_KEY_FIELD));
    }

    #[test]
    fn rejects_bad_layouts() {
        assert_eq!(
            Schema::new(["id"], "cg", '\t'),
            Err(SchemaError::TooFewColumns)
        );
        assert_eq!(
            Schema::new(["id", "a", "a"], "cg", '\t'),
            Err(SchemaError::DuplicateColumn("a".into()))
        );
        assert_eq!(
            Schema::new(["id", "a"], "", '\t'),
            Err(SchemaError::EmptyColumnGroup)
        );
        assert_eq!(
            Schema::new(["id", "a"], "cg", 'é'),
            Err(SchemaError::WideDelimiter('é'))
        );
    }
}
