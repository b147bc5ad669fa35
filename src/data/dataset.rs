//! In-memory CSV dataset

use crate::data::{schema::Schema, DataError};
use std::io::Read;
use std::path::Path;

/// Rows of optional string cells under a header.
///
/// Cells are kept exactly as read so a row written back out is byte-for-byte
/// what came in. An empty cell is a missing value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

pub type Row = Vec<Option<String>>;

impl Dataset {
    /// Build a dataset, checking every row matches the header width
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Result<Self, DataError> {
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DataError::RowWidth {
                    row: index,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }

    /// Empty dataset with the same header
    pub fn empty_like(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: Vec::new(),
        }
    }

    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let columns: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record?;
            let row: Row = record
                .iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        None
                    } else {
                        Some(field.to_string())
                    }
                })
                .collect();
            rows.push(row);
        }

        Self::new(columns, rows)
    }

    pub fn from_csv_bytes(bytes: &[u8]) -> Result<Self, DataError> {
        Self::from_csv_reader(bytes)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(std::io::BufReader::new(file))
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, DataError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            writer.write_record(row.iter().map(|cell| cell.as_deref().unwrap_or("")))?;
        }
        writer
            .into_inner()
            .map_err(|e| DataError::Io(e.into_error()))
    }

    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        let bytes = self.to_csv_bytes()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, DataError> {
        self.column_index(name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&str> {
        self.rows.get(row)?.get(column)?.as_deref()
    }

    /// Numeric value of a cell; missing, unparseable and non-finite cells are `None`
    pub fn numeric(&self, row: usize, column: usize) -> Option<f64> {
        self.cell(row, column).and_then(parse_number)
    }

    /// Every value of a numeric column, `None` where missing or unparseable
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, DataError> {
        let index = self.require_column(name)?;
        Ok((0..self.rows.len()).map(|row| self.numeric(row, index)).collect())
    }

    /// Every value of a column as text
    pub fn text_column(&self, name: &str) -> Result<Vec<Option<&str>>, DataError> {
        let index = self.require_column(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row[index].as_deref())
            .collect())
    }

    /// Keep rows matching the predicate; rows are moved, never edited
    pub fn filter_rows<F>(&self, mut keep: F) -> Dataset
    where
        F: FnMut(&[Option<String>]) -> bool,
    {
        Dataset {
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|row| keep(row)).cloned().collect(),
        }
    }

    /// Rows at the given indices, in the order given
    pub fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            rows: indices
                .iter()
                .filter_map(|&i| self.rows.get(i).cloned())
                .collect(),
        }
    }

    pub fn schema(&self) -> Schema {
        Schema::infer(self)
    }
}

/// Parse a cell as a finite number
pub fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}
