//! Column type inference and schema comparison

use crate::data::{dataset::parse_number, Dataset};
use serde::{Deserialize, Serialize};

/// Inferred type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// No non-missing values observed
    Empty,
    Integer,
    Float,
    Text,
}

impl ColumnType {
    /// Integer and float are interchangeable; an empty column fits anything
    pub fn is_compatible(self, other: ColumnType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (ColumnType::Empty, _) | (_, ColumnType::Empty) => true,
            (ColumnType::Integer, ColumnType::Float) | (ColumnType::Float, ColumnType::Integer) => {
                true
            }
            _ => false,
        }
    }
}

/// Ordered column names with their inferred types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<(String, ColumnType)>,
}

/// Differences between two schemas
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// In the reference, absent from the candidate
    pub missing: Vec<String>,
    /// In the candidate, absent from the reference
    pub unexpected: Vec<String>,
    /// (column, candidate type, reference type)
    pub type_conflicts: Vec<(String, ColumnType, ColumnType)>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.unexpected.is_empty() && self.type_conflicts.is_empty()
    }
}

impl Schema {
    pub fn infer(dataset: &Dataset) -> Self {
        let columns = dataset
            .columns()
            .iter()
            .enumerate()
            .map(|(index, name)| {
                let values = dataset.rows().iter().filter_map(|row| row[index].as_deref());
                (name.clone(), infer_type(values))
            })
            .collect();
        Self { columns }
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, ty)| *ty)
    }

    /// Compare a candidate schema (self) against a reference; column order is ignored
    pub fn diff(&self, reference: &Schema) -> SchemaDiff {
        let mut diff = SchemaDiff::default();

        for (name, reference_type) in &reference.columns {
            match self.column_type(name) {
                None => diff.missing.push(name.clone()),
                Some(candidate_type) if !candidate_type.is_compatible(*reference_type) => diff
                    .type_conflicts
                    .push((name.clone(), candidate_type, *reference_type)),
                Some(_) => {}
            }
        }
        for (name, _) in &self.columns {
            if reference.column_type(name).is_none() {
                diff.unexpected.push(name.clone());
            }
        }

        diff
    }
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut inferred = ColumnType::Empty;
    for value in values {
        let trimmed = value.trim();
        let ty = if trimmed.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if parse_number(trimmed).is_some() {
            ColumnType::Float
        } else {
            return ColumnType::Text;
        };
        inferred = match (inferred, ty) {
            (ColumnType::Empty, t) => t,
            (ColumnType::Float, _) | (_, ColumnType::Float) => ColumnType::Float,
            (t, _) => t,
        };
    }
    inferred
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(csv: &str) -> Dataset {
        Dataset::from_csv_bytes(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_infer_types() {
        let schema = dataset("a,b,c,d\n1,1.5,x,\n2,3,y,\n").schema();
        assert_eq!(schema.column_type("a"), Some(ColumnType::Integer));
        assert_eq!(schema.column_type("b"), Some(ColumnType::Float));
        assert_eq!(schema.column_type("c"), Some(ColumnType::Text));
        assert_eq!(schema.column_type("d"), Some(ColumnType::Empty));
    }

    #[test]
    fn test_diff_ignores_order_and_numeric_width() {
        let candidate = dataset("price,id\n1.5,1\n").schema();
        let reference = dataset("id,price\n1,2\n").schema();
        assert!(candidate.diff(&reference).is_empty());
    }

    #[test]
    fn test_diff_reports_everything() {
        let candidate = dataset("id,price,extra\n1,cheap,x\n").schema();
        let reference = dataset("id,price,name\n1,20,a\n").schema();
        let diff = candidate.diff(&reference);
        assert_eq!(diff.missing, vec!["name"]);
        assert_eq!(diff.unexpected, vec!["extra"]);
        assert_eq!(
            diff.type_conflicts,
            vec![("price".to_string(), ColumnType::Text, ColumnType::Integer)]
        );
    }
}
