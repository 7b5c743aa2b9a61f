//! In-memory table produced by the CSV ingestor.
//!
//! A [`Table`] is an ordered list of uniquely named [`Column`]s of equal length.
//! Each column carries its inferred type as the variant of [`ColumnData`], so the
//! type tag and the cell representation can never disagree.

use crate::error::AppError;
use crate::models::OrderedMap;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

const DATE_DISPLAY_FORMAT: &str = "%Y-%m-%d";
const DATETIME_DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Datetime => "datetime",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// `integral` is set when every literal was an integer; such columns render without a fraction.
    Numeric { values: Vec<Option<f64>>, integral: bool },
    /// `date_only` is set when no literal carried a time of day.
    Datetime { values: Vec<Option<NaiveDateTime>>, date_only: bool },
    Categorical(Vec<Option<String>>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Numeric { values, .. } => values.len(),
            ColumnData::Datetime { values, .. } => values.len(),
            ColumnData::Categorical(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single cell as it appears in previews. Nulls render as the empty string.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_str(""),
            Cell::Integer(v) => serializer.serialize_i64(*v),
            Cell::Float(v) => serializer.serialize_f64(*v),
            Cell::Text(v) => serializer.serialize_str(v),
        }
    }
}

pub type Row = OrderedMap<Cell>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    name: String,
    data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn column_type(&self) -> ColumnType {
        match self.data {
            ColumnData::Numeric { .. } => ColumnType::Numeric,
            ColumnData::Datetime { .. } => ColumnType::Datetime,
            ColumnData::Categorical(_) => ColumnType::Categorical,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_null(&self, row: usize) -> bool {
        match &self.data {
            ColumnData::Numeric { values, .. } => values[row].is_none(),
            ColumnData::Datetime { values, .. } => values[row].is_none(),
            ColumnData::Categorical(values) => values[row].is_none(),
        }
    }

    pub fn null_count(&self) -> usize {
        (0..self.len()).filter(|&row| self.is_null(row)).count()
    }

    /// Numeric cells, or `None` when the column is not numeric.
    pub fn numeric_values(&self) -> Option<&[Option<f64>]> {
        match &self.data {
            ColumnData::Numeric { values, .. } => Some(values),
            _ => None,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self.data, ColumnData::Numeric { integral: true, .. })
    }

    pub fn cell(&self, row: usize) -> Cell {
        match &self.data {
            ColumnData::Numeric { values, integral } => match values[row] {
                None => Cell::Null,
                Some(v) if *integral => Cell::Integer(v as i64),
                Some(v) => Cell::Float(v),
            },
            ColumnData::Datetime { values, date_only } => match values[row] {
                None => Cell::Null,
                Some(v) => Cell::Text(format_datetime(&v, *date_only)),
            },
            ColumnData::Categorical(values) => match &values[row] {
                None => Cell::Null,
                Some(v) => Cell::Text(v.clone()),
            },
        }
    }

    /// String form of a cell used for counting and grouping. `None` for nulls.
    pub fn display_value(&self, row: usize) -> Option<String> {
        match &self.data {
            ColumnData::Numeric { values, integral } => values[row].map(|v| format_number(v, *integral)),
            ColumnData::Datetime { values, date_only } => values[row].map(|v| format_datetime(&v, *date_only)),
            ColumnData::Categorical(values) => values[row].clone(),
        }
    }
}

/// Renders a number the way the preview and prompt show it: integers without a
/// fraction, whole floats with a single trailing `.0`.
pub fn format_number(value: f64, integral: bool) -> String {
    if integral && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else if value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn format_datetime(value: &NaiveDateTime, date_only: bool) -> String {
    if date_only {
        value.format(DATE_DISPLAY_FORMAT).to_string()
    } else {
        value.format(DATETIME_DISPLAY_FORMAT).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Result<Self, AppError> {
        let table = Self { columns };
        table.validate()?;
        Ok(table)
    }

    /// Checks the structural invariants: unique column names and equal column lengths.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name()) {
                return Err(AppError::Internal(format!("Duplicate column name: {}", column.name())));
            }
        }

        let rows = self.row_count();
        if let Some(column) = self.columns.iter().find(|c| c.len() != rows) {
            return Err(AppError::Internal(format!(
                "Column {} has {} values, expected {}",
                column.name(),
                column.len(),
                rows
            )));
        }
        Ok(())
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.columns.first().map_or(0, Column::len)
    }

    pub fn row(&self, index: usize) -> Row {
        self.columns
            .iter()
            .map(|c| (c.name().to_string(), c.cell(index)))
            .collect()
    }

    /// First `n` rows as name → cell records.
    pub fn head(&self, n: usize) -> Vec<Row> {
        (0..self.row_count().min(n)).map(|i| self.row(i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample() -> Table {
        Table::new(vec![
            Column::new(
                "qty",
                ColumnData::Numeric {
                    values: vec![Some(1.0), None, Some(3.0)],
                    integral: true,
                },
            ),
            Column::new(
                "day",
                ColumnData::Datetime {
                    values: vec![
                        NaiveDate::from_ymd_opt(2024, 1, 2).and_then(|d| d.and_hms_opt(0, 0, 0)),
                        None,
                        None,
                    ],
                    date_only: true,
                },
            ),
            Column::new(
                "name",
                ColumnData::Categorical(vec![Some("a".into()), Some("b".into()), None]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_unequal_column_lengths() {
        let result = Table::new(vec![
            Column::new("a", ColumnData::Categorical(vec![None])),
            Column::new("b", ColumnData::Categorical(vec![None, None])),
        ]);
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[test]
    fn rejects_duplicate_names() {
        let result = Table::new(vec![
            Column::new("a", ColumnData::Categorical(vec![])),
            Column::new("a", ColumnData::Categorical(vec![])),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn head_renders_nulls_as_empty_strings() {
        let table = sample();
        let json = serde_json::to_value(table.head(5)).unwrap();

        assert_eq!(json.as_array().unwrap().len(), 3);
        assert_eq!(json[0]["qty"], serde_json::json!(1));
        assert_eq!(json[0]["day"], serde_json::json!("2024-01-02"));
        assert_eq!(json[1]["qty"], serde_json::json!(""));
        assert_eq!(json[2]["name"], serde_json::json!(""));
    }

    #[test]
    fn preview_keeps_column_order() {
        let rendered = serde_json::to_string(&sample().row(0)).unwrap();
        assert_eq!(rendered, r#"{"qty":1,"day":"2024-01-02","name":"a"}"#);
    }

    #[test]
    fn formats_numbers_like_the_preview() {
        assert_eq!(format_number(7.0, true), "7");
        assert_eq!(format_number(7.0, false), "7.0");
        assert_eq!(format_number(2.5, false), "2.5");
    }

    #[test]
    fn counts_nulls() {
        let table = sample();
        assert_eq!(table.column("qty").unwrap().null_count(), 1);
        assert_eq!(table.column("day").unwrap().null_count(), 2);
        assert_eq!(table.row_count(), 3);
    }
}
