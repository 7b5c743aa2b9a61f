use crate::error::AppError;
use crate::services::table::{Column, ColumnData, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::{debug, info};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Cell contents read as missing values (pandas' default NA tokens).
const NA_VALUES: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

// Order matters: month-first wins for ambiguous slash dates.
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y", "%d-%m-%Y"];

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d/%m/%Y %H:%M:%S",
];

/// Parses delimited text into a typed [`Table`].
///
/// The first record is the header. Every record must have the header's field
/// count. Column types are inferred independently per column, see [`infer_column`].
pub fn parse_csv(bytes: &[u8]) -> Result<Table, AppError> {
    let start = std::time::Instant::now();
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(bytes);

    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(AppError::MalformedInput("No columns to parse from file".to_string()));
    }
    let names = header_names(headers.iter());

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for record in reader.records() {
        let record = record?;
        for (column, field) in cells.iter_mut().zip(record.iter()) {
            column.push(normalize_cell(field));
        }
    }
    debug!("Read {} rows x {} columns", cells.first().map_or(0, Vec::len), names.len());

    let columns: Vec<Column> = names
        .into_par_iter()
        .zip(cells.into_par_iter())
        .map(|(name, values)| Column::new(name, infer_column(values)))
        .collect();

    let table = Table::new(columns)?;
    info!(
        "Parsed CSV into {} rows x {} columns in {:?}",
        table.row_count(),
        table.columns().len(),
        start.elapsed()
    );
    Ok(table)
}

/// Blank headers become `Unnamed: <index>`; repeats get `.1`, `.2`, ... suffixes.
pub fn header_names<'a>(raw: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut existing_names = HashSet::new();
    raw.enumerate()
        .map(|(idx, name)| {
            let base = if name.trim().is_empty() {
                format!("Unnamed: {}", idx)
            } else {
                name.to_string()
            };

            let mut cleaned = base.clone();
            let mut counter = 1;
            while !existing_names.insert(cleaned.clone()) {
                cleaned = format!("{}.{}", base, counter);
                counter += 1;
            }
            cleaned
        })
        .collect()
}

fn normalize_cell(field: &str) -> Option<String> {
    if NA_VALUES.contains(&field) {
        None
    } else {
        Some(field.to_string())
    }
}

/// Picks the column type: numeric if every non-null cell is a number, else
/// datetime if every non-null cell is a date, else categorical.
///
/// A column with rows but no values is numeric; a column with no rows is categorical.
pub fn infer_column(cells: Vec<Option<String>>) -> ColumnData {
    if cells.is_empty() {
        return ColumnData::Categorical(cells);
    }
    if let Some(numeric) = as_numeric(&cells) {
        return numeric;
    }
    if let Some(datetime) = as_datetime(&cells) {
        return datetime;
    }
    ColumnData::Categorical(cells)
}

fn as_numeric(cells: &[Option<String>]) -> Option<ColumnData> {
    let mut integral = true;
    let values = cells
        .iter()
        .map(|cell| match cell {
            None => Some(None),
            Some(text) => parse_number(text).map(|(value, is_int)| {
                integral &= is_int;
                Some(value)
            }),
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ColumnData::Numeric { values, integral })
}

fn as_datetime(cells: &[Option<String>]) -> Option<ColumnData> {
    let mut date_only = true;
    let values = cells
        .iter()
        .map(|cell| match cell {
            None => Some(None),
            Some(text) => parse_datetime(text).map(|(value, is_date)| {
                date_only &= is_date;
                Some(value)
            }),
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ColumnData::Datetime { values, date_only })
}

/// Integer or finite floating-point literal. The flag reports an integer literal.
pub fn parse_number(text: &str) -> Option<(f64, bool)> {
    let text = text.trim();
    if let Ok(int) = text.parse::<i64>() {
        return Some((int as f64, true));
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| (v, false))
}

/// Recognised date or date-time literal. The flag reports a date without a time of day.
pub fn parse_datetime(text: &str) -> Option<(NaiveDateTime, bool)> {
    let text = text.trim();
    for format in DATE_FORMATS.iter() {
        if let Some(value) = NaiveDate::parse_from_str(text, format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
        {
            return Some((value, true));
        }
    }
    for format in DATETIME_FORMATS.iter() {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some((value, false));
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|value| (value.naive_utc(), false))
}
