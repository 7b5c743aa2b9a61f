//! Descriptive statistics and pre-aggregated chart series.
//!
//! Rounding: every reported numeric aggregate is rounded to 2 decimal places
//! with round-half-away-from-zero, applied to the `f64` value scaled by 100
//! (`f64::round`). `0.125 -> 0.13`, `-0.125 -> -0.13`.

use crate::models::{
    ChartPoint, ChartSeries, ColumnStats, DescribeResult, OrderedMap, StatsDetail, StatsResult,
    ValueCount, TOP_VALUES,
};
use crate::services::table::{Column, Table};
use rayon::prelude::*;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

pub const PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesOrder {
    KeyAscending,
    ValueDescending,
}

/// One entry of the chart table: when both columns exist, rows are grouped by
/// `key_column` and `value_column` is summed per group.
#[derive(Debug, Clone, Copy)]
pub struct ChartDefinition {
    pub name: &'static str,
    pub key_column: &'static str,
    pub value_column: &'static str,
    pub order: SeriesOrder,
    pub limit: Option<usize>,
}

pub const CHART_DEFINITIONS: &[ChartDefinition] = &[
    ChartDefinition {
        name: "revenue_over_time",
        key_column: "date",
        value_column: "revenue",
        order: SeriesOrder::KeyAscending,
        limit: None,
    },
    ChartDefinition {
        name: "top_products",
        key_column: "product",
        value_column: "revenue",
        order: SeriesOrder::ValueDescending,
        limit: Some(8),
    },
    ChartDefinition {
        name: "revenue_by_category",
        key_column: "category",
        value_column: "revenue",
        order: SeriesOrder::KeyAscending,
        limit: None,
    },
    ChartDefinition {
        name: "revenue_by_region",
        key_column: "region",
        value_column: "revenue",
        order: SeriesOrder::KeyAscending,
        limit: None,
    },
];

/// Min, max, mean and sum over the non-null values, unrounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sum: f64,
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn describe(table: &Table) -> DescribeResult {
    DescribeResult {
        rows: table.row_count(),
        columns: table.column_names(),
        column_types: table
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.column_type()))
            .collect(),
        preview: table.head(PREVIEW_ROWS),
    }
}

pub fn statistics(table: &Table) -> StatsResult {
    let start = std::time::Instant::now();

    let stats: Vec<(String, ColumnStats)> = table
        .columns()
        .par_iter()
        .map(|column| (column.name().to_string(), column_stats(column)))
        .collect();

    let charts: OrderedMap<ChartSeries> = CHART_DEFINITIONS
        .iter()
        .filter_map(|def| chart_series(table, def).map(|series| (def.name.to_string(), series)))
        .collect();

    debug!(
        "Computed stats for {} columns and {} charts in {:?}",
        stats.len(),
        charts.len(),
        start.elapsed()
    );

    StatsResult {
        stats: stats.into_iter().collect(),
        charts,
    }
}

pub fn column_stats(column: &Column) -> ColumnStats {
    let detail = match column.numeric_values() {
        Some(values) => {
            let summary = numeric_summary(values);
            StatsDetail::Numeric {
                mean: summary.map(|s| round2(s.mean)),
                min: summary.map(|s| round2(s.min)),
                max: summary.map(|s| round2(s.max)),
                sum: summary.map(|s| round2(s.sum)),
            }
        }
        None => StatsDetail::Distribution {
            top_values: top_values(column, TOP_VALUES),
        },
    };

    ColumnStats {
        column_type: column.column_type(),
        null_count: column.null_count(),
        unique_count: unique_count(column),
        detail,
    }
}

/// `None` when the column has no non-null values.
pub fn numeric_summary(values: &[Option<f64>]) -> Option<NumericSummary> {
    let (count, sum, min, max) = values.iter().flatten().fold(
        (0usize, 0.0f64, f64::INFINITY, f64::NEG_INFINITY),
        |(count, sum, min, max), &v| (count + 1, sum + v, min.min(v), max.max(v)),
    );

    if count == 0 {
        return None;
    }
    Some(NumericSummary {
        min,
        max,
        mean: sum / count as f64,
        sum,
    })
}

pub fn unique_count(column: &Column) -> usize {
    value_counts(column).len()
}

/// Counts of each distinct stringified non-null value, most frequent first.
/// Equal counts keep the order in which values were first encountered.
pub fn value_counts(column: &Column) -> Vec<ValueCount> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut counts: Vec<ValueCount> = Vec::new();

    for row in 0..column.len() {
        let Some(value) = column.display_value(row) else {
            continue;
        };
        match positions.get(&value) {
            Some(&idx) => counts[idx].count += 1,
            None => {
                positions.insert(value.clone(), counts.len());
                counts.push(ValueCount { value, count: 1 });
            }
        }
    }

    // Stable sort keeps first-encountered order among ties.
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts
}

pub fn top_values(column: &Column, n: usize) -> SmallVec<[ValueCount; TOP_VALUES]> {
    value_counts(column).into_iter().take(n).collect()
}

/// Builds the series for `def`, or `None` when a required column is missing
/// or the aggregate column is not numeric.
pub fn chart_series(table: &Table, def: &ChartDefinition) -> Option<ChartSeries> {
    let key_column = table.column(def.key_column)?;
    let values = table.column(def.value_column)?.numeric_values()?;

    let mut groups: BTreeMap<String, f64> = BTreeMap::new();
    for (row, value) in values.iter().enumerate() {
        let Some(key) = key_column.display_value(row) else {
            continue;
        };
        *groups.entry(key).or_insert(0.0) += value.unwrap_or(0.0);
    }

    let mut points: Vec<ChartPoint> = groups
        .into_iter()
        .map(|(key, value)| ChartPoint { key, value })
        .collect();

    if def.order == SeriesOrder::ValueDescending {
        points.sort_by(|a, b| b.value.total_cmp(&a.value));
    }
    if let Some(limit) = def.limit {
        points.truncate(limit);
    }

    Some(ChartSeries {
        key_column: def.key_column.to_string(),
        value_column: def.value_column.to_string(),
        points,
    })
}
