use crate::services::table::{ColumnType, Row};
use serde::{ser::SerializeMap, ser::SerializeSeq, Deserialize, Serialize, Serializer};
use smallvec::SmallVec;

pub const TOP_VALUES: usize = 5;

/// Name-keyed entries that serialize as a JSON object in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> OrderedMap<V> {
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DescribeResult {
    pub rows: usize,
    pub columns: Vec<String>,
    pub column_types: OrderedMap<ColumnType>,
    pub preview: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatsDetail {
    Numeric {
        mean: Option<f64>,
        min: Option<f64>,
        max: Option<f64>,
        sum: Option<f64>,
    },
    Distribution {
        top_values: SmallVec<[ValueCount; TOP_VALUES]>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub null_count: usize,
    pub unique_count: usize,
    #[serde(flatten)]
    pub detail: StatsDetail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub key: String,
    pub value: f64,
}

/// A grouped-and-summed series. Serializes as a list of
/// `{<key column>: key, <value column>: value}` records.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub key_column: String,
    pub value_column: String,
    pub points: Vec<ChartPoint>,
}

impl Serialize for ChartSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.points.len()))?;
        for point in &self.points {
            seq.serialize_element(&ChartRecord {
                series: self,
                point,
            })?;
        }
        seq.end()
    }
}

struct ChartRecord<'a> {
    series: &'a ChartSeries,
    point: &'a ChartPoint,
}

impl Serialize for ChartRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry(&self.series.key_column, &self.point.key)?;
        map.serialize_entry(&self.series.value_column, &self.point.value)?;
        map.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub stats: OrderedMap<ColumnStats>,
    pub charts: OrderedMap<ChartSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub dataset_id: String,
    pub filename: String,
    #[serde(flatten)]
    pub info: DescribeResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetInfoResponse {
    pub dataset_id: String,
    #[serde(flatten)]
    pub info: DescribeResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub dataset_id: String,
    pub question: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub answer: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn chart_series_serializes_as_records() {
        let series = ChartSeries {
            key_column: "region".into(),
            value_column: "revenue".into(),
            points: vec![
                ChartPoint { key: "east".into(), value: 10.5 },
                ChartPoint { key: "west".into(), value: 3.0 },
            ],
        };

        assert_eq!(
            serde_json::to_value(&series).unwrap(),
            json!([{"region": "east", "revenue": 10.5}, {"region": "west", "revenue": 3.0}])
        );
    }

    #[test]
    fn numeric_stats_flatten_into_column_entry() {
        let stats = ColumnStats {
            column_type: ColumnType::Numeric,
            null_count: 1,
            unique_count: 3,
            detail: StatsDetail::Numeric {
                mean: Some(2.33),
                min: Some(1.0),
                max: Some(4.0),
                sum: Some(7.0),
            },
        };

        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            json!({"type": "numeric", "null_count": 1, "unique_count": 3,
                   "mean": 2.33, "min": 1.0, "max": 4.0, "sum": 7.0})
        );
    }

    #[test]
    fn query_request_history_defaults_to_empty() {
        let request: QueryRequest =
            serde_json::from_value(json!({"dataset_id": "abc", "question": "total?"})).unwrap();
        assert!(request.history.is_empty());
    }

    #[test]
    fn unknown_roles_are_rejected() {
        let parsed = serde_json::from_value::<ChatTurn>(json!({"role": "system", "content": "x"}));
        assert!(parsed.is_err());
    }
}
