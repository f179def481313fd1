use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::time::Duration;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Ordered column → value map used by insert/update.
pub type RowData = serde_json::Map<String, Value>;

/// One decoded result cell.
///
/// Every adapter decodes its driver's values into this union, so formatting
/// code never inspects driver types. Collection-like engine values (arrays,
/// maps, tuples, sub-documents) arrive as `Structured` canonical JSON text.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    Structured(String),
}

impl Cell {
    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null)
    }

    /// Decode a JSON value as returned by JSON-speaking engines.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Cell::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    if n.is_u64() {
                        Cell::Text(n.to_string())
                    } else {
                        Cell::Float(f)
                    }
                } else {
                    Cell::Text(n.to_string())
                }
            }
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => Cell::Structured(value.to_string()),
        }
    }

    /// Bytes from a driver: UTF-8 text when valid, hex otherwise.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(s) => Cell::Text(s),
            Err(e) => {
                let hex: String = e
                    .as_bytes()
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect();
                Cell::Text(format!("0x{}", hex))
            }
        }
    }

    /// Display text; `None` for SQL NULL.
    pub fn display(&self, timestamp_format: &str) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Text(s) | Cell::Structured(s) => Some(s.clone()),
            Cell::Integer(i) => Some(i.to_string()),
            Cell::Float(f) => Some(f.to_string()),
            Cell::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Cell::Timestamp(ts) => Some(ts.format(timestamp_format).to_string()),
        }
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Null => serializer.serialize_none(),
            Cell::Text(s) | Cell::Structured(s) => serializer.serialize_str(s),
            Cell::Integer(i) => serializer.serialize_i64(*i),
            Cell::Float(f) => serializer.serialize_f64(*f),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Timestamp(ts) => {
                serializer.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
            }
        }
    }
}

/// Result of a statement that may or may not produce rows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    pub total: u64,
    pub rows_affected: u64,
    pub message: String,
    pub time_cost_ms: u64,
}

impl QueryResult {
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>, elapsed: Duration) -> Self {
        let total = rows.len() as u64;
        Self {
            columns,
            rows,
            total,
            rows_affected: 0,
            message: "Query succeeded".to_string(),
            time_cost_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn affected(rows_affected: u64, elapsed: Duration) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            total: 0,
            rows_affected,
            message: "Statement executed".to_string(),
            time_cost_ms: elapsed.as_millis() as u64,
        }
    }

    /// Value of `column` in row `row`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResult {
    pub rows_affected: u64,
    pub message: String,
    pub time_cost_ms: u64,
}

impl ExecuteResult {
    pub fn new(rows_affected: u64, elapsed: Duration) -> Self {
        Self {
            rows_affected,
            message: "Statement executed".to_string(),
            time_cost_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryOptions {
    pub database: String,
    pub page: u64,
    pub page_size: u64,
    pub sort_by: String,
    pub sort_desc: bool,
}

impl QueryOptions {
    pub fn for_database(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    /// Rows to skip for the requested page (pages are 1-based).
    pub fn offset(&self) -> u64 {
        if self.page > 1 && self.page_size > 0 {
            (self.page - 1) * self.page_size
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cell_from_json() {
        assert_eq!(Cell::from_json(&json!(null)), Cell::Null);
        assert_eq!(Cell::from_json(&json!(42)), Cell::Integer(42));
        assert_eq!(Cell::from_json(&json!(1.5)), Cell::Float(1.5));
        assert_eq!(
            Cell::from_json(&json!(u64::MAX)),
            Cell::Text(u64::MAX.to_string())
        );
        assert_eq!(
            Cell::from_json(&json!([1, 2])),
            Cell::Structured("[1,2]".to_string())
        );
        assert_eq!(
            Cell::from_json(&json!({"k": "v"})),
            Cell::Structured("{\"k\":\"v\"}".to_string())
        );
    }

    #[test]
    fn test_cell_from_bytes_falls_back_to_hex() {
        assert_eq!(Cell::from_bytes(b"abc".to_vec()), Cell::Text("abc".into()));
        assert_eq!(
            Cell::from_bytes(vec![0xff, 0x00]),
            Cell::Text("0xff00".into())
        );
    }

    #[test]
    fn test_cell_serializes_untagged() {
        let ts = NaiveDateTime::parse_from_str("2024-01-02 03:04:05", TIMESTAMP_FORMAT).unwrap();
        let row = vec![
            Cell::Null,
            Cell::Integer(7),
            Cell::Bool(true),
            Cell::Timestamp(ts),
            Cell::Structured("[1]".into()),
        ];
        assert_eq!(
            serde_json::to_value(&row).unwrap(),
            json!([null, 7, true, "2024-01-02 03:04:05", "[1]"])
        );
    }

    #[test]
    fn test_query_options_offset() {
        let mut opts = QueryOptions::for_database("shop");
        assert_eq!(opts.offset(), 0);
        opts.page = 3;
        opts.page_size = 20;
        assert_eq!(opts.offset(), 40);
    }

    #[test]
    fn test_query_result_cell_lookup() {
        let result = QueryResult::from_rows(
            vec!["id".into(), "name".into()],
            vec![vec![Cell::Integer(1), Cell::Text("a".into())]],
            Duration::from_millis(3),
        );
        assert_eq!(result.total, 1);
        assert_eq!(result.cell(0, "name"), Some(&Cell::Text("a".into())));
        assert!(result.cell(1, "name").is_none());
    }
}
