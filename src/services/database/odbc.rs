// Blocking ODBC access shared by the Oracle and DM adapters
use crate::error::AppError;
use crate::models::{Cell, EngineKind};
use crate::services::database::ddl::escape_single_quotes;
use chrono::NaiveDateTime;
use odbc_api::buffers::TextRowSet;
use odbc_api::{ConnectionOptions, Cursor, DataType, Environment, ResultSetMetadata};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;

const BATCH_SIZE: usize = 500;
const MAX_TEXT_LEN: usize = 65536;

/// Rows fetched through ODBC, already decoded into cells.
#[derive(Debug, Clone, Default)]
pub struct OdbcRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl OdbcRows {
    /// Text of a cell, empty for NULL or a missing column.
    pub fn text(&self, row: usize, col: usize) -> String {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.display(crate::models::TIMESTAMP_FORMAT))
            .unwrap_or_default()
    }

    pub fn i64(&self, row: usize, col: usize) -> i64 {
        match self.rows.get(row).and_then(|r| r.get(col)) {
            Some(Cell::Integer(i)) => *i,
            Some(Cell::Float(f)) => *f as i64,
            Some(Cell::Text(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn opt_text(&self, row: usize, col: usize) -> Option<String> {
        Some(self.text(row, col)).filter(|s| !s.is_empty())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One ODBC environment plus the connection string for a target.
///
/// ODBC calls block, so each one runs on the blocking pool. Statements on a
/// client are serialized by the shared lock.
#[derive(Clone)]
pub struct OdbcClient {
    engine: EngineKind,
    env: Arc<Environment>,
    connection_string: Arc<str>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    Integer,
    Float,
    Bool,
    Timestamp,
    Text,
}

impl ColumnKind {
    fn from_data_type(data_type: DataType) -> Self {
        match data_type {
            DataType::Integer | DataType::SmallInt | DataType::BigInt | DataType::TinyInt => {
                ColumnKind::Integer
            }
            DataType::Float { .. } | DataType::Real | DataType::Double => ColumnKind::Float,
            DataType::Bit => ColumnKind::Bool,
            DataType::Timestamp { .. } => ColumnKind::Timestamp,
            _ => ColumnKind::Text,
        }
    }

    fn decode(self, bytes: Option<&[u8]>) -> Cell {
        let bytes = match bytes {
            Some(b) => b,
            None => return Cell::Null,
        };
        let text = String::from_utf8_lossy(bytes).into_owned();
        match self {
            ColumnKind::Integer => text
                .trim()
                .parse()
                .map(Cell::Integer)
                .unwrap_or(Cell::Text(text)),
            ColumnKind::Float => text
                .trim()
                .parse()
                .map(Cell::Float)
                .unwrap_or(Cell::Text(text)),
            ColumnKind::Bool => Cell::Bool(text.trim() == "1"),
            ColumnKind::Timestamp => {
                NaiveDateTime::parse_from_str(text.trim(), "%Y-%m-%d %H:%M:%S%.f")
                    .map(Cell::Timestamp)
                    .unwrap_or(Cell::Text(text))
            }
            ColumnKind::Text => Cell::Text(text),
        }
    }
}

impl OdbcClient {
    pub fn new(engine: EngineKind, connection_string: impl Into<String>) -> Result<Self, AppError> {
        let env = Environment::new().map_err(|e| {
            AppError::connection(
                engine,
                format!(
                    "Failed to create ODBC environment: {}. Make sure the {} ODBC driver is installed",
                    e, engine
                ),
            )
        })?;
        Ok(Self {
            engine,
            env: Arc::new(env),
            connection_string: Arc::from(connection_string.into()),
            lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    async fn run_blocking<T, F>(&self, work: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&odbc_api::Connection<'_>, EngineKind) -> Result<T, AppError> + Send + 'static,
    {
        let _guard = self.lock.lock().await;
        let env = Arc::clone(&self.env);
        let connection_string = Arc::clone(&self.connection_string);
        let engine = self.engine;

        tokio::task::spawn_blocking(move || {
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| {
                    AppError::connection(engine, format!("ODBC connection failed: {}", e))
                })?;
            work(&conn, engine)
        })
        .await
        .map_err(|e| AppError::Internal(format!("ODBC worker panicked: {}", e)))?
    }

    /// Run a statement and return its affected-row count (0 when the driver
    /// does not report one).
    pub async fn execute(&self, sql: &str) -> Result<u64, AppError> {
        let sql = sql.to_string();
        self.run_blocking(move |conn, engine| {
            let mut prepared = conn
                .prepare(&sql)
                .map_err(|e| AppError::database(engine, format!("Statement failed: {}", e)))?;
            prepared
                .execute(())
                .map_err(|e| AppError::database(engine, format!("Statement failed: {}", e)))?;
            let affected = prepared
                .row_count()
                .map_err(|e| AppError::database(engine, format!("Row count failed: {}", e)))?;
            Ok(affected.unwrap_or(0) as u64)
        })
        .await
    }

    /// Run a statement that returns rows.
    pub async fn query(&self, sql: &str) -> Result<OdbcRows, AppError> {
        let sql = sql.to_string();
        self.run_blocking(move |conn, engine| {
            let query_err =
                |e: odbc_api::Error| AppError::database(engine, format!("Query failed: {}", e));

            let mut prepared = conn.prepare(&sql).map_err(query_err)?;
            let mut cursor = match prepared.execute(()).map_err(query_err)? {
                Some(cursor) => cursor,
                None => return Ok(OdbcRows::default()),
            };

            let columns: Vec<String> = cursor
                .column_names()
                .map_err(query_err)?
                .collect::<Result<_, _>>()
                .map_err(query_err)?;
            let mut kinds = Vec::with_capacity(columns.len());
            for idx in 1..=columns.len() {
                let data_type = cursor.col_data_type(idx as u16).map_err(query_err)?;
                kinds.push(ColumnKind::from_data_type(data_type));
            }

            let mut buffers = TextRowSet::for_cursor(BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LEN))
                .map_err(query_err)?;
            let mut row_cursor = cursor.bind_buffer(&mut buffers).map_err(query_err)?;

            let mut rows = Vec::new();
            while let Some(batch) = row_cursor.fetch().map_err(query_err)? {
                for row_idx in 0..batch.num_rows() {
                    let row = kinds
                        .iter()
                        .enumerate()
                        .map(|(col_idx, kind)| kind.decode(batch.at(col_idx, row_idx)))
                        .collect();
                    rows.push(row);
                }
            }

            Ok(OdbcRows { columns, rows })
        })
        .await
    }
}

/// Inline SQL literal for statements sent without bind parameters.
pub fn inline_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", escape_single_quotes(s)),
        Value::Array(_) | Value::Object(_) => {
            format!("'{}'", escape_single_quotes(&value.to_string()))
        }
    }
}

/// `{value}` form for connection-string attributes containing separators.
pub fn odbc_value(value: &str) -> String {
    if value.contains(';') || value.contains('{') || value.contains('}') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_by_column_kind() {
        assert_eq!(ColumnKind::Integer.decode(Some(b"42")), Cell::Integer(42));
        assert_eq!(ColumnKind::Float.decode(Some(b"1.5")), Cell::Float(1.5));
        assert_eq!(ColumnKind::Bool.decode(Some(b"1")), Cell::Bool(true));
        assert_eq!(ColumnKind::Text.decode(None), Cell::Null);
        assert!(matches!(
            ColumnKind::Timestamp.decode(Some(b"2024-01-02 03:04:05.000")),
            Cell::Timestamp(_)
        ));
        // NUMBER columns without scale still arrive as text
        assert_eq!(
            ColumnKind::Integer.decode(Some(b"1e3x")),
            Cell::Text("1e3x".to_string())
        );
    }

    #[test]
    fn test_rows_accessors() {
        let rows = OdbcRows {
            columns: vec!["NAME".into(), "NUM_ROWS".into()],
            rows: vec![vec![Cell::Text("EMP".into()), Cell::Text("14".into())]],
        };
        assert_eq!(rows.text(0, 0), "EMP");
        assert_eq!(rows.i64(0, 1), 14);
        assert_eq!(rows.opt_text(1, 0), None);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_inline_literal() {
        use serde_json::json;
        assert_eq!(inline_literal(&json!(null)), "NULL");
        assert_eq!(inline_literal(&json!(true)), "1");
        assert_eq!(inline_literal(&json!(3.5)), "3.5");
        assert_eq!(inline_literal(&json!("O'Brien")), "'O''Brien'");
    }

    #[test]
    fn test_odbc_value_braces_separators() {
        assert_eq!(odbc_value("plain"), "plain");
        assert_eq!(odbc_value("pa;ss"), "{pa;ss}");
        assert_eq!(odbc_value("a}b"), "{a}}b}");
    }
}
