use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableAction, AlterTableRequest, Cell, ColumnDef, ColumnInfo,
    ConnectionDescriptor, EngineKind, ExecuteResult, IndexCollector, IndexInfo, KeyRole,
    QueryOptions, QueryResult, RowData, TableInfo, TableKind, TableSchema,
};
use crate::services::database::adapter::{require_row, require_where, DatabaseAdapter};
use crate::services::database::ddl::{
    default_operand, escape_single_quotes, execute_plan, format_default, plan_statements,
    require_column, require_index, type_with_suffix, upper_type_keywords, PlannedStatement,
    QuoteStyle,
};
use crate::services::database::handle::EngineHandle;
use crate::validation::{SqlValidator, StatementKind};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

pub const READ_KEYWORDS: &[&str] = &["SELECT", "EXPLAIN", "PRAGMA", "WITH", "VALUES"];

/// The only catalog of an SQLite file.
pub const MAIN_CATALOG: &str = "main";

const QUOTE: QuoteStyle = QuoteStyle::Backtick;

const REBUILD_HINT: &str = "table rebuild required";

/// Embedded SQLite files. The handle serializes access through a mutex, so
/// calls against one file run one at a time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    pub fn new() -> Self {
        Self
    }

    /// File path from the host field, or from the catalog when host is empty.
    pub fn resolve_path(descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        let raw = if descriptor.host.trim().is_empty() {
            descriptor.database.trim()
        } else {
            descriptor.host.trim()
        };
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path = raw.trim_start_matches("sqlite:").trim_start_matches("//");
        if path.is_empty() {
            return Err(AppError::Config("SQLite file path is required".to_string()));
        }
        Ok(path.to_string())
    }

    pub fn column_type(column: &ColumnDef) -> String {
        let mut def = type_with_suffix(&upper_type_keywords(&column.column_type), column);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = default_operand(column, |v| {
            format_default(v, &["NULL", "CURRENT_TIMESTAMP"], false, escape_single_quotes)
        }) {
            def.push_str(&format!(" DEFAULT {}", default));
        }
        def
    }

    pub fn action_statements(
        table: &str,
        action: &AlterTableAction,
    ) -> Result<Vec<String>, AppError> {
        let target = QUOTE.quote(table);
        let sql = match action {
            AlterTableAction::AddColumn { column } => {
                let column = require_column(column)?;
                if column.auto_increment {
                    return Err(AppError::unsupported(
                        EngineKind::Sqlite,
                        "ADD_COLUMN with auto-increment",
                        "SQLite only allows AUTOINCREMENT on an INTEGER PRIMARY KEY declared at creation",
                    ));
                }
                format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    target,
                    QUOTE.quote(&column.name),
                    Self::column_type(column)
                )
            }
            AlterTableAction::DropColumn { .. } | AlterTableAction::ModifyColumn { .. } => {
                return Err(AppError::unsupported(EngineKind::Sqlite, action.tag(), REBUILD_HINT));
            }
            AlterTableAction::RenameColumn {
                old_name, new_name, ..
            } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                target,
                QUOTE.quote(old_name),
                QUOTE.quote(new_name)
            ),
            AlterTableAction::AddIndex { index } => {
                let index = require_index(index)?;
                format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    QUOTE.quote(&index.name),
                    target,
                    QUOTE.quote_list(&index.columns)
                )
            }
            AlterTableAction::DropIndex { name } => format!("DROP INDEX {}", QUOTE.quote(name)),
        };
        Ok(vec![sql])
    }

    pub fn plan_alter(request: &AlterTableRequest) -> Result<Vec<PlannedStatement>, AppError> {
        plan_statements(request, |action| Self::action_statements(&request.table, action))
    }

    fn value_to_cell(value: ValueRef<'_>) -> Cell {
        match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Integer(i) => Cell::Integer(i),
            ValueRef::Real(f) => Cell::Float(f),
            ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Cell::from_bytes(bytes.to_vec()),
        }
    }

    fn json_to_value(value: &Value) -> SqlValue {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Run a statement and report changed rows. Statements that return rows
    /// are drained and report zero.
    fn run(conn: &Connection, sql: &str) -> Result<u64, AppError> {
        match conn.execute(sql, []) {
            Ok(n) => Ok(n as u64),
            Err(rusqlite::Error::ExecuteReturnedResults) => {
                let mut stmt = conn.prepare(sql)?;
                let mut rows = stmt.query([])?;
                while rows.next()?.is_some() {}
                Ok(0)
            }
            Err(rusqlite::Error::MultipleStatement) => {
                conn.execute_batch(sql)?;
                Ok(conn.changes() as u64)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write(conn: &Connection, sql: &str, values: &[&Value]) -> Result<u64, AppError> {
        tracing::debug!("SQLite exec: {}", sql);
        let params: Vec<SqlValue> = values.iter().map(|v| Self::json_to_value(v)).collect();
        let changed = conn.execute(sql, params_from_iter(params))?;
        Ok(changed as u64)
    }

    fn list_master(
        conn: &Connection,
        database: &str,
        types: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let sql = format!(
            "SELECT name, type FROM sqlite_master \
             WHERE type IN ({}) AND name NOT LIKE 'sqlite_%' ORDER BY name",
            types
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok((name, kind))
        })?;

        let mut tables = Vec::new();
        for row in rows {
            let (name, kind) = row?;
            let kind = if kind == "view" {
                TableKind::View
            } else {
                TableKind::BaseTable
            };
            tables.push(TableInfo::new(name, database, kind));
        }
        Ok(tables)
    }

    fn master_sql(conn: &Connection, kind: &str, name: &str) -> Result<String, AppError> {
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten()
        .ok_or_else(|| {
            AppError::database(EngineKind::Sqlite, format!("{} {} not found", kind, name))
        })
    }

    fn read_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, AppError> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", QUOTE.quote(table)))?;
        let rows = stmt.query_map([], |row| {
            let name: String = row.get(1)?;
            let column_type: String = row.get(2)?;
            let not_null: i64 = row.get(3)?;
            let default_value: Option<String> = row.get(4)?;
            let pk: i64 = row.get(5)?;
            Ok((name, column_type, not_null, default_value, pk))
        })?;

        let mut raw = Vec::new();
        for row in rows {
            raw.push(row?);
        }
        let pk_count = raw.iter().filter(|(.., pk)| *pk > 0).count();

        Ok(raw
            .into_iter()
            .map(|(name, column_type, not_null, default_value, pk)| {
                let is_rowid =
                    pk > 0 && pk_count == 1 && column_type.eq_ignore_ascii_case("INTEGER");
                let mut col = ColumnInfo::new(name, column_type, not_null == 0);
                col.default_is_expression = default_value.is_some();
                col.default_value = default_value;
                if pk > 0 {
                    col.key = KeyRole::Primary;
                }
                if is_rowid {
                    col.extra = "auto_increment".to_string();
                }
                col
            })
            .collect())
    }

    fn read_indexes(conn: &Connection, table: &str) -> Result<Vec<IndexInfo>, AppError> {
        let mut list = conn.prepare(&format!("PRAGMA index_list({})", QUOTE.quote(table)))?;
        let entries = list.query_map([], |row| {
            let name: String = row.get(1)?;
            let unique: i64 = row.get(2)?;
            let origin: String = row.get(3)?;
            Ok((name, unique, origin))
        })?;

        let mut collector = IndexCollector::new();
        for entry in entries {
            let (name, unique, origin) = entry?;
            let primary = origin == "pk" || name.starts_with("sqlite_autoindex_");

            let mut info = conn.prepare(&format!("PRAGMA index_info({})", QUOTE.quote(&name)))?;
            let columns = info.query_map([], |row| row.get::<_, Option<String>>(2))?;
            let mut any = false;
            for column in columns {
                let column = column?;
                any = true;
                collector.push(&name, column.as_deref(), unique == 1, primary, None);
            }
            if !any {
                collector.push(&name, None, unique == 1, primary, None);
            }
        }
        Ok(collector.finish(table))
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for SqliteAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        Self::resolve_path(descriptor)
    }

    fn quote_style(&self) -> QuoteStyle {
        QUOTE
    }

    fn classify(&self, sql: &str) -> StatementKind {
        SqlValidator::classify(sql, READ_KEYWORDS)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        let path = Self::resolve_path(descriptor)?;
        let conn = Connection::open(&path).map_err(|e| {
            AppError::connection(EngineKind::Sqlite, format!("Failed to open {}: {}", path, e))
        })?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::connection(EngineKind::Sqlite, format!("Ping failed: {}", e)))?;

        tracing::info!("Opened SQLite database {}", path);
        Ok(EngineHandle::Sqlite(Arc::new(Mutex::new(conn))))
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        let conn = handle.sqlite()?.lock().await;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|e| AppError::connection(EngineKind::Sqlite, format!("Ping failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        let shared = handle.sqlite()?.clone();
        drop(handle);
        match Arc::try_unwrap(shared) {
            Ok(mutex) => mutex
                .into_inner()
                .close()
                .map_err(|(_, e)| {
                    AppError::connection(EngineKind::Sqlite, format!("Failed to close: {}", e))
                }),
            Err(_) => {
                tracing::debug!("SQLite handle still shared; closing with the last reference");
                Ok(())
            }
        }
    }

    async fn get_databases(&self, _handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        Ok(vec![MAIN_CATALOG.to_string()])
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let conn = handle.sqlite()?.lock().await;
        Self::list_master(&conn, database, "'table', 'view'")
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        let conn = handle.sqlite()?.lock().await;
        let columns = Self::read_columns(&conn, table)?;
        if columns.is_empty() {
            return Err(AppError::database(
                EngineKind::Sqlite,
                format!("Table {} not found", table),
            ));
        }
        let indexes = Self::read_indexes(&conn, table)?;
        Ok(TableSchema {
            database: database.to_string(),
            schema: String::new(),
            table: table.to_string(),
            columns,
            indexes,
        })
    }

    async fn get_views(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let conn = handle.sqlite()?.lock().await;
        Self::list_master(&conn, database, "'view'")
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        let conn = handle.sqlite()?.lock().await;
        Self::read_indexes(&conn, table)
    }

    async fn get_view_definition(
        &self,
        handle: &EngineHandle,
        _database: &str,
        view: &str,
    ) -> Result<String, AppError> {
        let conn = handle.sqlite()?.lock().await;
        Self::master_sql(&conn, "view", view)
    }

    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        let start = Instant::now();
        let conn = handle.sqlite()?.lock().await;
        let affected = Self::run(&conn, sql)?;
        Ok(ExecuteResult::new(affected, start.elapsed()))
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        _opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let start = Instant::now();
        let conn = handle.sqlite()?.lock().await;

        if self.classify(sql) == StatementKind::RowCount {
            let affected = Self::run(&conn, sql)?;
            return Ok(QueryResult::affected(affected, start.elapsed()));
        }

        let mut stmt = conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();
        let mut rows = stmt.query([])?;
        let mut cells = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(width);
            for idx in 0..width {
                record.push(Self::value_to_cell(row.get_ref(idx)?));
            }
            cells.push(record);
        }

        Ok(QueryResult::from_rows(columns, cells, start.elapsed()))
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        require_row(EngineKind::Sqlite, row)?;
        let columns: Vec<String> = row.keys().cloned().collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            QUOTE.quote(table),
            QUOTE.quote_list(&columns),
            placeholders.join(", ")
        );
        let values: Vec<&Value> = row.values().collect();
        let conn = handle.sqlite()?.lock().await;
        Self::write(&conn, &sql, &values)
    }

    async fn update(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::Sqlite, where_clause)?;
        require_row(EngineKind::Sqlite, row)?;
        let sets: Vec<String> = row
            .keys()
            .enumerate()
            .map(|(i, col)| format!("{} = ?{}", QUOTE.quote(col), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            QUOTE.quote(table),
            sets.join(", "),
            where_clause
        );
        let values: Vec<&Value> = row.values().collect();
        let conn = handle.sqlite()?.lock().await;
        Self::write(&conn, &sql, &values)
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::Sqlite, where_clause)?;
        let sql = format!("DELETE FROM {} WHERE {}", QUOTE.quote(table), where_clause);
        let conn = handle.sqlite()?.lock().await;
        Self::write(&conn, &sql, &[])
    }

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        let conn = handle.sqlite()?.lock().await;
        Self::master_sql(&conn, "table", table)
    }

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        let plan = Self::plan_alter(request)?;
        tracing::info!("Altering SQLite table {} ({} statements)", request.table, plan.len());
        let statements = execute_plan(self, handle, plan).await?;
        Ok(AlterOutcome::Applied { statements })
    }

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        _database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            QUOTE.quote(old_name),
            QUOTE.quote(new_name)
        );
        self.execute(handle, &sql).await.map(|_| ())
    }

    /// One file, one catalog: table names are never qualified.
    fn select_all_sql(&self, _database: &str, table: &str, max_rows: u64) -> String {
        let mut sql = format!("SELECT * FROM {}", QUOTE.quote(table));
        if max_rows > 0 {
            sql.push_str(&format!(" LIMIT {}", max_rows));
        }
        sql
    }
}
