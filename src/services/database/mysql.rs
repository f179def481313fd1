// MySQL adapter on top of mysql_async connection pools
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableAction, AlterTableRequest, Cell, ColumnDef, ColumnInfo,
    ConnectionDescriptor, EngineKind, ExecuteResult, IndexCollector, IndexDef, IndexInfo,
    KeyRole, QueryOptions, QueryResult, RoutineInfo, RoutineKind, RowData, TableInfo, TableKind,
    TableSchema,
};
use crate::services::database::adapter::{require_row, require_where, DatabaseAdapter};
use crate::services::database::ddl::{
    default_operand, escape_single_quotes, execute_combined, format_default, plan_combined,
    require_column, require_index, type_with_suffix, upper_type_keywords, QuoteStyle,
};
use crate::services::database::handle::EngineHandle;
use crate::validation::{SqlValidator, StatementKind};
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;
use mysql_async::{prelude::*, Conn, OptsBuilder, Params, Pool, Row, Value as MySqlValue};
use serde_json::Value;
use std::time::Instant;
use url::Url;

pub const READ_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESC", "DESCRIBE", "EXPLAIN", "WITH"];

const SYSTEM_SCHEMAS: &str = "'mysql', 'information_schema', 'performance_schema', 'sys'";

const QUOTE: QuoteStyle = QuoteStyle::Backtick;

#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlAdapter;

impl MySqlAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Get a connection from the pool
    async fn get_conn(pool: &Pool) -> Result<Conn, AppError> {
        pool.get_conn().await.map_err(|e| {
            AppError::connection(
                EngineKind::MySql,
                format!("Failed to get MySQL connection from pool: {}", e),
            )
        })
    }

    fn db_err(context: &str, e: mysql_async::Error) -> AppError {
        AppError::database(EngineKind::MySql, format!("{}: {}", context, e))
    }

    /// Select `database` on a pooled connection. Returns the database to put
    /// back afterwards (`Some(None)` when none was selected), or `None` when
    /// nothing changed.
    async fn switch_database(
        conn: &mut Conn,
        database: &str,
    ) -> Result<Option<Option<String>>, AppError> {
        let current: Option<String> = conn
            .query_first::<Option<String>, _>("SELECT DATABASE()")
            .await
            .map_err(|e| Self::db_err("Failed to read current database", e))?
            .flatten();
        let restore = Self::database_to_restore(current, database);
        if restore.is_some() {
            conn.query_drop(format!("USE {}", QUOTE.quote(database)))
                .await
                .map_err(|e| Self::db_err("Failed to select database", e))?;
        }
        Ok(restore)
    }

    fn database_to_restore(current: Option<String>, target: &str) -> Option<Option<String>> {
        if current.as_deref() == Some(target) {
            None
        } else {
            Some(current)
        }
    }

    /// Put a connection back on its previous database before it returns to
    /// the pool. MySQL cannot deselect a database, so a connection that had
    /// none is closed instead.
    async fn restore_database(mut conn: Conn, previous: Option<String>) {
        if let Some(database) = previous {
            match conn.query_drop(format!("USE {}", QUOTE.quote(&database))).await {
                Ok(()) => return,
                Err(e) => tracing::warn!("Failed to restore database {}: {}", database, e),
            }
        }
        if let Err(e) = conn.disconnect().await {
            tracing::warn!("Failed to close MySQL connection: {}", e);
        }
    }

    async fn run_query(
        conn: &mut Conn,
        kind: StatementKind,
        sql: &str,
        start: Instant,
    ) -> Result<QueryResult, AppError> {
        if kind == StatementKind::RowCount {
            conn.query_drop(sql)
                .await
                .map_err(|e| Self::db_err("Statement failed", e))?;
            return Ok(QueryResult::affected(conn.affected_rows(), start.elapsed()));
        }

        let mut result = conn
            .query_iter(sql)
            .await
            .map_err(|e| Self::db_err("Query execution failed", e))?;
        let column_types: Vec<(String, ColumnType)> = result
            .columns_ref()
            .iter()
            .map(|c| (c.name_str().to_string(), c.column_type()))
            .collect();
        let rows: Vec<Row> = result
            .collect()
            .await
            .map_err(|e| Self::db_err("Query execution failed", e))?;

        let cells = rows
            .iter()
            .map(|row| {
                column_types
                    .iter()
                    .enumerate()
                    .map(|(idx, (_, ty))| match row.get_opt::<MySqlValue, usize>(idx) {
                        Some(Ok(value)) => Self::value_to_cell(value, *ty),
                        _ => Cell::Null,
                    })
                    .collect()
            })
            .collect();

        let columns = column_types.into_iter().map(|(name, _)| name).collect();
        Ok(QueryResult::from_rows(columns, cells, start.elapsed()))
    }

    /// Expression defaults other than the timestamp functions must be
    /// parenthesized; `COLUMN_DEFAULT` reports them bare.
    fn expression_default(expression: &str) -> String {
        let upper = expression.to_uppercase();
        let bare = ["CURRENT_TIMESTAMP", "NOW(", "LOCALTIME", "NULL"]
            .iter()
            .any(|k| upper.starts_with(k));
        if bare || expression.starts_with('(') {
            expression.to_string()
        } else {
            format!("({})", expression)
        }
    }

    /// Column type clause: upper-cased type and suffix, nullability,
    /// default, auto-increment and comment.
    pub fn column_type(column: &ColumnDef) -> String {
        let base = upper_type_keywords(&column.column_type);
        let mut parts = vec![type_with_suffix(&base, column)];

        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());

        if let Some(default) = default_operand(column, |v| {
            format_default(v, &["NULL", "CURRENT_TIMESTAMP"], false, escape_single_quotes)
        }) {
            if column.default_is_expression {
                parts.push(format!("DEFAULT {}", Self::expression_default(&default)));
            } else {
                parts.push(format!("DEFAULT {}", default));
            }
        }

        if column.auto_increment {
            parts.push("AUTO_INCREMENT".to_string());
        }

        if let Some(comment) = column.comment() {
            parts.push(format!("COMMENT '{}'", escape_single_quotes(comment)));
        }

        parts.join(" ")
    }

    fn add_index_clause(index: &IndexDef) -> String {
        let kind = if index.unique { "UNIQUE INDEX" } else { "INDEX" };
        let mut clause = format!(
            "ADD {} {} ({})",
            kind,
            QUOTE.quote(&index.name),
            QUOTE.quote_list(&index.columns)
        );
        if let Some(method) = index.method.as_deref().filter(|m| !m.is_empty()) {
            clause.push_str(&format!(" USING {}", method.to_uppercase()));
        }
        if let Some(comment) = index.comment.as_deref().filter(|c| !c.is_empty()) {
            clause.push_str(&format!(" COMMENT '{}'", escape_single_quotes(comment)));
        }
        clause
    }

    /// One clause of the combined ALTER TABLE statement.
    pub fn build_alter_clause(action: &AlterTableAction) -> Result<String, AppError> {
        match action {
            AlterTableAction::AddColumn { column } => {
                let column = require_column(column)?;
                let mut clause = format!(
                    "ADD COLUMN {} {}",
                    QUOTE.quote(&column.name),
                    Self::column_type(column)
                );
                if let Some(after) = column.after.as_deref().filter(|a| !a.is_empty()) {
                    clause.push_str(&format!(" AFTER {}", QUOTE.quote(after)));
                }
                Ok(clause)
            }
            AlterTableAction::DropColumn { name } => {
                Ok(format!("DROP COLUMN {}", QUOTE.quote(name)))
            }
            AlterTableAction::ModifyColumn { column } => {
                let column = require_column(column)?;
                Ok(format!(
                    "MODIFY COLUMN {} {}",
                    QUOTE.quote(&column.name),
                    Self::column_type(column)
                ))
            }
            AlterTableAction::RenameColumn {
                old_name,
                new_name,
                column,
            } => {
                let column = column.as_ref().ok_or_else(|| {
                    AppError::Validation("column definition required for rename".to_string())
                })?;
                Ok(format!(
                    "CHANGE COLUMN {} {} {}",
                    QUOTE.quote(old_name),
                    QUOTE.quote(new_name),
                    Self::column_type(column)
                ))
            }
            AlterTableAction::AddIndex { index } => {
                Ok(Self::add_index_clause(require_index(index)?))
            }
            AlterTableAction::DropIndex { name } => Ok(format!("DROP INDEX {}", QUOTE.quote(name))),
        }
    }

    pub fn build_alter_sql(request: &AlterTableRequest) -> Result<String, AppError> {
        let target = QUOTE.qualified(&request.database, &request.table);
        plan_combined(request, &target, Self::build_alter_clause)
    }

    fn value_to_cell(value: MySqlValue, column_type: ColumnType) -> Cell {
        match value {
            MySqlValue::NULL => Cell::Null,
            MySqlValue::Int(i) => Cell::Integer(i),
            MySqlValue::UInt(u) => match i64::try_from(u) {
                Ok(i) => Cell::Integer(i),
                Err(_) => Cell::Text(u.to_string()),
            },
            MySqlValue::Float(f) => Cell::Float(f as f64),
            MySqlValue::Double(d) => Cell::Float(d),
            MySqlValue::Date(y, m, d, h, mi, s, us) => {
                match NaiveDate::from_ymd_opt(y as i32, m as u32, d as u32)
                    .and_then(|date| date.and_hms_micro_opt(h as u32, mi as u32, s as u32, us))
                {
                    Some(ts) => Cell::Timestamp(ts),
                    // zero dates
                    None => Cell::Text(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        y, m, d, h, mi, s
                    )),
                }
            }
            MySqlValue::Time(neg, days, h, m, s, _us) => {
                let hours = days * 24 + h as u32;
                let sign = if neg { "-" } else { "" };
                Cell::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, m, s))
            }
            MySqlValue::Bytes(bytes) => Self::decode_text(bytes, column_type),
        }
    }

    /// Text-protocol values arrive as bytes; recover the scalar from the column type.
    fn decode_text(bytes: Vec<u8>, column_type: ColumnType) -> Cell {
        let text = match std::str::from_utf8(&bytes) {
            Ok(t) => t,
            Err(_) => return Cell::from_bytes(bytes),
        };
        match column_type {
            ColumnType::MYSQL_TYPE_TINY
            | ColumnType::MYSQL_TYPE_SHORT
            | ColumnType::MYSQL_TYPE_LONG
            | ColumnType::MYSQL_TYPE_INT24
            | ColumnType::MYSQL_TYPE_LONGLONG
            | ColumnType::MYSQL_TYPE_YEAR => match text.parse::<i64>() {
                Ok(i) => Cell::Integer(i),
                Err(_) => Cell::Text(text.to_string()),
            },
            ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => {
                match text.parse::<f64>() {
                    Ok(f) => Cell::Float(f),
                    Err(_) => Cell::Text(text.to_string()),
                }
            }
            ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP => {
                match NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
                    Ok(ts) => Cell::Timestamp(ts),
                    Err(_) => Cell::Text(text.to_string()),
                }
            }
            ColumnType::MYSQL_TYPE_JSON => Cell::Structured(text.to_string()),
            _ => Cell::Text(text.to_string()),
        }
    }

    fn json_to_value(value: &Value) -> MySqlValue {
        match value {
            Value::Null => MySqlValue::NULL,
            Value::Bool(b) => MySqlValue::Int(*b as i64),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    MySqlValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    MySqlValue::UInt(u)
                } else {
                    MySqlValue::Double(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => MySqlValue::Bytes(s.as_bytes().to_vec()),
            other => MySqlValue::Bytes(other.to_string().into_bytes()),
        }
    }

    async fn exec_rows(
        pool: &Pool,
        sql: &str,
        params: impl Into<Params> + Send,
    ) -> Result<Vec<Row>, AppError> {
        let mut conn = Self::get_conn(pool).await?;
        conn.exec::<Row, _, _>(sql, params)
            .await
            .map_err(|e| Self::db_err("Catalog query failed", e))
    }

    async fn exec_affected(pool: &Pool, sql: &str, params: Params) -> Result<u64, AppError> {
        let mut conn = Self::get_conn(pool).await?;
        tracing::debug!("MySQL exec: {}", sql);
        conn.exec_drop(sql, params)
            .await
            .map_err(|e| Self::db_err("Statement failed", e))?;
        Ok(conn.affected_rows())
    }

    async fn list_tables(
        pool: &Pool,
        database: &str,
        type_filter: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let sql = format!(
            "SELECT TABLE_NAME, TABLE_TYPE, TABLE_ROWS, DATA_LENGTH, TABLE_COMMENT \
             FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE IN ({}) \
             ORDER BY TABLE_NAME",
            type_filter
        );
        let rows = Self::exec_rows(pool, &sql, (database,)).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let kind = if row_string(row, 1) == "VIEW" {
                    TableKind::View
                } else {
                    TableKind::BaseTable
                };
                let mut info = TableInfo::new(row_string(row, 0), database, kind);
                info.rows = row_i64(row, 2);
                info.size = row_i64(row, 3);
                info.comment = row_string(row, 4);
                info
            })
            .collect())
    }

    async fn show_create(pool: &Pool, sql: &str, column: usize) -> Result<String, AppError> {
        let rows = Self::exec_rows(pool, sql, ()).await?;
        rows.first()
            .map(|row| row_string(row, column))
            .filter(|ddl| !ddl.is_empty())
            .ok_or_else(|| {
                AppError::database(
                    EngineKind::MySql,
                    format!("{} returned no definition (missing privileges?)", sql),
                )
            })
    }
}

fn row_opt_string(row: &Row, idx: usize) -> Option<String> {
    match row.get_opt::<Option<String>, usize>(idx) {
        Some(Ok(value)) => value,
        _ => None,
    }
}

fn row_string(row: &Row, idx: usize) -> String {
    row_opt_string(row, idx).unwrap_or_default()
}

fn row_i64(row: &Row, idx: usize) -> i64 {
    match row.get_opt::<Option<i64>, usize>(idx) {
        Some(Ok(Some(value))) => value,
        _ => 0,
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
    }

    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        if descriptor.host.trim().is_empty() {
            return Err(AppError::Config("MySQL host is required".to_string()));
        }
        let mut url = Url::parse(&format!(
            "mysql://{}:{}",
            descriptor.host,
            descriptor.effective_port()
        ))
        .map_err(|e| AppError::Config(format!("Invalid MySQL host: {}", e)))?;

        url.set_username(&descriptor.username)
            .map_err(|_| AppError::Config("Invalid MySQL username".to_string()))?;
        if !descriptor.password.is_empty() {
            url.set_password(Some(&descriptor.password))
                .map_err(|_| AppError::Config("Invalid MySQL password".to_string()))?;
        }
        url.set_path(&descriptor.database);
        if !descriptor.params.is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.params.iter());
        }
        Ok(url.to_string())
    }

    fn quote_style(&self) -> QuoteStyle {
        QUOTE
    }

    fn classify(&self, sql: &str) -> StatementKind {
        SqlValidator::classify(sql, READ_KEYWORDS)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        // validates the descriptor before touching the network
        self.build_dsn(descriptor)?;
        if !descriptor.params.is_empty() {
            tracing::debug!(
                "MySQL connection parameters {:?} are informational only",
                descriptor.params.keys().collect::<Vec<_>>()
            );
        }

        let opts = OptsBuilder::default()
            .ip_or_hostname(descriptor.host.clone())
            .tcp_port(descriptor.effective_port())
            .user(Some(descriptor.username.clone()).filter(|u| !u.is_empty()))
            .pass(Some(descriptor.password.clone()).filter(|p| !p.is_empty()))
            .db_name(Some(descriptor.database.clone()).filter(|d| !d.is_empty()));
        let pool = Pool::new(opts);

        let mut conn = Self::get_conn(&pool).await?;
        conn.ping().await.map_err(|e| {
            AppError::connection(EngineKind::MySql, format!("Ping failed: {}", e))
        })?;
        drop(conn);

        tracing::info!(
            "Connected to MySQL at {}:{}",
            descriptor.host,
            descriptor.effective_port()
        );
        Ok(EngineHandle::MySql(pool))
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        let mut conn = Self::get_conn(handle.mysql()?).await?;
        conn.ping()
            .await
            .map_err(|e| AppError::connection(EngineKind::MySql, format!("Ping failed: {}", e)))
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        let pool = handle.mysql()?.clone();
        pool.disconnect().await.map_err(|e| {
            AppError::connection(EngineKind::MySql, format!("Failed to close pool: {}", e))
        })
    }

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        let sql = format!(
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA \
             WHERE SCHEMA_NAME NOT IN ({}) ORDER BY SCHEMA_NAME",
            SYSTEM_SCHEMAS
        );
        let rows = Self::exec_rows(handle.mysql()?, &sql, ()).await?;
        Ok(rows.iter().map(|row| row_string(row, 0)).collect())
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        Self::list_tables(handle.mysql()?, database, "'BASE TABLE', 'VIEW'").await
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        let pool = handle.mysql()?;
        let rows = Self::exec_rows(
            pool,
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY, EXTRA, COLUMN_COMMENT \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (database, table),
        )
        .await?;

        let columns = rows
            .iter()
            .map(|row| {
                let mut col = ColumnInfo::new(
                    row_string(row, 0),
                    row_string(row, 1),
                    row_string(row, 2) == "YES",
                );
                col.default_value = row_opt_string(row, 3);
                col.key = KeyRole::from_tag(&row_string(row, 4));
                col.extra = row_string(row, 5);
                // 8.0 flags expression defaults; plain defaults are bare values
                col.default_is_expression = col.extra.contains("DEFAULT_GENERATED");
                col.comment = row_string(row, 6);
                col
            })
            .collect();

        let indexes = self.get_indexes(handle, database, table).await?;

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
        Self::list_tables(handle.mysql()?, database, "'VIEW'").await
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        let rows = Self::exec_rows(
            handle.mysql()?,
            "SELECT INDEX_NAME, COLUMN_NAME, NON_UNIQUE, INDEX_TYPE, INDEX_COMMENT \
             FROM INFORMATION_SCHEMA.STATISTICS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY INDEX_NAME, SEQ_IN_INDEX",
            (database, table),
        )
        .await?;

        let mut collector = IndexCollector::new();
        for row in &rows {
            let name = row_string(row, 0);
            let column = row_opt_string(row, 1);
            let method = row_string(row, 3);
            collector.push(
                &name,
                column.as_deref(),
                row_i64(row, 2) == 0,
                name == "PRIMARY",
                Some(method.as_str()),
            );
            let comment = row_string(row, 4);
            if !comment.is_empty() {
                collector.set_comment(&name, &comment);
            }
        }
        Ok(collector.finish(table))
    }

    async fn get_routines(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        let rows = Self::exec_rows(
            handle.mysql()?,
            "SELECT ROUTINE_NAME, ROUTINE_TYPE, ROUTINE_COMMENT \
             FROM INFORMATION_SCHEMA.ROUTINES \
             WHERE ROUTINE_SCHEMA = ? \
             ORDER BY ROUTINE_TYPE DESC, ROUTINE_NAME",
            (database,),
        )
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind = RoutineKind::from_tag(&row_string(row, 1))?;
                Some(RoutineInfo {
                    name: row_string(row, 0),
                    kind,
                    database: database.to_string(),
                    schema: String::new(),
                    comment: row_string(row, 2),
                })
            })
            .collect())
    }

    async fn get_view_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        view: &str,
    ) -> Result<String, AppError> {
        let sql = format!("SHOW CREATE VIEW {}", QUOTE.qualified(database, view));
        Self::show_create(handle.mysql()?, &sql, 1).await
    }

    async fn get_routine_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        name: &str,
        kind: RoutineKind,
    ) -> Result<String, AppError> {
        let sql = format!(
            "SHOW CREATE {} {}",
            kind.as_str(),
            QUOTE.qualified(database, name)
        );
        Self::show_create(handle.mysql()?, &sql, 2).await
    }

    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        let start = Instant::now();
        let mut conn = Self::get_conn(handle.mysql()?).await?;
        conn.query_drop(sql)
            .await
            .map_err(|e| Self::db_err("Statement failed", e))?;
        Ok(ExecuteResult::new(conn.affected_rows(), start.elapsed()))
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let start = Instant::now();
        let mut conn = Self::get_conn(handle.mysql()?).await?;
        let restore = if opts.database.is_empty() {
            None
        } else {
            Self::switch_database(&mut conn, &opts.database).await?
        };

        let result = Self::run_query(&mut conn, self.classify(sql), sql, start).await;

        if let Some(previous) = restore {
            Self::restore_database(conn, previous).await;
        }
        result
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        require_row(EngineKind::MySql, row)?;
        let columns: Vec<String> = row.keys().cloned().collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            QUOTE.qualified(database, table),
            QUOTE.quote_list(&columns),
            placeholders
        );
        let values = row.values().map(Self::json_to_value).collect();
        Self::exec_affected(handle.mysql()?, &sql, Params::Positional(values)).await
    }

    async fn update(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::MySql, where_clause)?;
        require_row(EngineKind::MySql, row)?;
        let sets: Vec<String> = row
            .keys()
            .map(|col| format!("{} = ?", QUOTE.quote(col)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            QUOTE.qualified(database, table),
            sets.join(", "),
            where_clause
        );
        let values = row.values().map(Self::json_to_value).collect();
        Self::exec_affected(handle.mysql()?, &sql, Params::Positional(values)).await
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::MySql, where_clause)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            QUOTE.qualified(database, table),
            where_clause
        );
        Self::exec_affected(handle.mysql()?, &sql, Params::Empty).await
    }

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        let sql = format!("SHOW CREATE TABLE {}", QUOTE.qualified(database, table));
        Self::show_create(handle.mysql()?, &sql, 1).await
    }

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        let sql = Self::build_alter_sql(request)?;
        tracing::info!("Altering MySQL table {}.{}", request.database, request.table);
        execute_combined(self, handle, request, &sql).await?;
        Ok(AlterOutcome::Applied {
            statements: vec![sql],
        })
    }

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError> {
        let sql = format!(
            "RENAME TABLE {} TO {}",
            QUOTE.qualified(database, old_name),
            QUOTE.qualified(database, new_name)
        );
        self.execute(handle, &sql).await.map(|_| ())
    }
}
