// PostgreSQL adapter using connection pooling for optimal resource management
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableAction, AlterTableRequest, Cell, ColumnDef, ColumnInfo,
    ConnectionDescriptor, EngineKind, ExecuteResult, IndexCollector, IndexDef, IndexInfo,
    KeyRole, QueryOptions, QueryResult, RoutineInfo, RoutineKind, RowData, TableInfo, TableKind,
    TableSchema,
};
use crate::services::database::adapter::{
    require_row, require_where, DatabaseAdapter, SchemaAwareAdapter,
};
use crate::services::database::ddl::{
    default_operand, escape_single_quotes, execute_plan, format_default, plan_statements,
    require_column, require_index, type_with_suffix, upper_type_keywords, PlannedStatement,
    QuoteStyle,
};
use crate::services::database::handle::EngineHandle;
use crate::validation::{SqlValidator, StatementKind};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Object, RecyclingMethod, Runtime};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::time::Instant;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, Row, SimpleQueryMessage};

pub const READ_KEYWORDS: &[&str] = &["SELECT", "SHOW", "EXPLAIN", "WITH", "VALUES", "TABLE"];

pub const DEFAULT_SCHEMA: &str = "public";

const QUOTE: QuoteStyle = QuoteStyle::DoubleQuote;

const DEFAULT_KEYWORDS: &[&str] = &["NULL", "CURRENT_TIMESTAMP", "NOW()"];

type BoxedParam = Box<dyn ToSql + Sync + Send>;

/// Catalog details that differ between engines speaking the PostgreSQL
/// protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgProfile {
    pub(crate) engine: EngineKind,
    /// Predicate over `pg_database.datname` selecting user catalogs.
    pub(crate) visible_databases: &'static str,
    /// Row estimate expression over `pg_stat_user_tables s`.
    pub(crate) row_estimate: &'static str,
}

impl PgProfile {
    pub const POSTGRES: PgProfile = PgProfile {
        engine: EngineKind::PostgreSql,
        visible_databases: "datname <> 'postgres'",
        row_estimate: "s.n_live_tup",
    };
}

#[derive(Debug, Clone, Copy)]
pub struct PostgresAdapter {
    profile: PgProfile,
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl PostgresAdapter {
    pub fn new() -> Self {
        Self::with_profile(PgProfile::POSTGRES)
    }

    pub(crate) fn with_profile(profile: PgProfile) -> Self {
        Self { profile }
    }

    fn engine_kind(&self) -> EngineKind {
        self.profile.engine
    }

    /// Get a connection from the pool
    async fn client(&self, handle: &EngineHandle) -> Result<Object, AppError> {
        handle.postgres()?.get().await.map_err(|e| {
            AppError::connection(
                self.engine_kind(),
                format!("Failed to get connection from pool: {}", e),
            )
        })
    }

    fn db_err(&self, context: &str, e: tokio_postgres::Error) -> AppError {
        let details = if let Some(db_error) = e.as_db_error() {
            format!(
                "{}: Code: {}, Message: {}",
                context,
                db_error.code().code(),
                db_error.message()
            )
        } else {
            format!("{}: {}", context, e)
        };
        AppError::database(self.engine_kind(), details)
    }

    async fn catalog_rows(
        &self,
        handle: &EngineHandle,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<Row>, AppError> {
        let client = self.client(handle).await?;
        client
            .query(sql, params)
            .await
            .map_err(|e| self.db_err("Catalog query failed", e))
    }

    /// `host=H port=P user=U password=W dbname=D sslmode=disable k=v`
    pub fn build_key_value_dsn(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<String, AppError> {
        if descriptor.host.trim().is_empty() {
            return Err(AppError::Config(format!(
                "{} host is required",
                self.engine_kind()
            )));
        }

        let mut parts = vec![
            format!("host={}", dsn_value(&descriptor.host)),
            format!("port={}", descriptor.effective_port()),
        ];
        if !descriptor.username.is_empty() {
            parts.push(format!("user={}", dsn_value(&descriptor.username)));
        }
        if !descriptor.password.is_empty() {
            parts.push(format!("password={}", dsn_value(&descriptor.password)));
        }
        if !descriptor.database.is_empty() {
            parts.push(format!("dbname={}", dsn_value(&descriptor.database)));
        }
        if !descriptor.params.contains_key("sslmode") {
            parts.push("sslmode=disable".to_string());
        }
        for (key, value) in &descriptor.params {
            parts.push(format!("{}={}", key, dsn_value(value)));
        }
        Ok(parts.join(" "))
    }

    /// Serial pseudo type for an auto-increment integer column.
    fn serial_type(column: &ColumnDef) -> Option<&'static str> {
        if !column.auto_increment {
            return None;
        }
        match column.column_type.trim().to_uppercase().as_str() {
            "INT" | "INTEGER" | "INT4" => Some("SERIAL"),
            "BIGINT" | "INT8" => Some("BIGSERIAL"),
            "SMALLINT" | "INT2" => Some("SMALLSERIAL"),
            _ => None,
        }
    }

    /// Declared type, with auto-increment integers turned into serial types.
    pub fn base_type(column: &ColumnDef) -> String {
        match Self::serial_type(column) {
            Some(serial) => serial.to_string(),
            None => type_with_suffix(&upper_type_keywords(&column.column_type), column),
        }
    }

    pub fn format_default(value: &str) -> String {
        format_default(value, DEFAULT_KEYWORDS, true, escape_single_quotes)
    }

    /// Column type clause used by ADD COLUMN. A serial column owns its
    /// sequence default, so a described `nextval(..)` is not repeated.
    pub fn column_type(column: &ColumnDef) -> String {
        let mut def = Self::base_type(column);
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        if Self::serial_type(column).is_none() {
            if let Some(default) = default_operand(column, Self::format_default) {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        def
    }

    fn comment_statement(target: &str, column: &ColumnDef) -> Option<String> {
        column.comment().map(|comment| {
            format!(
                "COMMENT ON COLUMN {}.{} IS '{}'",
                target,
                QUOTE.quote(&column.name),
                escape_single_quotes(comment)
            )
        })
    }

    fn create_index_statement(schema: &str, table: &str, index: &IndexDef) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {}",
            if index.unique { "UNIQUE " } else { "" },
            QUOTE.quote(&index.name),
            QUOTE.qualified(schema, table)
        );
        if let Some(method) = index.method.as_deref().filter(|m| !m.is_empty()) {
            sql.push_str(&format!(" USING {}", method.to_uppercase()));
        }
        sql.push_str(&format!(" ({})", QUOTE.quote_list(&index.columns)));
        sql
    }

    fn modify_statements(target: &str, column: &ColumnDef) -> Vec<String> {
        let name = QUOTE.quote(&column.name);
        // serial types are creation-only pseudo types
        let base = type_with_suffix(&upper_type_keywords(&column.column_type), column);
        let mut statements = vec![
            format!("ALTER TABLE {} ALTER COLUMN {} TYPE {}", target, name, base),
            format!(
                "ALTER TABLE {} ALTER COLUMN {} {} NOT NULL",
                target,
                name,
                if column.nullable { "DROP" } else { "SET" }
            ),
        ];
        if let Some(default) = default_operand(column, Self::format_default) {
            if default.eq_ignore_ascii_case("NULL") {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} DROP DEFAULT",
                    target, name
                ));
            } else {
                statements.push(format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    target, name, default
                ));
            }
        }
        statements
    }

    /// Statements realizing one action against `schema.table`.
    pub fn action_statements(
        schema: &str,
        table: &str,
        action: &AlterTableAction,
    ) -> Result<Vec<String>, AppError> {
        let target = QUOTE.qualified(schema, table);
        let mut statements = Vec::new();
        match action {
            AlterTableAction::AddColumn { column } => {
                let column = require_column(column)?;
                statements.push(format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    target,
                    QUOTE.quote(&column.name),
                    Self::column_type(column)
                ));
                statements.extend(Self::comment_statement(&target, column));
            }
            AlterTableAction::DropColumn { name } => {
                statements.push(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    target,
                    QUOTE.quote(name)
                ));
            }
            AlterTableAction::ModifyColumn { column } => {
                let column = require_column(column)?;
                statements.extend(Self::modify_statements(&target, column));
                statements.extend(Self::comment_statement(&target, column));
            }
            AlterTableAction::RenameColumn {
                old_name, new_name, ..
            } => {
                statements.push(format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    target,
                    QUOTE.quote(old_name),
                    QUOTE.quote(new_name)
                ));
            }
            AlterTableAction::AddIndex { index } => {
                statements.push(Self::create_index_statement(schema, table, require_index(index)?));
            }
            AlterTableAction::DropIndex { name } => {
                statements.push(format!("DROP INDEX {}", QUOTE.qualified(schema, name)));
            }
        }
        Ok(statements)
    }

    pub fn plan_alter(request: &AlterTableRequest) -> Result<Vec<PlannedStatement>, AppError> {
        let schema = request
            .schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SCHEMA);
        plan_statements(request, |action| {
            Self::action_statements(schema, &request.table, action)
        })
    }

    async fn tables_in(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let sql = format!(
            r#"
            SELECT
                t.table_name::text,
                COALESCE({}, 0)::bigint,
                COALESCE(pg_total_relation_size(format('%I.%I', t.table_schema, t.table_name)::regclass), 0)::bigint,
                COALESCE(obj_description(format('%I.%I', t.table_schema, t.table_name)::regclass, 'pg_class'), '')
            FROM information_schema.tables t
            LEFT JOIN pg_stat_user_tables s
                ON s.schemaname = t.table_schema AND s.relname = t.table_name
            WHERE t.table_schema = $1::text AND t.table_type = 'BASE TABLE'
            ORDER BY t.table_name
            "#,
            self.profile.row_estimate
        );
        let rows = self.catalog_rows(handle, &sql, &[&schema]).await?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut info = TableInfo::new(pg_string(row, 0), database, TableKind::BaseTable);
                info.schema = schema.to_string();
                info.rows = pg_i64(row, 1);
                info.size = pg_i64(row, 2);
                info.comment = pg_string(row, 3);
                info
            })
            .collect())
    }

    async fn views_in(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                "SELECT table_name::text FROM information_schema.views \
                 WHERE table_schema = $1::text ORDER BY table_name",
                &[&schema],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut info = TableInfo::new(pg_string(row, 0), database, TableKind::View);
                info.schema = schema.to_string();
                info
            })
            .collect())
    }

    async fn key_roles(
        &self,
        handle: &EngineHandle,
        schema: &str,
        table: &str,
    ) -> Result<Vec<(String, KeyRole)>, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                r#"
                SELECT a.attname::text, con.contype::text
                FROM pg_constraint con
                JOIN pg_class c ON c.oid = con.conrelid
                JOIN pg_namespace n ON n.oid = c.relnamespace
                JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = ANY(con.conkey)
                WHERE n.nspname = $1::text AND c.relname = $2::text AND con.contype IN ('p', 'u')
                "#,
                &[&schema, &table],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let role = if pg_string(row, 1) == "p" {
                    KeyRole::Primary
                } else {
                    KeyRole::Unique
                };
                (pg_string(row, 0), role)
            })
            .collect())
    }

    async fn schema_in(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                r#"
                SELECT
                    a.attname::text,
                    format_type(a.atttypid, a.atttypmod),
                    NOT a.attnotnull,
                    pg_get_expr(d.adbin, d.adrelid),
                    COALESCE(col_description(c.oid, a.attnum), '')
                FROM pg_attribute a
                JOIN pg_class c ON c.oid = a.attrelid
                JOIN pg_namespace n ON n.oid = c.relnamespace
                LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
                WHERE n.nspname = $1::text AND c.relname = $2::text
                    AND a.attnum > 0 AND NOT a.attisdropped
                ORDER BY a.attnum
                "#,
                &[&schema, &table],
            )
            .await?;

        let keys = self.key_roles(handle, schema, table).await?;
        let columns = rows
            .iter()
            .map(|row| {
                let name = pg_string(row, 0);
                let nullable = row.try_get::<_, bool>(2).unwrap_or(true);
                let mut col = ColumnInfo::new(name.clone(), pg_string(row, 1), nullable);
                col.default_value = pg_opt_string(row, 3);
                col.default_is_expression = col.default_value.is_some();
                if col
                    .default_value
                    .as_deref()
                    .map_or(false, |d| d.starts_with("nextval("))
                {
                    col.extra = "auto_increment".to_string();
                }
                col.comment = pg_string(row, 4);
                // a primary key outranks a unique constraint on the same column
                col.key = keys
                    .iter()
                    .filter(|(column, _)| *column == name)
                    .map(|(_, role)| *role)
                    .fold(KeyRole::None, |best, role| match (best, role) {
                        (KeyRole::Primary, _) | (_, KeyRole::Primary) => KeyRole::Primary,
                        (_, role) => role,
                    });
                col
            })
            .collect();

        let indexes = self.indexes_in(handle, schema, table).await?;

        Ok(TableSchema {
            database: database.to_string(),
            schema: schema.to_string(),
            table: table.to_string(),
            columns,
            indexes,
        })
    }

    async fn indexes_in(
        &self,
        handle: &EngineHandle,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                r#"
                SELECT ic.relname::text, a.attname::text, i.indisunique, i.indisprimary, am.amname::text
                FROM pg_index i
                JOIN pg_class ic ON ic.oid = i.indexrelid
                JOIN pg_class c ON c.oid = i.indrelid
                JOIN pg_namespace n ON n.oid = c.relnamespace
                JOIN pg_am am ON am.oid = ic.relam
                CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, pos)
                LEFT JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
                WHERE n.nspname = $1::text AND c.relname = $2::text
                ORDER BY ic.relname, k.pos
                "#,
                &[&schema, &table],
            )
            .await?;

        let mut collector = IndexCollector::new();
        for row in &rows {
            let column = pg_opt_string(row, 1);
            let method = pg_string(row, 4);
            collector.push(
                &pg_string(row, 0),
                column.as_deref(),
                row.try_get::<_, bool>(2).unwrap_or(false),
                row.try_get::<_, bool>(3).unwrap_or(false),
                Some(method.as_str()),
            );
        }
        Ok(collector.finish(table))
    }

    async fn routines_in(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                "SELECT routine_name::text, routine_type::text FROM information_schema.routines \
                 WHERE routine_schema = $1::text ORDER BY routine_type DESC, routine_name",
                &[&schema],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind = RoutineKind::from_tag(&pg_string(row, 1))?;
                Some(RoutineInfo {
                    name: pg_string(row, 0),
                    kind,
                    database: database.to_string(),
                    schema: schema.to_string(),
                    comment: String::new(),
                })
            })
            .collect())
    }

    async fn single_text(
        &self,
        handle: &EngineHandle,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        missing: String,
    ) -> Result<String, AppError> {
        let rows = self.catalog_rows(handle, sql, params).await?;
        rows.first()
            .and_then(|row| pg_opt_string(row, 0))
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::database(self.engine_kind(), missing))
    }

    async fn write_with_params(
        &self,
        handle: &EngineHandle,
        sql: &str,
        columns: &[&String],
        values: &[&Value],
    ) -> Result<u64, AppError> {
        let client = self.client(handle).await?;
        tracing::debug!("{} exec: {}", self.engine_kind(), sql);
        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| self.db_err("Failed to prepare statement", e))?;

        let mut params: Vec<BoxedParam> = Vec::with_capacity(values.len());
        for ((value, column), ty) in values.iter().zip(columns).zip(stmt.params()) {
            params.push(bind_param(value, ty, column)?);
        }
        let refs: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| &**p as &(dyn ToSql + Sync))
            .collect();

        client
            .execute(&stmt, &refs)
            .await
            .map_err(|e| self.db_err("Statement failed", e))
    }
}

fn dsn_value(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '\'', '\\']) {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

fn pg_opt_string(row: &Row, idx: usize) -> Option<String> {
    row.try_get::<_, Option<String>>(idx).ok().flatten()
}

fn pg_string(row: &Row, idx: usize) -> String {
    pg_opt_string(row, idx).unwrap_or_default()
}

fn pg_i64(row: &Row, idx: usize) -> i64 {
    row.try_get::<_, Option<i64>>(idx).ok().flatten().unwrap_or(0)
}

/// Wire bytes of any column type, for types without a richer mapping.
struct RawValue(Vec<u8>);

impl<'a> FromSql<'a> for RawValue {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawValue(raw.to_vec()))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

fn get_cell<'a, T, F>(row: &'a Row, idx: usize, to_cell: F) -> Cell
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Cell,
{
    match row.try_get::<_, Option<T>>(idx) {
        Ok(Some(value)) => to_cell(value),
        Ok(None) => Cell::Null,
        Err(e) => {
            tracing::debug!("Failed to decode column {}: {}", idx, e);
            Cell::Null
        }
    }
}

fn pg_cell(row: &Row, idx: usize, ty: &Type) -> Cell {
    match *ty {
        Type::BOOL => get_cell(row, idx, Cell::Bool),
        Type::INT2 => get_cell(row, idx, |v: i16| Cell::Integer(v as i64)),
        Type::INT4 => get_cell(row, idx, |v: i32| Cell::Integer(v as i64)),
        Type::INT8 => get_cell(row, idx, Cell::Integer),
        Type::OID => get_cell(row, idx, |v: u32| Cell::Integer(v as i64)),
        Type::FLOAT4 => get_cell(row, idx, |v: f32| Cell::Float(v as f64)),
        Type::FLOAT8 => get_cell(row, idx, Cell::Float),
        Type::NUMERIC => get_cell(row, idx, |v: Decimal| Cell::Text(v.to_string())),
        Type::TIMESTAMP => get_cell(row, idx, Cell::Timestamp),
        Type::TIMESTAMPTZ => get_cell(row, idx, |v: DateTime<Utc>| Cell::Timestamp(v.naive_utc())),
        Type::DATE => get_cell(row, idx, |v: NaiveDate| Cell::Text(v.to_string())),
        Type::TIME => get_cell(row, idx, |v: NaiveTime| Cell::Text(v.to_string())),
        Type::JSON | Type::JSONB => get_cell(row, idx, |v: Value| Cell::Structured(v.to_string())),
        Type::UUID => get_cell(row, idx, |v: uuid::Uuid| Cell::Text(v.to_string())),
        Type::BYTEA => get_cell(row, idx, |v: Vec<u8>| Cell::from_bytes(v)),
        _ if <String as FromSql<'_>>::accepts(ty) => get_cell(row, idx, Cell::Text),
        _ => get_cell(row, idx, |v: RawValue| Cell::from_bytes(v.0)),
    }
}

fn convert<T, F>(value: &Value, column: &str, ty: &Type, parse: F) -> Result<Option<T>, AppError>
where
    F: FnOnce(&Value) -> Option<T>,
{
    if value.is_null() {
        return Ok(None);
    }
    parse(value).map(Some).ok_or_else(|| {
        AppError::Validation(format!(
            "value {} for column {} is not a valid {}",
            value, column, ty
        ))
    })
}

fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Some(true),
            "false" | "f" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn json_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Typed parameter for `value`, chosen from the placeholder type the server
/// inferred for `column`.
fn bind_param(value: &Value, ty: &Type, column: &str) -> Result<BoxedParam, AppError> {
    let param: BoxedParam = match *ty {
        Type::BOOL => Box::new(convert(value, column, ty, json_bool)?),
        Type::INT2 => Box::new(convert(value, column, ty, |v| {
            json_i64(v).and_then(|i| i16::try_from(i).ok())
        })?),
        Type::INT4 => Box::new(convert(value, column, ty, |v| {
            json_i64(v).and_then(|i| i32::try_from(i).ok())
        })?),
        Type::INT8 => Box::new(convert(value, column, ty, json_i64)?),
        Type::OID => Box::new(convert(value, column, ty, |v| {
            json_i64(v).and_then(|i| u32::try_from(i).ok())
        })?),
        Type::FLOAT4 => Box::new(convert(value, column, ty, |v| json_f64(v).map(|f| f as f32))?),
        Type::FLOAT8 => Box::new(convert(value, column, ty, json_f64)?),
        Type::NUMERIC => Box::new(convert(value, column, ty, |v| {
            let text = json_text(v);
            Decimal::from_str(text.trim())
                .or_else(|_| Decimal::from_scientific(text.trim()))
                .ok()
        })?),
        Type::JSON | Type::JSONB => Box::new(convert(value, column, ty, |v| Some(v.clone()))?),
        Type::TIMESTAMP => {
            Box::new(convert(value, column, ty, |v| parse_timestamp(&json_text(v)))?)
        }
        Type::TIMESTAMPTZ => Box::new(convert(value, column, ty, |v| {
            let text = json_text(v);
            DateTime::parse_from_rfc3339(text.trim())
                .map(|ts| ts.with_timezone(&Utc))
                .ok()
                .or_else(|| parse_timestamp(&text).map(|ts| ts.and_utc()))
        })?),
        Type::DATE => Box::new(convert(value, column, ty, |v| {
            NaiveDate::parse_from_str(json_text(v).trim(), "%Y-%m-%d").ok()
        })?),
        Type::TIME => Box::new(convert(value, column, ty, |v| {
            NaiveTime::parse_from_str(json_text(v).trim(), "%H:%M:%S%.f").ok()
        })?),
        Type::UUID => Box::new(convert(value, column, ty, |v| {
            uuid::Uuid::parse_str(json_text(v).trim()).ok()
        })?),
        Type::BYTEA => Box::new(convert(value, column, ty, |v| {
            Some(json_text(v).into_bytes())
        })?),
        _ if <String as ToSql>::accepts(ty) => {
            Box::new(convert(value, column, ty, |v| Some(json_text(v)))?)
        }
        _ => {
            return Err(AppError::Validation(format!(
                "column {} has type {} which cannot be bound as a parameter",
                column, ty
            )))
        }
    };
    Ok(param)
}

#[async_trait::async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn engine(&self) -> EngineKind {
        self.engine_kind()
    }

    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        self.build_key_value_dsn(descriptor)
    }

    fn quote_style(&self) -> QuoteStyle {
        QUOTE
    }

    fn classify(&self, sql: &str) -> StatementKind {
        SqlValidator::classify(sql, READ_KEYWORDS)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        let dsn = self.build_key_value_dsn(descriptor)?;

        let mut cfg = PoolConfig::new();
        cfg.url = Some(dsn);
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                AppError::Config(format!(
                    "Failed to create {} connection pool: {}",
                    self.engine_kind(),
                    e
                ))
            })?;

        let handle = EngineHandle::Postgres(pool);
        self.ping(&handle).await?;

        tracing::info!(
            "Connected to {} at {}:{}",
            self.engine_kind(),
            descriptor.host,
            descriptor.effective_port()
        );
        Ok(handle)
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        let client = self.client(handle).await?;
        client.simple_query("SELECT 1").await.map_err(|e| {
            AppError::connection(self.engine_kind(), format!("Ping failed: {}", e))
        })?;
        Ok(())
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        handle.postgres()?.close();
        Ok(())
    }

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        let sql = format!(
            "SELECT datname::text FROM pg_database \
             WHERE datistemplate = false AND {} ORDER BY datname",
            self.profile.visible_databases
        );
        let rows = self.catalog_rows(handle, &sql, &[]).await?;
        Ok(rows.iter().map(|row| pg_string(row, 0)).collect())
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.tables_in(handle, database, DEFAULT_SCHEMA).await
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        self.schema_in(handle, database, DEFAULT_SCHEMA, table).await
    }

    async fn get_views(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.views_in(handle, database, DEFAULT_SCHEMA).await
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        self.indexes_in(handle, DEFAULT_SCHEMA, table).await
    }

    async fn get_routines(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        self.routines_in(handle, database, DEFAULT_SCHEMA).await
    }

    async fn get_view_definition(
        &self,
        handle: &EngineHandle,
        _database: &str,
        view: &str,
    ) -> Result<String, AppError> {
        let body = self
            .single_text(
                handle,
                "SELECT pg_get_viewdef(format('%I.%I', $1::text, $2::text)::regclass, true)",
                &[&DEFAULT_SCHEMA, &view],
                format!("View {} not found", view),
            )
            .await?;
        Ok(format!(
            "CREATE OR REPLACE VIEW {} AS\n{}",
            QUOTE.qualified(DEFAULT_SCHEMA, view),
            body.trim_end()
        ))
    }

    async fn get_routine_definition(
        &self,
        handle: &EngineHandle,
        _database: &str,
        name: &str,
        kind: RoutineKind,
    ) -> Result<String, AppError> {
        let prokind = match kind {
            RoutineKind::Function => "f",
            RoutineKind::Procedure => "p",
        };
        self.single_text(
            handle,
            r#"
            SELECT pg_get_functiondef(p.oid)
            FROM pg_proc p
            JOIN pg_namespace n ON n.oid = p.pronamespace
            WHERE n.nspname = $1::text AND p.proname = $2::text AND p.prokind::text = $3::text
            LIMIT 1
            "#,
            &[&DEFAULT_SCHEMA, &name, &prokind],
            format!("{} {} not found", kind.as_str(), name),
        )
        .await
    }

    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        let start = Instant::now();
        let client = self.client(handle).await?;
        let messages = client
            .simple_query(sql)
            .await
            .map_err(|e| self.db_err("Statement failed", e))?;
        let affected: u64 = messages
            .iter()
            .map(|msg| match msg {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum();
        Ok(ExecuteResult::new(affected, start.elapsed()))
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        _opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let start = Instant::now();
        let client = self.client(handle).await?;

        if self.classify(sql) == StatementKind::RowCount {
            let affected = client
                .execute(sql, &[])
                .await
                .map_err(|e| self.db_err("Statement failed", e))?;
            return Ok(QueryResult::affected(affected, start.elapsed()));
        }

        let stmt = client
            .prepare(sql)
            .await
            .map_err(|e| self.db_err("Query execution failed", e))?;
        let rows = client
            .query(&stmt, &[])
            .await
            .map_err(|e| self.db_err("Query execution failed", e))?;

        let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();
        let cells = rows
            .iter()
            .map(|row| {
                stmt.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, column)| pg_cell(row, idx, column.type_()))
                    .collect()
            })
            .collect();

        Ok(QueryResult::from_rows(columns, cells, start.elapsed()))
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        require_row(self.engine_kind(), row)?;
        let columns: Vec<&String> = row.keys().collect();
        let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            QUOTE.qualified(DEFAULT_SCHEMA, table),
            QUOTE.quote_list(&names),
            placeholders.join(", ")
        );
        let values: Vec<&Value> = row.values().collect();
        self.write_with_params(handle, &sql, &columns, &values).await
    }

    async fn update(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(self.engine_kind(), where_clause)?;
        require_row(self.engine_kind(), row)?;
        let columns: Vec<&String> = row.keys().collect();
        let sets: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, col)| format!("{} = ${}", QUOTE.quote(col), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            QUOTE.qualified(DEFAULT_SCHEMA, table),
            sets.join(", "),
            where_clause
        );
        let values: Vec<&Value> = row.values().collect();
        self.write_with_params(handle, &sql, &columns, &values).await
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(self.engine_kind(), where_clause)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            QUOTE.qualified(DEFAULT_SCHEMA, table),
            where_clause
        );
        let client = self.client(handle).await?;
        client
            .execute(sql.as_str(), &[])
            .await
            .map_err(|e| self.db_err("Statement failed", e))
    }

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        _database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        self.single_text(
            handle,
            r#"
            SELECT 'CREATE TABLE ' || quote_ident(n.nspname) || '.' || quote_ident(c.relname) || E' (\n' ||
                string_agg(
                    '  ' || quote_ident(a.attname) || ' ' || format_type(a.atttypid, a.atttypmod) ||
                    CASE WHEN a.attnotnull THEN ' NOT NULL' ELSE '' END ||
                    COALESCE(' DEFAULT ' || pg_get_expr(d.adbin, d.adrelid), ''),
                    E',\n' ORDER BY a.attnum
                ) ||
                COALESCE((
                    SELECT E',\n  CONSTRAINT ' || quote_ident(con.conname) || ' ' || pg_get_constraintdef(con.oid)
                    FROM pg_constraint con
                    WHERE con.conrelid = c.oid AND con.contype = 'p'
                ), '') ||
                E'\n)'
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            JOIN pg_attribute a ON a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
            LEFT JOIN pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
            WHERE n.nspname = $1::text AND c.relname = $2::text
            GROUP BY c.oid, n.nspname, c.relname
            "#,
            &[&DEFAULT_SCHEMA, &table],
            format!("Table {} not found", table),
        )
        .await
    }

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        let plan = Self::plan_alter(request)?;
        tracing::info!(
            "Altering {} table {} ({} statements)",
            self.engine_kind(),
            request.table,
            plan.len()
        );
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
            QUOTE.qualified(DEFAULT_SCHEMA, old_name),
            QUOTE.quote(new_name)
        );
        self.execute(handle, &sql).await.map(|_| ())
    }

    fn as_schema_aware(&self) -> Option<&dyn SchemaAwareAdapter> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl SchemaAwareAdapter for PostgresAdapter {
    async fn get_schemas(
        &self,
        handle: &EngineHandle,
        _database: &str,
    ) -> Result<Vec<String>, AppError> {
        let rows = self
            .catalog_rows(
                handle,
                "SELECT schema_name::text FROM information_schema.schemata \
                 WHERE schema_name NOT IN ('pg_catalog', 'information_schema', 'pg_toast') \
                 ORDER BY schema_name",
                &[],
            )
            .await?;
        Ok(rows.iter().map(|row| pg_string(row, 0)).collect())
    }

    async fn get_tables_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.tables_in(handle, database, schema).await
    }

    async fn get_table_schema_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        self.schema_in(handle, database, schema, table).await
    }

    async fn get_views_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.views_in(handle, database, schema).await
    }

    async fn get_indexes_in_schema(
        &self,
        handle: &EngineHandle,
        _database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        self.indexes_in(handle, schema, table).await
    }

    async fn get_routines_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        self.routines_in(handle, database, schema).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_dsn() {
        let desc = ConnectionDescriptor::new(EngineKind::PostgreSql, "db.local", 0)
            .with_credentials("app", "s3cret")
            .with_database("shop")
            .with_param("application_name", "dbm");
        let dsn = PostgresAdapter::new().build_dsn(&desc).unwrap();
        assert_eq!(
            dsn,
            "host=db.local port=5432 user=app password=s3cret dbname=shop sslmode=disable application_name=dbm"
        );
    }

    #[test]
    fn test_key_value_dsn_quotes_and_sslmode_override() {
        let desc = ConnectionDescriptor::new(EngineKind::PostgreSql, "localhost", 5433)
            .with_credentials("app", "it's a pass")
            .with_param("sslmode", "require");
        let dsn = PostgresAdapter::new().build_dsn(&desc).unwrap();
        assert_eq!(
            dsn,
            "host=localhost port=5433 user=app password='it\\'s a pass' sslmode=require"
        );
    }

    #[test]
    fn test_serial_base_types() {
        let int = ColumnDef::new("id", "int").auto_increment();
        assert_eq!(PostgresAdapter::base_type(&int), "SERIAL");
        let big = ColumnDef::new("id", "BIGINT").auto_increment();
        assert_eq!(PostgresAdapter::base_type(&big), "BIGSERIAL");
        let small = ColumnDef::new("id", "smallint").auto_increment();
        assert_eq!(PostgresAdapter::base_type(&small), "SMALLSERIAL");
        let text = ColumnDef::new("v", "varchar").with_length(20).auto_increment();
        assert_eq!(PostgresAdapter::base_type(&text), "VARCHAR(20)");
    }

    #[test]
    fn test_column_type_defaults() {
        let col = ColumnDef::new("created", "timestamp").not_null().with_default("now()");
        assert_eq!(PostgresAdapter::column_type(&col), "TIMESTAMP NOT NULL DEFAULT NOW()");
        let num = ColumnDef::new("qty", "integer").with_default("10");
        assert_eq!(PostgresAdapter::column_type(&num), "INTEGER DEFAULT 10");
        let text = ColumnDef::new("tag", "text").with_default("o'k");
        assert_eq!(PostgresAdapter::column_type(&text), "TEXT DEFAULT 'o''k'");
    }

    #[test]
    fn test_modify_expands_to_ordered_statements() {
        let mut request = AlterTableRequest::new("shop", "users").with_action(
            AlterTableAction::modify_column(
                ColumnDef::new("email", "varchar")
                    .with_length(320)
                    .not_null()
                    .with_default("NULL")
                    .with_comment("login"),
            ),
        );
        request.schema = Some("crm".to_string());
        let plan = PostgresAdapter::plan_alter(&request).unwrap();
        let sql: Vec<&str> = plan.iter().map(|p| p.sql.as_str()).collect();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"crm\".\"users\" ALTER COLUMN \"email\" TYPE VARCHAR(320)",
                "ALTER TABLE \"crm\".\"users\" ALTER COLUMN \"email\" SET NOT NULL",
                "ALTER TABLE \"crm\".\"users\" ALTER COLUMN \"email\" DROP DEFAULT",
                "COMMENT ON COLUMN \"crm\".\"users\".\"email\" IS 'login'",
            ]
        );
        assert!(plan.iter().all(|p| p.action_index == 1 && p.action == "MODIFY_COLUMN"));
    }

    #[test]
    fn test_index_statements_default_to_public() {
        let mut index = IndexDef::new("idx_email", ["email", "tenant"]);
        index.unique = true;
        index.method = Some("btree".to_string());
        let request = AlterTableRequest::new("shop", "users")
            .with_action(AlterTableAction::add_index(index))
            .with_action(AlterTableAction::drop_index("idx_old"))
            .with_action(AlterTableAction::rename_column("a", "b", None));
        let plan = PostgresAdapter::plan_alter(&request).unwrap();
        assert_eq!(
            plan[0].sql,
            "CREATE UNIQUE INDEX \"idx_email\" ON \"public\".\"users\" USING BTREE (\"email\", \"tenant\")"
        );
        assert_eq!(plan[1].sql, "DROP INDEX \"public\".\"idx_old\"");
        assert_eq!(
            plan[2].sql,
            "ALTER TABLE \"public\".\"users\" RENAME COLUMN \"a\" TO \"b\""
        );
        assert_eq!(plan[2].action_index, 3);
    }

    #[test]
    fn test_bind_param_follows_placeholder_type() {
        assert!(bind_param(&Value::from("42"), &Type::INT4, "qty").is_ok());
        assert!(bind_param(&Value::Null, &Type::INT4, "qty").is_ok());
        assert!(bind_param(&Value::from("12.50"), &Type::NUMERIC, "price").is_ok());
        assert!(bind_param(&Value::from("2024-01-02 03:04:05"), &Type::TIMESTAMP, "at").is_ok());

        let err = bind_param(&Value::from("abc"), &Type::INT8, "qty").err().unwrap();
        assert!(err.is_validation());
        assert!(err.to_string().contains("qty"));
    }

    #[test]
    fn test_classify_postgres_keywords() {
        let adapter = PostgresAdapter::new();
        assert_eq!(adapter.classify("VALUES (1), (2)"), StatementKind::Rows);
        assert_eq!(adapter.classify("TABLE users"), StatementKind::Rows);
        assert_eq!(adapter.classify("DESCRIBE users"), StatementKind::RowCount);
    }
}
