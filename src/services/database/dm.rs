// DM (Dameng) adapter. DM exposes the Oracle-style ALL_* dictionary, so
// catalog reads are shared with the Oracle adapter; DDL grammar and
// connection strings are DM's own.
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableAction, AlterTableRequest, ColumnDef, ConnectionDescriptor,
    EngineKind, ExecuteResult, IndexInfo, QueryOptions, QueryResult, RoutineInfo, RoutineKind,
    RowData, TableInfo, TableSchema,
};
use crate::services::database::adapter::{require_row, require_where, DatabaseAdapter};
use crate::services::database::ddl::{
    default_operand, escape_single_quotes, execute_plan, format_default, plan_statements,
    require_column, require_index, PlannedStatement, QuoteStyle,
};
use crate::services::database::handle::EngineHandle;
use crate::services::database::odbc::{inline_literal, odbc_value, OdbcClient};
use crate::services::database::oracle::{self, catalog, ident, qualified};
use crate::validation::{SqlValidator, StatementKind};
use std::time::Instant;
use url::Url;

const SYSTEM_OWNERS: &str = "'SYS', 'SYSTEM', 'SYSAUX', 'SYSDBA'";

const DEFAULT_DRIVER: &str = "DM8 ODBC DRIVER";

const DEFAULT_KEYWORDS: &[&str] = &["NULL", "CURRENT_TIMESTAMP", "SYSDATE", "NOW()"];

#[derive(Debug, Default, Clone, Copy)]
pub struct DmAdapter;

impl DmAdapter {
    pub fn new() -> Self {
        Self
    }

    pub fn odbc_connection_string(descriptor: &ConnectionDescriptor) -> String {
        let driver = descriptor.param("driver").unwrap_or(DEFAULT_DRIVER);
        let mut conn = format!(
            "Driver={{{}}};SERVER={};TCP_PORT={};UID={};PWD={}",
            driver,
            descriptor.host,
            descriptor.effective_port(),
            odbc_value(&descriptor.username),
            odbc_value(&descriptor.password)
        );
        if !descriptor.database.is_empty() {
            conn.push_str(&format!(
                ";SCHEMA={}",
                odbc_value(&descriptor.database.to_uppercase())
            ));
        }
        conn
    }

    /// Type string from dictionary columns. Length is only meaningful for
    /// the character types; precision for the exact numerics.
    pub fn type_string(data_type: &str, length: i64, precision: i64, scale: i64) -> String {
        let dt = data_type.trim().to_uppercase();
        match dt.as_str() {
            "VARCHAR" | "VARCHAR2" | "CHAR" if length > 0 => format!("{}({})", dt, length),
            "DECIMAL" | "NUMBER" | "NUMERIC" if precision > 0 && scale > 0 => {
                format!("{}({},{})", dt, precision, scale)
            }
            "DECIMAL" | "NUMBER" | "NUMERIC" if precision > 0 => format!("{}({})", dt, precision),
            _ => dt,
        }
    }

    pub fn column_type(column: &ColumnDef) -> String {
        let base = column.column_type.trim().to_uppercase();
        let ty = if base.contains('(') {
            base
        } else {
            match base.as_str() {
                "VARCHAR" | "VARCHAR2" | "CHAR" if column.length > 0 => {
                    format!("{}({})", base, column.length)
                }
                "DECIMAL" | "NUMBER" | "NUMERIC" if column.precision > 0 => {
                    if column.scale > 0 {
                        format!("{}({},{})", base, column.precision, column.scale)
                    } else {
                        format!("{}({})", base, column.precision)
                    }
                }
                _ => base,
            }
        };

        let mut def = ty;
        if column.auto_increment {
            def.push_str(" IDENTITY(1,1)");
        }
        if let Some(default) = default_operand(column, |v| {
            format_default(v, DEFAULT_KEYWORDS, false, escape_single_quotes)
        }) {
            def.push_str(" DEFAULT ");
            def.push_str(&default);
        }
        if !column.nullable {
            def.push_str(" NOT NULL");
        }
        def
    }

    fn with_comment(target: &str, column: &ColumnDef, statement: String) -> Vec<String> {
        let mut stmts = vec![statement];
        if let Some(comment) = column.comment() {
            stmts.push(format!(
                "COMMENT ON COLUMN {}.{} IS '{}'",
                target,
                ident(&column.name),
                escape_single_quotes(comment)
            ));
        }
        stmts
    }

    pub fn action_statements(
        schema: &str,
        table: &str,
        action: &AlterTableAction,
    ) -> Result<Vec<String>, AppError> {
        let target = qualified(schema, table);
        match action {
            AlterTableAction::AddColumn { column } => {
                let column = require_column(column)?;
                let sql = format!(
                    "ALTER TABLE {} ADD {} {}",
                    target,
                    ident(&column.name),
                    Self::column_type(column)
                );
                Ok(Self::with_comment(&target, column, sql))
            }
            AlterTableAction::DropColumn { name } => Ok(vec![format!(
                "ALTER TABLE {} DROP COLUMN {}",
                target,
                ident(name)
            )]),
            AlterTableAction::ModifyColumn { column } => {
                let column = require_column(column)?;
                let sql = format!(
                    "ALTER TABLE {} MODIFY {} {}",
                    target,
                    ident(&column.name),
                    Self::column_type(column)
                );
                Ok(Self::with_comment(&target, column, sql))
            }
            AlterTableAction::RenameColumn {
                old_name, new_name, ..
            } => Ok(vec![format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                target,
                ident(old_name),
                ident(new_name)
            )]),
            AlterTableAction::AddIndex { index } => {
                let index = require_index(index)?;
                let columns: Vec<String> = index.columns.iter().map(|c| ident(c)).collect();
                Ok(vec![format!(
                    "CREATE {}INDEX {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    ident(&index.name),
                    target,
                    columns.join(", ")
                )])
            }
            AlterTableAction::DropIndex { name } => {
                Ok(vec![format!("DROP INDEX {}", qualified(schema, name))])
            }
        }
    }

    pub fn plan_alter(request: &AlterTableRequest) -> Result<Vec<PlannedStatement>, AppError> {
        let schema = request
            .schema
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&request.database)
            .to_string();
        plan_statements(request, |action| {
            Self::action_statements(&schema, &request.table, action)
        })
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for DmAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::Dm
    }

    /// `dm://user:pass@host[:port][?params]`. With no params, the catalog
    /// becomes `schema=<DB>`.
    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        if descriptor.host.trim().is_empty() {
            return Err(AppError::Config("DM host is required".to_string()));
        }
        let mut url = Url::parse(&format!("dm://{}", descriptor.host))
            .map_err(|e| AppError::Config(format!("Invalid DM host: {}", e)))?;
        if descriptor.port > 0 {
            url.set_port(Some(descriptor.port))
                .map_err(|_| AppError::Config("Invalid DM port".to_string()))?;
        }
        url.set_username(&descriptor.username)
            .map_err(|_| AppError::Config("Invalid DM username".to_string()))?;
        if !descriptor.password.is_empty() {
            url.set_password(Some(&descriptor.password))
                .map_err(|_| AppError::Config("Invalid DM password".to_string()))?;
        }

        if !descriptor.params.is_empty() {
            url.query_pairs_mut().extend_pairs(descriptor.params.iter());
        } else if !descriptor.database.is_empty() {
            url.query_pairs_mut()
                .append_pair("schema", &descriptor.database);
        }
        Ok(url.to_string())
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::DoubleQuote
    }

    fn classify(&self, sql: &str) -> StatementKind {
        SqlValidator::classify(sql, oracle::READ_KEYWORDS)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        self.build_dsn(descriptor)?;
        let client = OdbcClient::new(EngineKind::Dm, Self::odbc_connection_string(descriptor))?;
        let handle = EngineHandle::Odbc(client);
        self.ping(&handle).await?;
        tracing::info!(
            "Connected to DM at {}:{}",
            descriptor.host,
            descriptor.effective_port()
        );
        Ok(handle)
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        handle
            .odbc()?
            .query("SELECT 1 FROM DUAL")
            .await
            .map(|_| ())
            .map_err(|e| AppError::connection(EngineKind::Dm, format!("Ping failed: {}", e)))
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        handle.odbc()?;
        tracing::debug!("Closed DM handle");
        Ok(())
    }

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        let sql = format!(
            "SELECT DISTINCT OWNER FROM ALL_OBJECTS \
             WHERE OBJECT_TYPE IN ('TABLE', 'VIEW') AND OWNER NOT IN ({}) \
             ORDER BY OWNER",
            SYSTEM_OWNERS
        );
        let rows = handle.odbc()?.query(&sql).await?;
        Ok((0..rows.len()).map(|i| rows.text(i, 0)).collect())
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        catalog::tables(handle.odbc()?, database).await
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        catalog::table_schema(handle.odbc()?, database, table, Self::type_string).await
    }

    async fn get_views(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        catalog::views(handle.odbc()?, database).await
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        catalog::indexes(handle.odbc()?, database, table).await
    }

    async fn get_routines(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        catalog::routines(handle.odbc()?, database).await
    }

    async fn get_view_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        view: &str,
    ) -> Result<String, AppError> {
        catalog::ddl(handle.odbc()?, "VIEW", database, view).await
    }

    async fn get_routine_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        name: &str,
        kind: RoutineKind,
    ) -> Result<String, AppError> {
        catalog::ddl(handle.odbc()?, kind.as_str(), database, name).await
    }

    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        let start = Instant::now();
        let affected = handle.odbc()?.execute(sql).await?;
        Ok(ExecuteResult::new(affected, start.elapsed()))
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        _opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        let start = Instant::now();
        let client = handle.odbc()?;
        if self.classify(sql) == StatementKind::RowCount {
            let affected = client.execute(sql).await?;
            return Ok(QueryResult::affected(affected, start.elapsed()));
        }
        // DM accepts LIMIT natively
        let rows = client.query(sql).await?;
        Ok(QueryResult::from_rows(rows.columns, rows.rows, start.elapsed()))
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        require_row(EngineKind::Dm, row)?;
        let columns: Vec<String> = row.keys().map(|c| ident(c)).collect();
        let values: Vec<String> = row.values().map(inline_literal).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified(database, table),
            columns.join(", "),
            values.join(", ")
        );
        handle.odbc()?.execute(&sql).await
    }

    async fn update(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::Dm, where_clause)?;
        require_row(EngineKind::Dm, row)?;
        let sets: Vec<String> = row
            .iter()
            .map(|(col, value)| format!("{} = {}", ident(col), inline_literal(value)))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            qualified(database, table),
            sets.join(", "),
            where_clause
        );
        handle.odbc()?.execute(&sql).await
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(EngineKind::Dm, where_clause)?;
        let sql = format!(
            "DELETE FROM {} WHERE {}",
            qualified(database, table),
            where_clause
        );
        handle.odbc()?.execute(&sql).await
    }

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        catalog::ddl(handle.odbc()?, "TABLE", database, table).await
    }

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        let plan = Self::plan_alter(request)?;
        let statements = execute_plan(self, handle, plan).await?;
        Ok(AlterOutcome::Applied { statements })
    }

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError> {
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            qualified(database, old_name),
            ident(new_name)
        );
        self.execute(handle, &sql).await.map(|_| ())
    }

    fn select_all_sql(&self, database: &str, table: &str, max_rows: u64) -> String {
        let mut sql = format!("SELECT * FROM {}", qualified(database, table));
        if max_rows > 0 {
            sql.push_str(&format!(" LIMIT {}", max_rows));
        }
        sql
    }
}
