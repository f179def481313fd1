// Capability contract every engine adapter implements
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableRequest, ConnectionDescriptor, CsvOptions, EngineKind, ExecuteResult,
    IndexInfo, QueryOptions, QueryResult, RoutineInfo, RoutineKind, RowData, SqlOptions,
    TableInfo, TableSchema,
};
use crate::services::database::ddl::QuoteStyle;
use crate::services::database::handle::EngineHandle;
use crate::services::export::{write_csv, SqlScriptWriter};
use crate::validation::StatementKind;
use std::io::Write;

/// Stateless translator between the contract and one engine.
///
/// Adapters hold no per-connection state: the live handle is passed into every
/// call, so one adapter instance can serve any number of handles concurrently.
/// Operations perform their I/O and return. They never retry and never impose
/// a deadline; wrap a call in `tokio::time::timeout` to bound it.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send + Sync {
    fn engine(&self) -> EngineKind;

    /// Connection string for `descriptor`, exactly as handed to the driver.
    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError>;

    /// Identifier quoting used in generated SQL.
    fn quote_style(&self) -> QuoteStyle;

    /// Whether `sql` produces rows or only an affected-row count.
    fn classify(&self, sql: &str) -> StatementKind;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError>;

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError>;

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError>;

    /// Open, ping and release a handle within this one call.
    async fn test_connection(&self, descriptor: &ConnectionDescriptor) -> Result<(), AppError> {
        let handle = self.connect(descriptor).await?;
        let result = self.ping(&handle).await;
        if let Err(e) = self.close(handle).await {
            tracing::warn!("Failed to release {} test connection: {}", self.engine(), e);
        }
        result
    }

    // Metadata reads

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError>;

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError>;

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError>;

    async fn get_views(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError>;

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError>;

    /// Stored procedures and functions. Engines without them return an empty list.
    async fn get_routines(
        &self,
        _handle: &EngineHandle,
        _database: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        Ok(Vec::new())
    }

    async fn get_view_definition(
        &self,
        _handle: &EngineHandle,
        _database: &str,
        _view: &str,
    ) -> Result<String, AppError> {
        Err(AppError::unsupported(
            self.engine(),
            "view definitions",
            "this engine does not expose view source",
        ))
    }

    async fn get_routine_definition(
        &self,
        _handle: &EngineHandle,
        _database: &str,
        _name: &str,
        _kind: RoutineKind,
    ) -> Result<String, AppError> {
        Err(AppError::unsupported(
            self.engine(),
            "routine definitions",
            "this engine has no stored routines",
        ))
    }

    // Statements

    /// Run a statement that returns no rows.
    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError>;

    /// Run caller text, classified with [`DatabaseAdapter::classify`]. Mutations
    /// come back with only `rows_affected` set.
    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, AppError>;

    // Data editing

    async fn insert(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError>;

    /// Rejects an empty `where_clause` before any I/O.
    async fn update(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError>;

    /// Rejects an empty `where_clause` before any I/O.
    async fn delete(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError>;

    // Structure

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<String, AppError>;

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError>;

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError>;

    // Export

    /// `SELECT *` over one table, optionally bounded.
    fn select_all_sql(&self, database: &str, table: &str, max_rows: u64) -> String {
        let mut sql = format!(
            "SELECT * FROM {}",
            self.quote_style().qualified(database, table)
        );
        if max_rows > 0 {
            sql.push_str(&format!(" LIMIT {}", max_rows));
        }
        sql
    }

    /// Write the rows of `query` as CSV. Returns the number of data rows written.
    async fn export_to_csv(
        &self,
        handle: &EngineHandle,
        writer: &mut (dyn Write + Send),
        database: &str,
        query: &str,
        opts: &CsvOptions,
    ) -> Result<u64, AppError> {
        if self.classify(query) != StatementKind::Rows {
            return Err(AppError::Validation(
                "CSV export requires a statement that returns rows".to_string(),
            ));
        }
        let result = self
            .query(handle, query, &QueryOptions::for_database(database))
            .await?;
        write_csv(writer, &result, opts)
    }

    /// Write a statement script that rebuilds `tables` (or the rows of
    /// `opts.query`). Returns the number of data rows written.
    async fn export_to_sql(
        &self,
        handle: &EngineHandle,
        writer: &mut (dyn Write + Send),
        database: &str,
        tables: &[String],
        opts: &SqlOptions,
    ) -> Result<u64, AppError> {
        let script = SqlScriptWriter::new(opts, self.quote_style());
        let query_opts = QueryOptions::for_database(database);

        if let Some(custom) = opts.custom_query() {
            if self.classify(custom) != StatementKind::Rows {
                return Err(AppError::Validation(
                    "SQL export query must return rows".to_string(),
                ));
            }
            let result = self.query(handle, custom, &query_opts).await?;
            return script.write_rows(writer, "", opts.effective_table_name(), &result);
        }

        let mut written = 0;
        for table in tables {
            if opts.include_create_table || opts.structure_only {
                match self.get_create_table_sql(handle, database, table).await {
                    Ok(ddl) => script.write_native_ddl(writer, database, table, &ddl)?,
                    Err(e) => {
                        tracing::debug!(
                            "Native DDL unavailable for {}.{}, rebuilding from schema: {}",
                            database,
                            table,
                            e
                        );
                        let schema = self.get_table_schema(handle, database, table).await?;
                        script.write_schema(writer, &schema)?;
                    }
                }
            }

            if !opts.structure_only {
                let sql = self.select_all_sql(database, table, opts.max_rows);
                let result = self.query(handle, &sql, &query_opts).await?;
                written += script.write_rows(writer, "", table, &result)?;
            }
        }

        Ok(written)
    }

    /// Optional namespace capability. Callers must probe for it.
    fn as_schema_aware(&self) -> Option<&dyn SchemaAwareAdapter> {
        None
    }
}

/// Schema-scoped metadata reads for engines with a namespace level below the
/// catalog.
#[async_trait::async_trait]
pub trait SchemaAwareAdapter: Send + Sync {
    async fn get_schemas(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<String>, AppError>;

    async fn get_tables_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError>;

    async fn get_table_schema_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<TableSchema, AppError>;

    async fn get_views_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError>;

    async fn get_indexes_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError>;

    async fn get_routines_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<RoutineInfo>, AppError>;
}

/// Schemas of `database`, or an empty list when the engine has no namespace level.
pub async fn list_schemas(
    adapter: &dyn DatabaseAdapter,
    handle: &EngineHandle,
    database: &str,
) -> Result<Vec<String>, AppError> {
    match adapter.as_schema_aware() {
        Some(schema_aware) => schema_aware.get_schemas(handle, database).await,
        None => Ok(Vec::new()),
    }
}

/// Shared guard for update/delete.
pub(crate) fn require_where(engine: EngineKind, where_clause: &str) -> Result<&str, AppError> {
    let trimmed = where_clause.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!(
            "{}: update/delete requires a WHERE condition",
            engine
        )));
    }
    Ok(trimmed)
}

/// Shared guard for insert/update payloads.
pub(crate) fn require_row(engine: EngineKind, row: &RowData) -> Result<(), AppError> {
    if row.is_empty() {
        return Err(AppError::Validation(format!(
            "{}: row data must contain at least one column",
            engine
        )));
    }
    Ok(())
}
