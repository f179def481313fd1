// KingBase speaks the PostgreSQL protocol; everything except catalog
// visibility and row statistics is delegated to the PostgreSQL adapter.
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableRequest, ConnectionDescriptor, EngineKind, ExecuteResult, IndexInfo,
    QueryOptions, QueryResult, RoutineInfo, RoutineKind, RowData, TableInfo, TableSchema,
};
use crate::services::database::adapter::{DatabaseAdapter, SchemaAwareAdapter};
use crate::services::database::ddl::QuoteStyle;
use crate::services::database::handle::EngineHandle;
use crate::services::database::postgresql::{PgProfile, PostgresAdapter};
use crate::validation::StatementKind;

const KINGBASE_PROFILE: PgProfile = PgProfile {
    engine: EngineKind::KingBase,
    visible_databases: "datname NOT IN ('postgres', 'security', 'samples') \
                        AND datname NOT LIKE 'template%'",
    row_estimate: "s.n_tup_ins + s.n_tup_upd - s.n_tup_del",
};

#[derive(Debug, Clone, Copy)]
pub struct KingBaseAdapter {
    inner: PostgresAdapter,
}

impl Default for KingBaseAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl KingBaseAdapter {
    pub fn new() -> Self {
        Self {
            inner: PostgresAdapter::with_profile(KINGBASE_PROFILE),
        }
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for KingBaseAdapter {
    fn engine(&self) -> EngineKind {
        EngineKind::KingBase
    }

    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        self.inner.build_dsn(descriptor)
    }

    fn quote_style(&self) -> QuoteStyle {
        self.inner.quote_style()
    }

    fn classify(&self, sql: &str) -> StatementKind {
        self.inner.classify(sql)
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        self.inner.connect(descriptor).await
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        self.inner.ping(handle).await
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        self.inner.close(handle).await
    }

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        self.inner.get_databases(handle).await
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.inner.get_tables(handle, database).await
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        self.inner.get_table_schema(handle, database, table).await
    }

    async fn get_views(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.inner.get_views(handle, database).await
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        self.inner.get_indexes(handle, database, table).await
    }

    async fn get_routines(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        self.inner.get_routines(handle, database).await
    }

    async fn get_view_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        view: &str,
    ) -> Result<String, AppError> {
        self.inner.get_view_definition(handle, database, view).await
    }

    async fn get_routine_definition(
        &self,
        handle: &EngineHandle,
        database: &str,
        name: &str,
        kind: RoutineKind,
    ) -> Result<String, AppError> {
        self.inner
            .get_routine_definition(handle, database, name, kind)
            .await
    }

    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        self.inner.execute(handle, sql).await
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        self.inner.query(handle, sql, opts).await
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        self.inner.insert(handle, database, table, row).await
    }

    async fn update(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        self.inner
            .update(handle, database, table, row, where_clause)
            .await
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        self.inner.delete(handle, database, table, where_clause).await
    }

    async fn get_create_table_sql(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        self.inner.get_create_table_sql(handle, database, table).await
    }

    async fn alter_table(
        &self,
        handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        self.inner.alter_table(handle, request).await
    }

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError> {
        self.inner
            .rename_table(handle, database, old_name, new_name)
            .await
    }

    fn as_schema_aware(&self) -> Option<&dyn SchemaAwareAdapter> {
        Some(self)
    }
}

#[async_trait::async_trait]
impl SchemaAwareAdapter for KingBaseAdapter {
    async fn get_schemas(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<String>, AppError> {
        self.inner.get_schemas(handle, database).await
    }

    async fn get_tables_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.inner.get_tables_in_schema(handle, database, schema).await
    }

    async fn get_table_schema_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        self.inner
            .get_table_schema_in_schema(handle, database, schema, table)
            .await
    }

    async fn get_views_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        self.inner.get_views_in_schema(handle, database, schema).await
    }

    async fn get_indexes_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        self.inner
            .get_indexes_in_schema(handle, database, schema, table)
            .await
    }

    async fn get_routines_in_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        schema: &str,
    ) -> Result<Vec<RoutineInfo>, AppError> {
        self.inner
            .get_routines_in_schema(handle, database, schema)
            .await
    }
}
