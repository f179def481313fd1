// MongoDB adapter: collections stand in for tables, commands for SQL
use crate::error::AppError;
use crate::models::{
    AlterOutcome, AlterTableRequest, Cell, ColumnInfo, ConnectionDescriptor, CsvOptions,
    EngineKind, ExecuteResult, IndexCollector, IndexInfo, KeyRole, QueryOptions, QueryResult,
    RowData, SqlOptions, TableInfo, TableKind, TableSchema,
};
use crate::services::database::adapter::{require_row, require_where, DatabaseAdapter};
use crate::services::database::ddl::{ensure_actions, QuoteStyle};
use crate::services::database::handle::EngineHandle;
use crate::services::export::write_csv;
use crate::validation::StatementKind;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::Client;
use serde_json::Value;
use std::io::Write;
use std::time::Instant;
use url::Url;

const ENGINE: EngineKind = EngineKind::MongoDb;

/// Catalog commands run against when a command names none.
const ADMIN_DB: &str = "admin";

/// Command field naming the target catalog; stripped before sending.
const DB_FIELD: &str = "$db";

/// Commands that only report a count.
const WRITE_COMMANDS: &[&str] = &[
    "insert",
    "update",
    "delete",
    "findAndModify",
    "create",
    "drop",
    "dropDatabase",
    "createIndexes",
    "dropIndexes",
    "renameCollection",
    "collMod",
];

/// Parse relaxed or canonical extended JSON into a document.
pub fn parse_document(text: &str) -> Result<Document, AppError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| AppError::Validation(format!("Invalid MongoDB JSON: {}", e)))?;
    json_to_document(value)
}

fn json_to_document(value: Value) -> Result<Document, AppError> {
    match Bson::try_from(value) {
        Ok(Bson::Document(doc)) => Ok(doc),
        Ok(other) => Err(AppError::Validation(format!(
            "Expected a JSON object, got {}",
            bson_type_name(&other)
        ))),
        Err(e) => Err(AppError::Validation(format!(
            "Invalid MongoDB extended JSON: {}",
            e
        ))),
    }
}

/// Name of a BSON value's type, as `$type` spells it.
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Document(_) => "object",
        Bson::Array(_) => "array",
        Bson::Binary(_) => "binData",
        Bson::ObjectId(_) => "objectId",
        Bson::Boolean(_) => "bool",
        Bson::DateTime(_) => "date",
        Bson::Null => "null",
        Bson::RegularExpression(_) => "regex",
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => "javascript",
        Bson::Int32(_) => "int",
        Bson::Timestamp(_) => "timestamp",
        Bson::Int64(_) => "long",
        Bson::Decimal128(_) => "decimal",
        Bson::MinKey => "minKey",
        Bson::MaxKey => "maxKey",
        Bson::Undefined => "undefined",
        _ => "unknown",
    }
}

/// Decode one BSON value into a result cell.
pub fn bson_to_cell(value: &Bson) -> Cell {
    match value {
        Bson::Null | Bson::Undefined => Cell::Null,
        Bson::Boolean(b) => Cell::Bool(*b),
        Bson::Int32(i) => Cell::Integer(*i as i64),
        Bson::Int64(i) => Cell::Integer(*i),
        Bson::Double(f) => Cell::Float(*f),
        Bson::String(s) => Cell::Text(s.clone()),
        Bson::ObjectId(oid) => Cell::Text(oid.to_hex()),
        Bson::Decimal128(d) => Cell::Text(d.to_string()),
        Bson::DateTime(dt) => chrono::DateTime::from_timestamp_millis(dt.timestamp_millis())
            .map(|ts| Cell::Timestamp(ts.naive_utc()))
            .unwrap_or_else(|| Cell::Text(dt.to_string())),
        Bson::Document(_) | Bson::Array(_) => {
            Cell::Structured(value.clone().into_relaxed_extjson().to_string())
        }
        other => Cell::Text(other.clone().into_relaxed_extjson().to_string()),
    }
}

/// Relaxed extended JSON text of a document.
pub fn document_json(document: Document) -> String {
    Bson::Document(document).into_relaxed_extjson().to_string()
}

/// Column list for a batch of documents: `_id` first, then first-seen order.
pub fn document_columns(documents: &[Document]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for doc in documents {
        for key in doc.keys() {
            if !columns.iter().any(|c| c == key) {
                columns.push(key.clone());
            }
        }
    }
    if let Some(pos) = columns.iter().position(|c| c == "_id") {
        let id = columns.remove(pos);
        columns.insert(0, id);
    }
    columns
}

/// Rows aligned to `document_columns`; missing fields are NULL.
pub fn documents_to_result(documents: &[Document], start: Instant) -> QueryResult {
    let columns = document_columns(documents);
    let rows = documents
        .iter()
        .map(|doc| {
            columns
                .iter()
                .map(|col| doc.get(col).map(bson_to_cell).unwrap_or(Cell::Null))
                .collect()
        })
        .collect();
    QueryResult::from_rows(columns, rows, start.elapsed())
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MongoDbAdapter;

impl MongoDbAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Command document for `query`: a JSON command, or a bare collection
    /// name turned into `find`. Paging and sort are applied to `find` only.
    pub fn build_query_command(query: &str, opts: &QueryOptions) -> Result<Document, AppError> {
        let trimmed = query.trim();
        let mut command = if trimmed.starts_with('{') {
            parse_document(trimmed)?
        } else if trimmed.is_empty() {
            return Err(AppError::Validation(
                "MongoDB query requires a command or collection name".to_string(),
            ));
        } else {
            doc! { "find": trimmed }
        };

        let is_find = command.keys().next().map(String::as_str) == Some("find");
        if is_find {
            if opts.page_size > 0 {
                command.insert("batchSize", opts.page_size as i64);
                command.insert("limit", opts.page_size as i64);
            }
            let skip = opts.offset();
            if skip > 0 {
                command.insert("skip", skip as i64);
            }
            if !opts.sort_by.is_empty() && !command.contains_key("sort") {
                let direction = if opts.sort_desc { -1 } else { 1 };
                let mut sort = Document::new();
                sort.insert(opts.sort_by.clone(), direction);
                command.insert("sort", sort);
            }
        }
        Ok(command)
    }

    /// First batch of a cursor reply, or `None` when the reply has no cursor.
    pub fn first_batch(reply: &Document) -> Option<Vec<Document>> {
        let cursor = reply.get_document("cursor").ok()?;
        let batch = cursor
            .get_array("firstBatch")
            .or_else(|_| cursor.get_array("nextBatch"))
            .ok()?;
        Some(
            batch
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => Some(doc.clone()),
                    _ => None,
                })
                .collect(),
        )
    }

    /// Schema sampled from one document, fields in stored order.
    pub fn sampled_columns(sample: &Document) -> Vec<ColumnInfo> {
        sample
            .iter()
            .map(|(name, value)| {
                let mut col = ColumnInfo::new(name.clone(), bson_type_name(value), name != "_id");
                if name == "_id" {
                    col.key = KeyRole::Primary;
                }
                col
            })
            .collect()
    }

    fn split_target(command: &mut Document) -> String {
        match command.remove(DB_FIELD) {
            Some(Bson::String(db)) if !db.is_empty() => db,
            _ => ADMIN_DB.to_string(),
        }
    }

    fn row_document(row: &RowData) -> Result<Document, AppError> {
        json_to_document(Value::Object(row.clone()))
    }

    fn db_error(e: mongodb::error::Error) -> AppError {
        AppError::database(ENGINE, e.to_string())
    }
}

#[async_trait::async_trait]
impl DatabaseAdapter for MongoDbAdapter {
    fn engine(&self) -> EngineKind {
        ENGINE
    }

    /// `mongodb://[user:pass@]host:port`, or the `uri` param when no host is set.
    fn build_dsn(&self, descriptor: &ConnectionDescriptor) -> Result<String, AppError> {
        if descriptor.host.trim().is_empty() {
            return descriptor.param("uri").map(str::to_string).ok_or_else(|| {
                AppError::Config("MongoDB requires a host or a uri parameter".to_string())
            });
        }

        let mut url = Url::parse(&format!(
            "mongodb://{}:{}",
            descriptor.host,
            descriptor.effective_port()
        ))
        .map_err(|e| AppError::Config(format!("Invalid MongoDB host: {}", e)))?;
        if !descriptor.username.is_empty() && !descriptor.password.is_empty() {
            url.set_username(&descriptor.username)
                .map_err(|_| AppError::Config("Invalid MongoDB username".to_string()))?;
            url.set_password(Some(&descriptor.password))
                .map_err(|_| AppError::Config("Invalid MongoDB password".to_string()))?;
        }
        let options: Vec<(&String, &String)> = descriptor
            .params
            .iter()
            .filter(|(k, _)| k.as_str() != "uri")
            .collect();
        if !options.is_empty() {
            url.set_path("/");
            url.query_pairs_mut().extend_pairs(options);
        }
        Ok(url.to_string())
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::DoubleQuote
    }

    /// Write commands report a count; every other command or a bare
    /// collection name yields documents.
    fn classify(&self, sql: &str) -> StatementKind {
        let first_key = parse_document(sql)
            .ok()
            .and_then(|doc| doc.keys().next().cloned());
        match first_key {
            Some(key) if WRITE_COMMANDS.contains(&key.as_str()) => StatementKind::RowCount,
            _ => StatementKind::Rows,
        }
    }

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<EngineHandle, AppError> {
        let uri = self.build_dsn(descriptor)?;
        let options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| AppError::Config(format!("Invalid MongoDB URI: {}", e)))?;
        let client = Client::with_options(options).map_err(|e| {
            AppError::connection(ENGINE, format!("Failed to create MongoDB client: {}", e))
        })?;
        let handle = EngineHandle::MongoDb(client);
        self.ping(&handle).await?;
        tracing::info!(
            "Connected to MongoDB at {}:{}",
            descriptor.host,
            descriptor.effective_port()
        );
        Ok(handle)
    }

    async fn ping(&self, handle: &EngineHandle) -> Result<(), AppError> {
        handle
            .mongodb()?
            .database(ADMIN_DB)
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| AppError::connection(ENGINE, format!("Ping failed: {}", e)))
    }

    async fn close(&self, handle: EngineHandle) -> Result<(), AppError> {
        let client = handle.mongodb()?.clone();
        client.shutdown().await;
        Ok(())
    }

    async fn get_databases(&self, handle: &EngineHandle) -> Result<Vec<String>, AppError> {
        handle
            .mongodb()?
            .list_database_names()
            .await
            .map_err(Self::db_error)
    }

    async fn get_tables(
        &self,
        handle: &EngineHandle,
        database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        let db = handle.mongodb()?.database(database);
        let mut names = db.list_collection_names().await.map_err(Self::db_error)?;
        names.sort();

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let count = db
                .collection::<Document>(&name)
                .estimated_document_count()
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Document count unavailable for {}.{}: {}", database, name, e);
                    0
                });
            let mut info = TableInfo::new(name, database, TableKind::Collection);
            info.rows = count as i64;
            tables.push(info);
        }
        Ok(tables)
    }

    async fn get_table_schema(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<TableSchema, AppError> {
        let collection = handle
            .mongodb()?
            .database(database)
            .collection::<Document>(table);
        let sample = collection
            .find_one(doc! {})
            .await
            .map_err(Self::db_error)?;
        let columns = sample
            .as_ref()
            .map(Self::sampled_columns)
            .unwrap_or_default();
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
        _handle: &EngineHandle,
        _database: &str,
    ) -> Result<Vec<TableInfo>, AppError> {
        Ok(Vec::new())
    }

    async fn get_indexes(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        let models: Vec<mongodb::IndexModel> = handle
            .mongodb()?
            .database(database)
            .collection::<Document>(table)
            .list_indexes()
            .await
            .map_err(Self::db_error)?
            .try_collect()
            .await
            .map_err(Self::db_error)?;

        let mut collector = IndexCollector::new();
        for model in &models {
            let options = model.options.as_ref();
            let name = options
                .and_then(|o| o.name.clone())
                .unwrap_or_else(|| model.keys.keys().cloned().collect::<Vec<_>>().join("_"));
            let unique = options.and_then(|o| o.unique).unwrap_or(false);
            let primary = name == "_id_";
            for key in model.keys.keys() {
                collector.push(&name, Some(key), unique || primary, primary, None);
            }
        }
        Ok(collector.finish(table))
    }

    /// Run a command document. A `$db` field picks the catalog, else `admin`.
    async fn execute(&self, handle: &EngineHandle, sql: &str) -> Result<ExecuteResult, AppError> {
        let start = Instant::now();
        let mut command = parse_document(sql)?;
        let target = Self::split_target(&mut command);
        let reply = handle
            .mongodb()?
            .database(&target)
            .run_command(command)
            .await
            .map_err(Self::db_error)?;
        let affected = reply
            .get("n")
            .and_then(|n| match n {
                Bson::Int32(i) => Some(*i as u64),
                Bson::Int64(i) => Some(*i as u64),
                Bson::Double(f) => Some(*f as u64),
                _ => None,
            })
            .unwrap_or(0);
        let mut result = ExecuteResult::new(affected, start.elapsed());
        result.message = "Command executed successfully".to_string();
        Ok(result)
    }

    async fn query(
        &self,
        handle: &EngineHandle,
        sql: &str,
        opts: &QueryOptions,
    ) -> Result<QueryResult, AppError> {
        if opts.database.is_empty() {
            return Err(AppError::Validation(
                "MongoDB query requires a database".to_string(),
            ));
        }
        let start = Instant::now();
        let command = Self::build_query_command(sql, opts)?;
        let reply = handle
            .mongodb()?
            .database(&opts.database)
            .run_command(command)
            .await
            .map_err(Self::db_error)?;

        match Self::first_batch(&reply) {
            Some(documents) => Ok(documents_to_result(&documents, start)),
            // commands without a cursor come back as one row
            None => Ok(QueryResult::from_rows(
                vec!["result".to_string()],
                vec![vec![Cell::Structured(document_json(reply))]],
                start.elapsed(),
            )),
        }
    }

    async fn insert(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
    ) -> Result<u64, AppError> {
        require_row(ENGINE, row)?;
        let document = Self::row_document(row)?;
        handle
            .mongodb()?
            .database(database)
            .collection::<Document>(table)
            .insert_one(document)
            .await
            .map_err(Self::db_error)?;
        Ok(1)
    }

    /// `$set` on every document matching the JSON filter in `where_clause`.
    async fn update(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        row: &RowData,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(ENGINE, where_clause)?;
        require_row(ENGINE, row)?;
        let filter = parse_document(where_clause)?;
        let update = doc! { "$set": Self::row_document(row)? };
        let result = handle
            .mongodb()?
            .database(database)
            .collection::<Document>(table)
            .update_many(filter, update)
            .await
            .map_err(Self::db_error)?;
        Ok(result.modified_count)
    }

    async fn delete(
        &self,
        handle: &EngineHandle,
        database: &str,
        table: &str,
        where_clause: &str,
    ) -> Result<u64, AppError> {
        let where_clause = require_where(ENGINE, where_clause)?;
        let filter = parse_document(where_clause)?;
        let result = handle
            .mongodb()?
            .database(database)
            .collection::<Document>(table)
            .delete_many(filter)
            .await
            .map_err(Self::db_error)?;
        Ok(result.deleted_count)
    }

    /// Collections have no DDL; the equivalent `create` command is returned.
    async fn get_create_table_sql(
        &self,
        _handle: &EngineHandle,
        _database: &str,
        table: &str,
    ) -> Result<String, AppError> {
        Ok(document_json(doc! { "create": table }))
    }

    async fn alter_table(
        &self,
        _handle: &EngineHandle,
        request: &AlterTableRequest,
    ) -> Result<AlterOutcome, AppError> {
        ensure_actions(request)?;
        Err(AppError::unsupported(
            ENGINE,
            "ALTER TABLE",
            "schema-less collections have no structure to alter",
        ))
    }

    async fn rename_table(
        &self,
        handle: &EngineHandle,
        database: &str,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), AppError> {
        let command = doc! {
            "renameCollection": format!("{}.{}", database, old_name),
            "to": format!("{}.{}", database, new_name),
        };
        handle
            .mongodb()?
            .database(ADMIN_DB)
            .run_command(command)
            .await
            .map(|_| ())
            .map_err(Self::db_error)
    }

    fn select_all_sql(&self, _database: &str, table: &str, max_rows: u64) -> String {
        let mut command = doc! { "find": table };
        if max_rows > 0 {
            command.insert("limit", max_rows as i64);
        }
        document_json(command)
    }

    async fn export_to_csv(
        &self,
        handle: &EngineHandle,
        writer: &mut (dyn Write + Send),
        database: &str,
        query: &str,
        opts: &CsvOptions,
    ) -> Result<u64, AppError> {
        let result = self
            .query(handle, query, &QueryOptions::for_database(database))
            .await?;
        write_csv(writer, &result, opts)
    }

    async fn export_to_sql(
        &self,
        _handle: &EngineHandle,
        _writer: &mut (dyn Write + Send),
        _database: &str,
        _tables: &[String],
        _opts: &SqlOptions,
    ) -> Result<u64, AppError> {
        Err(AppError::unsupported(
            ENGINE,
            "SQL export",
            "not applicable to document collections, export CSV instead",
        ))
    }
}
