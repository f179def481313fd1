use dbm_core::models::{
    AlterTableAction, AlterTableRequest, Cell, ColumnDef, ConnectionDescriptor, CsvOptions,
    EngineKind, IndexDef, KeyRole, QueryOptions, SqlOptions, TableKind,
};
use dbm_core::services::{AdapterFactory, ConnectionRegistry, InMemoryRegistry};
use dbm_core::AppError;
use serde_json::json;
use tempfile::TempDir;

const SETUP: &[&str] = &[
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT, score REAL DEFAULT 0)",
    "CREATE UNIQUE INDEX idx_users_email ON users (email)",
    "CREATE VIEW active_users AS SELECT id, name FROM users WHERE score > 0",
];

async fn registry_with_users() -> (InMemoryRegistry, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.db");
    let descriptor = ConnectionDescriptor::new(EngineKind::Sqlite, "", 0)
        .with_database(path.to_string_lossy().to_string());

    let registry = InMemoryRegistry::new(AdapterFactory::new([EngineKind::Sqlite]));
    registry.register("local", descriptor).await.unwrap();

    let adapter = AdapterFactory::with_all().create_adapter(EngineKind::Sqlite).unwrap();
    let (handle, _) = registry.resolve("local", None).await.unwrap();
    for sql in SETUP {
        adapter.execute(&handle, sql).await.unwrap();
    }
    (registry, dir)
}

fn row(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    value.as_object().cloned().unwrap()
}

#[tokio::test]
async fn test_metadata_reads() {
    let (registry, _dir) = registry_with_users().await;
    let adapter = AdapterFactory::with_all().create_adapter(EngineKind::Sqlite).unwrap();
    let (handle, _) = registry.resolve("local", None).await.unwrap();

    assert_eq!(adapter.get_databases(&handle).await.unwrap(), vec!["main"]);

    let tables = adapter.get_tables(&handle, "main").await.unwrap();
    let users = tables.iter().find(|t| t.name == "users").unwrap();
    assert_eq!(users.kind, TableKind::BaseTable);

    let views = adapter.get_views(&handle, "main").await.unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].name, "active_users");
    assert_eq!(views[0].kind, TableKind::View);
    let view_sql = adapter
        .get_view_definition(&handle, "main", "active_users")
        .await
        .unwrap();
    assert!(view_sql.contains("WHERE score > 0"));

    let schema = adapter.get_table_schema(&handle, "main", "users").await.unwrap();
    let names: Vec<&str> = schema.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name", "email", "score"]);
    assert_eq!(schema.columns[0].key, KeyRole::Primary);
    assert_eq!(schema.columns[0].extra, "auto_increment");
    assert!(!schema.columns[1].nullable);
    assert_eq!(schema.columns[3].default_value.as_deref(), Some("0"));

    let unique = schema
        .indexes
        .iter()
        .find(|i| i.name == "idx_users_email")
        .unwrap();
    assert!(unique.unique);
    assert!(!unique.primary);
    assert_eq!(unique.columns, vec!["email"]);

    assert!(adapter.get_routines(&handle, "main").await.unwrap().is_empty());
    assert!(adapter.as_schema_aware().is_none());

    let missing = adapter.get_table_schema(&handle, "main", "nope").await;
    assert!(matches!(missing, Err(AppError::Database { .. })));
}

#[tokio::test]
async fn test_edit_query_and_export() {
    let (registry, _dir) = registry_with_users().await;
    let adapter = AdapterFactory::with_all().create_adapter(EngineKind::Sqlite).unwrap();
    let (handle, _) = registry.resolve("local", None).await.unwrap();

    let inserted = adapter
        .insert(
            &handle,
            "main",
            "users",
            &row(json!({"name": "Ada", "email": "ada@example.com", "score": 9.5})),
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);
    adapter
        .insert(
            &handle,
            "main",
            "users",
            &row(json!({"name": "O'Brien, Pat", "email": null})),
        )
        .await
        .unwrap();

    let updated = adapter
        .update(&handle, "main", "users", &row(json!({"score": 3})), "name = 'O''Brien, Pat'")
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let err = adapter
        .delete(&handle, "main", "users", "   ")
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let result = adapter
        .query(
            &handle,
            "SELECT id, name, score FROM users ORDER BY id",
            &QueryOptions::for_database("main"),
        )
        .await
        .unwrap();
    assert_eq!(result.columns, vec!["id", "name", "score"]);
    assert_eq!(result.total, 2);
    assert_eq!(result.cell(0, "name"), Some(&Cell::Text("Ada".to_string())));
    // REAL affinity stores the bound integer as a float
    assert_eq!(result.cell(1, "score"), Some(&Cell::Float(3.0)));

    let mutation = adapter
        .query(
            &handle,
            "UPDATE users SET score = score + 1",
            &QueryOptions::default(),
        )
        .await
        .unwrap();
    assert!(mutation.columns.is_empty());
    assert_eq!(mutation.rows_affected, 2);

    let mut csv = Vec::new();
    let written = adapter
        .export_to_csv(
            &handle,
            &mut csv,
            "main",
            "SELECT name, email FROM users ORDER BY id",
            &CsvOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(written, 2);
    let text = String::from_utf8(csv).unwrap();
    assert_eq!(
        text,
        "\u{feff}name,email\nAda,ada@example.com\n\"O'Brien, Pat\",NULL\n"
    );

    let opts = SqlOptions {
        include_drop_table: true,
        ..SqlOptions::default()
    };
    let mut script = Vec::new();
    let written = adapter
        .export_to_sql(&handle, &mut script, "main", &["users".to_string()], &opts)
        .await
        .unwrap();
    assert_eq!(written, 2);
    let script = String::from_utf8(script).unwrap();
    assert!(script.starts_with("DROP TABLE IF EXISTS `main`.`users`;"));
    assert!(script.contains("CREATE TABLE users"));
    assert!(
        script.contains("INSERT INTO `users` (`id`, `name`, `email`, `score`) VALUES (1, 'Ada'")
    );
    assert!(script.contains("'O''Brien, Pat', NULL"));

    let bad = adapter
        .export_to_csv(
            &handle,
            &mut Vec::new(),
            "main",
            "DELETE FROM users",
            &CsvOptions::default(),
        )
        .await;
    assert!(bad.unwrap_err().is_validation());
}

#[tokio::test]
async fn test_alter_and_rename() {
    let (registry, _dir) = registry_with_users().await;
    let adapter = AdapterFactory::with_all().create_adapter(EngineKind::Sqlite).unwrap();
    let (handle, _) = registry.resolve("local", None).await.unwrap();

    let request = AlterTableRequest::new("main", "users")
        .with_action(AlterTableAction::add_column(
            ColumnDef::new("nickname", "varchar").with_length(40),
        ))
        .with_action(AlterTableAction::add_index(IndexDef::new(
            "idx_users_nickname",
            ["nickname"],
        )));
    let outcome = adapter.alter_table(&handle, &request).await.unwrap();
    assert!(!outcome.is_pending());
    assert_eq!(
        outcome.statements(),
        &[
            "ALTER TABLE `users` ADD COLUMN `nickname` VARCHAR(40)".to_string(),
            "CREATE INDEX `idx_users_nickname` ON `users` (`nickname`)".to_string(),
        ]
    );

    let schema = adapter.get_table_schema(&handle, "main", "users").await.unwrap();
    assert!(schema.columns.iter().any(|c| c.name == "nickname"));

    // Rejected as a whole: the add-column before the drop never runs.
    let rejected = AlterTableRequest::new("main", "users")
        .with_action(AlterTableAction::add_column(ColumnDef::new("extra", "TEXT")))
        .with_action(AlterTableAction::drop_column("email"));
    let err = adapter.alter_table(&handle, &rejected).await.unwrap_err();
    assert!(err.is_unsupported());
    match err {
        AppError::AlterAction { index, .. } => assert_eq!(index, 2),
        other => panic!("unexpected error: {}", other),
    }
    let schema = adapter.get_table_schema(&handle, "main", "users").await.unwrap();
    assert!(!schema.columns.iter().any(|c| c.name == "extra"));

    adapter
        .rename_table(&handle, "main", "users", "members")
        .await
        .unwrap();
    let tables = adapter.get_tables(&handle, "main").await.unwrap();
    assert!(tables.iter().any(|t| t.name == "members"));
    assert!(!tables.iter().any(|t| t.name == "users"));
}

#[tokio::test]
async fn test_described_default_survives_add_column() {
    let (registry, _dir) = registry_with_users().await;
    let adapter = AdapterFactory::with_all().create_adapter(EngineKind::Sqlite).unwrap();
    let (handle, _) = registry.resolve("local", None).await.unwrap();

    adapter
        .execute(&handle, "CREATE TABLE prefs (k TEXT, v TEXT DEFAULT 'anon')")
        .await
        .unwrap();
    let schema = adapter.get_table_schema(&handle, "main", "prefs").await.unwrap();
    assert_eq!(schema.columns[1].default_value.as_deref(), Some("'anon'"));
    assert!(schema.columns[1].default_is_expression);

    let mut copy = ColumnDef::from_column_info(&schema.columns[1]);
    copy.name = "v2".to_string();
    let request =
        AlterTableRequest::new("main", "prefs").with_action(AlterTableAction::add_column(copy));
    adapter.alter_table(&handle, &request).await.unwrap();

    adapter
        .insert(&handle, "main", "prefs", &row(json!({"k": "theme"})))
        .await
        .unwrap();
    let result = adapter
        .query(&handle, "SELECT v, v2 FROM prefs", &QueryOptions::for_database("main"))
        .await
        .unwrap();
    assert_eq!(result.cell(0, "v"), Some(&Cell::Text("anon".to_string())));
    assert_eq!(result.cell(0, "v2"), Some(&Cell::Text("anon".to_string())));
}
