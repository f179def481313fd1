use dbm_core::models::{AlterTableAction, AlterTableRequest, ColumnDef, EngineKind, IndexDef};
use dbm_core::services::database::{
    ClickHouseAdapter, DatabaseAdapter, DmAdapter, EngineHandle, MySqlAdapter, OracleAdapter,
    PostgresAdapter, SqliteAdapter,
};
use dbm_core::services::AdapterFactory;
use dbm_core::AppError;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Any live handle will do: requests rejected during planning never touch it.
fn scratch_handle() -> EngineHandle {
    let conn = Connection::open_in_memory().unwrap();
    EngineHandle::Sqlite(Arc::new(Mutex::new(conn)))
}

fn email_column() -> ColumnDef {
    ColumnDef::new("email", "VARCHAR")
        .with_length(255)
        .not_null()
        .with_comment("user email")
}

#[test]
fn test_mysql_add_column_clause() {
    let clause =
        MySqlAdapter::build_alter_clause(&AlterTableAction::add_column(email_column())).unwrap();
    assert_eq!(
        clause,
        "ADD COLUMN `email` VARCHAR(255) NOT NULL COMMENT 'user email'"
    );
}

#[test]
fn test_mysql_modify_column_clause() {
    let age = ColumnDef::new("age", "INT").with_default("0");
    let clause = MySqlAdapter::build_alter_clause(&AlterTableAction::modify_column(age)).unwrap();
    assert_eq!(clause, "MODIFY COLUMN `age` INT NULL DEFAULT '0'");
}

#[test]
fn test_mysql_rename_column_clause() {
    let redefined = ColumnDef::new("new_name", "VARCHAR").with_length(100).not_null();
    let action = AlterTableAction::rename_column("old_name", "new_name", Some(redefined));
    let clause = MySqlAdapter::build_alter_clause(&action).unwrap();
    assert_eq!(
        clause,
        "CHANGE COLUMN `old_name` `new_name` VARCHAR(100) NOT NULL"
    );

    let bare = AlterTableAction::rename_column("old_name", "new_name", None);
    assert!(MySqlAdapter::build_alter_clause(&bare).unwrap_err().is_validation());
}

#[test]
fn test_mysql_combines_actions_in_order() {
    let request = AlterTableRequest::new("shop", "users")
        .with_action(AlterTableAction::add_column(
            ColumnDef::new("phone", "varchar").with_length(20).after("email"),
        ))
        .with_action(AlterTableAction::add_index(
            IndexDef::new("idx_phone", ["phone"]).unique(),
        ))
        .with_action(AlterTableAction::drop_column("legacy"));
    let sql = MySqlAdapter::build_alter_sql(&request).unwrap();
    assert_eq!(
        sql,
        "ALTER TABLE `shop`.`users` ADD COLUMN `phone` VARCHAR(20) NULL AFTER `email`, \
         ADD UNIQUE INDEX `idx_phone` (`phone`), DROP COLUMN `legacy`"
    );
}

#[tokio::test]
async fn test_clickhouse_add_index_is_unsupported() {
    let adapter = ClickHouseAdapter::new();
    let request = AlterTableRequest::new("analytics", "events")
        .with_action(AlterTableAction::add_column(ColumnDef::new("region", "String")))
        .with_action(AlterTableAction::add_index(IndexDef::new("idx_region", ["region"])));

    let err = adapter
        .alter_table(&scratch_handle(), &request)
        .await
        .unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(err.engine(), Some(EngineKind::ClickHouse));
    assert!(err.to_string().contains("use ORDER BY or PRIMARY KEY instead"));
    match err {
        AppError::AlterAction { index, action, .. } => {
            assert_eq!(index, 2);
            assert_eq!(action, "ADD_INDEX");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_zero_actions_is_validation_error_for_every_engine() {
    let factory = AdapterFactory::with_all();
    let handle = scratch_handle();
    for kind in factory.supported_engines() {
        let adapter = factory.create_adapter(kind).unwrap();
        let request = AlterTableRequest::new("db", "t");
        let err = adapter.alter_table(&handle, &request).await.unwrap_err();
        assert!(err.is_validation(), "{} returned {}", kind, err);
    }
}

#[test]
fn test_postgres_modify_splits_into_statements() {
    let mut request = AlterTableRequest::new("shop", "orders").with_action(
        AlterTableAction::modify_column(
            ColumnDef::new("total", "numeric")
                .with_precision(12, 2)
                .not_null()
                .with_default("0"),
        ),
    );
    request.schema = Some("sales".to_string());
    let plan = PostgresAdapter::plan_alter(&request).unwrap();
    let sql: Vec<&str> = plan.iter().map(|p| p.sql.as_str()).collect();
    assert_eq!(
        sql,
        vec![
            r#"ALTER TABLE "sales"."orders" ALTER COLUMN "total" TYPE NUMERIC(12,2)"#,
            r#"ALTER TABLE "sales"."orders" ALTER COLUMN "total" SET NOT NULL"#,
            r#"ALTER TABLE "sales"."orders" ALTER COLUMN "total" SET DEFAULT 0"#,
        ]
    );
    assert!(plan.iter().all(|p| p.action_index == 1 && p.action == "MODIFY_COLUMN"));
}

#[test]
fn test_sqlite_rejects_drop_before_planning_anything() {
    let request = AlterTableRequest::new("main", "users")
        .with_action(AlterTableAction::add_column(ColumnDef::new("nickname", "TEXT")))
        .with_action(AlterTableAction::modify_column(ColumnDef::new("email", "TEXT")));
    let err = SqliteAdapter::plan_alter(&request).unwrap_err();
    assert!(err.is_unsupported());
    assert!(err.to_string().contains("table rebuild required"));
}

#[test]
fn test_column_type_builders_are_deterministic() {
    let columns = vec![
        email_column(),
        ColumnDef::new("id", "bigint").auto_increment().not_null(),
        ColumnDef::new("price", "decimal").with_precision(10, 2).with_default("9.99"),
        ColumnDef::new("created_at", "timestamp").with_default("CURRENT_TIMESTAMP"),
        ColumnDef::new("note", "varchar").with_length(64).with_default("it's"),
    ];
    for column in &columns {
        assert_eq!(MySqlAdapter::column_type(column), MySqlAdapter::column_type(column));
        assert_eq!(PostgresAdapter::column_type(column), PostgresAdapter::column_type(column));
        assert_eq!(SqliteAdapter::column_type(column), SqliteAdapter::column_type(column));
        assert_eq!(
            ClickHouseAdapter::column_type(column),
            ClickHouseAdapter::column_type(column)
        );
        assert_eq!(OracleAdapter::column_type(column), OracleAdapter::column_type(column));
        assert_eq!(DmAdapter::column_type(column), DmAdapter::column_type(column));
    }

    let note = &columns[4];
    assert_eq!(
        MySqlAdapter::column_type(note),
        "VARCHAR(64) NULL DEFAULT 'it''s'"
    );
    assert_eq!(
        ClickHouseAdapter::column_type(note),
        r"Nullable(varchar(64)) DEFAULT 'it\'s'"
    );
    assert_eq!(PostgresAdapter::column_type(&columns[1]), "BIGSERIAL NOT NULL");
}

#[test]
fn test_described_mysql_column_round_trips() {
    use dbm_core::models::ColumnInfo;

    let mut info = ColumnInfo::new("email", "varchar(255)", false);
    info.comment = "user email".to_string();
    let column = ColumnDef::from_column_info(&info);
    assert_eq!(
        MySqlAdapter::column_type(&column),
        "VARCHAR(255) NOT NULL COMMENT 'user email'"
    );
}

fn described(name: &str, native: &str, nullable: bool, default: Option<&str>) -> ColumnDef {
    use dbm_core::models::ColumnInfo;

    let mut info = ColumnInfo::new(name, native, nullable);
    info.default_value = default.map(str::to_string);
    info.default_is_expression = default.is_some();
    ColumnDef::from_column_info(&info)
}

#[test]
fn test_clickhouse_nullable_column_round_trips() {
    let column = described("msg", "Nullable(String)", true, Some("'none'"));
    assert_eq!(
        ClickHouseAdapter::column_type(&column),
        "Nullable(String) DEFAULT 'none'"
    );

    let low_card = described("tag", "LowCardinality(Nullable(String))", false, None);
    assert_eq!(
        ClickHouseAdapter::column_type(&low_card),
        "LowCardinality(Nullable(String))"
    );
}

#[test]
fn test_postgres_described_defaults_round_trip() {
    use dbm_core::models::ColumnInfo;

    let mut id = ColumnInfo::new("id", "integer", false);
    id.default_value = Some("nextval('users_id_seq'::regclass)".to_string());
    id.default_is_expression = true;
    id.extra = "auto_increment".to_string();
    let id = ColumnDef::from_column_info(&id);
    assert_eq!(PostgresAdapter::column_type(&id), "SERIAL NOT NULL");

    let status = described(
        "status",
        "character varying(20)",
        true,
        Some("'new'::character varying"),
    );
    assert_eq!(
        PostgresAdapter::column_type(&status),
        "CHARACTER VARYING(20) DEFAULT 'new'::character varying"
    );

    let mut request = AlterTableRequest::new("shop", "orders")
        .with_action(AlterTableAction::modify_column(status));
    request.schema = Some("public".to_string());
    let plan = PostgresAdapter::plan_alter(&request).unwrap();
    assert_eq!(
        plan.last().map(|p| p.sql.as_str()),
        Some(r#"ALTER TABLE "public"."orders" ALTER COLUMN "status" SET DEFAULT 'new'::character varying"#)
    );
}

#[test]
fn test_sqlite_quoted_default_round_trips() {
    let column = described("nick", "TEXT", true, Some("'anon'"));
    assert_eq!(SqliteAdapter::column_type(&column), "TEXT DEFAULT 'anon'");
}

#[test]
fn test_mysql_enum_and_expression_default_round_trip() {
    let state = described("state", "enum('active','Closed')", false, None);
    assert_eq!(
        MySqlAdapter::column_type(&state),
        "ENUM('active','Closed') NOT NULL"
    );

    let token = described("token", "varchar(36)", false, Some("uuid()"));
    assert_eq!(
        MySqlAdapter::column_type(&token),
        "VARCHAR(36) NOT NULL DEFAULT (uuid())"
    );

    let created = described("created_at", "timestamp", true, Some("CURRENT_TIMESTAMP"));
    assert_eq!(
        MySqlAdapter::column_type(&created),
        "TIMESTAMP NULL DEFAULT CURRENT_TIMESTAMP"
    );
}

#[test]
fn test_clickhouse_drop_index_is_unsupported() {
    let request = AlterTableRequest::new("analytics", "events")
        .with_action(AlterTableAction::drop_index("idx_region"));
    let err = ClickHouseAdapter::build_alter_sql(&request).unwrap_err();
    assert!(err.is_unsupported());
    match err {
        AppError::AlterAction { index, action, .. } => {
            assert_eq!(index, 1);
            assert_eq!(action, "DROP_INDEX");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_rownum_rewrite_keeps_literals_and_subqueries() {
    use dbm_core::SqlValidator;

    let quoted = "SELECT * FROM t WHERE note = 'limit 3' LIMIT 10;";
    assert_eq!(
        SqlValidator::rewrite_limit_as_rownum(quoted),
        "SELECT * FROM (SELECT * FROM t WHERE note = 'limit 3') WHERE ROWNUM <= 10"
    );
    let nested = "SELECT * FROM (SELECT * FROM a LIMIT 3) x LIMIT 5";
    assert_eq!(
        SqlValidator::rewrite_limit_as_rownum(nested),
        "SELECT * FROM (SELECT * FROM (SELECT * FROM a LIMIT 3) x) WHERE ROWNUM <= 5"
    );
}
