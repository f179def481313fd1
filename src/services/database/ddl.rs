// Shared pieces of the alter-table builders
use crate::error::AppError;
use crate::models::{AlterTableAction, AlterTableRequest, ColumnDef, IndexDef};
use crate::services::database::adapter::DatabaseAdapter;
use crate::services::database::handle::EngineHandle;

/// Identifier quoting convention of a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// MySQL, SQLite, ClickHouse
    Backtick,
    /// PostgreSQL family, Oracle, DM
    DoubleQuote,
}

impl QuoteStyle {
    fn quote_char(&self) -> char {
        match self {
            QuoteStyle::Backtick => '`',
            QuoteStyle::DoubleQuote => '"',
        }
    }

    /// Quote one identifier, doubling any embedded quote character.
    pub fn quote(&self, ident: &str) -> String {
        let q = self.quote_char();
        let mut out = String::with_capacity(ident.len() + 2);
        out.push(q);
        for c in ident.chars() {
            if c == q {
                out.push(q);
            }
            out.push(c);
        }
        out.push(q);
        out
    }

    /// `"db"."table"`, or just the quoted table when `database` is empty.
    pub fn qualified(&self, database: &str, table: &str) -> String {
        if database.is_empty() {
            self.quote(table)
        } else {
            format!("{}.{}", self.quote(database), self.quote(table))
        }
    }

    pub fn quote_list(&self, idents: &[String]) -> String {
        idents
            .iter()
            .map(|i| self.quote(i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SQL standard string escaping: `'` becomes `''`.
pub fn escape_single_quotes(value: &str) -> String {
    value.replace('\'', "''")
}

/// Backslash escaping used by ClickHouse string literals.
pub fn escape_backslash_quotes(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Upper-case the keywords of a type string, leaving quoted text alone so
/// `enum('a','B')` keeps its values and `"MyType"` its name.
pub fn upper_type_keywords(column_type: &str) -> String {
    let mut out = String::with_capacity(column_type.len());
    let mut quote: Option<char> = None;
    for c in column_type.trim().chars() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
                out.push(c);
            }
            None if c == '\'' || c == '"' => {
                quote = Some(c);
                out.push(c);
            }
            None => out.extend(c.to_uppercase()),
        }
    }
    out
}

/// `base` plus a `(len)`, `(p,s)` or `(p)` suffix taken from the definition.
/// A base that already carries its own suffix is returned unchanged, which
/// keeps described native types lossless.
pub fn type_with_suffix(base: &str, column: &ColumnDef) -> String {
    if base.contains('(') {
        return base.to_string();
    }
    if column.length > 0 {
        format!("{}({})", base, column.length)
    } else if column.precision > 0 && column.scale > 0 {
        format!("{}({},{})", base, column.precision, column.scale)
    } else if column.precision > 0 {
        format!("{}({})", base, column.precision)
    } else {
        base.to_string()
    }
}

pub fn is_numeric_literal(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty()
        && v.parse::<f64>().is_ok()
        && !v.eq_ignore_ascii_case("nan")
        && !v.to_ascii_lowercase().contains("inf")
}

/// Render a DEFAULT operand.
///
/// Values matching one of `keywords` (case-insensitive) pass through
/// upper-cased. Numbers pass through unquoted when `bare_numbers` is set.
/// Everything else becomes a string literal escaped with `escape`.
pub fn format_default(
    value: &str,
    keywords: &[&str],
    bare_numbers: bool,
    escape: fn(&str) -> String,
) -> String {
    let upper = value.trim().to_uppercase();
    if keywords.iter().any(|k| *k == upper) {
        return upper;
    }
    if bare_numbers && is_numeric_literal(value) {
        return value.trim().to_string();
    }
    format!("'{}'", escape(value))
}

/// DEFAULT operand of a definition. Expression defaults pass through
/// verbatim, plain values go through `render`.
pub fn default_operand<F>(column: &ColumnDef, render: F) -> Option<String>
where
    F: FnOnce(&str) -> String,
{
    let value = column.default_value()?;
    if column.default_is_expression {
        Some(value.trim().to_string())
    } else {
        Some(render(value))
    }
}

pub fn require_column(column: &Option<ColumnDef>) -> Result<&ColumnDef, AppError> {
    match column {
        Some(c) if !c.name.trim().is_empty() => Ok(c),
        Some(_) => Err(AppError::Validation("column name is required".to_string())),
        None => Err(AppError::Validation("column definition is required".to_string())),
    }
}

pub fn require_index(index: &Option<IndexDef>) -> Result<&IndexDef, AppError> {
    let index = index
        .as_ref()
        .ok_or_else(|| AppError::Validation("index definition is required".to_string()))?;
    if index.columns.is_empty() {
        return Err(AppError::Validation("index columns are required".to_string()));
    }
    if index.name.trim().is_empty() {
        return Err(AppError::Validation("index name is required".to_string()));
    }
    Ok(index)
}

pub fn ensure_actions(request: &AlterTableRequest) -> Result<(), AppError> {
    if request.actions.is_empty() {
        return Err(AppError::Validation("no actions specified".to_string()));
    }
    if request.table.trim().is_empty() {
        return Err(AppError::Validation("table name is required".to_string()));
    }
    Ok(())
}

/// One statement of an alter plan, remembering which action produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedStatement {
    /// 1-based position of the action in the request.
    pub action_index: usize,
    pub action: &'static str,
    pub sql: String,
}

/// Build every statement for `request` before anything runs. The first
/// builder failure aborts the plan, wrapped with the action's position.
pub fn plan_statements<F>(
    request: &AlterTableRequest,
    mut build: F,
) -> Result<Vec<PlannedStatement>, AppError>
where
    F: FnMut(&AlterTableAction) -> Result<Vec<String>, AppError>,
{
    ensure_actions(request)?;
    let mut plan = Vec::new();
    for (i, action) in request.actions.iter().enumerate() {
        let statements =
            build(action).map_err(|e| AppError::alter_action(i + 1, action.tag(), e))?;
        plan.extend(statements.into_iter().map(|sql| PlannedStatement {
            action_index: i + 1,
            action: action.tag(),
            sql,
        }));
    }
    Ok(plan)
}

/// Build one clause per action and join them into a single
/// `ALTER TABLE <target> c1, c2` statement.
pub fn plan_combined<F>(
    request: &AlterTableRequest,
    target: &str,
    mut build: F,
) -> Result<String, AppError>
where
    F: FnMut(&AlterTableAction) -> Result<String, AppError>,
{
    ensure_actions(request)?;
    let mut clauses = Vec::with_capacity(request.actions.len());
    for (i, action) in request.actions.iter().enumerate() {
        let clause = build(action).map_err(|e| AppError::alter_action(i + 1, action.tag(), e))?;
        clauses.push(clause);
    }
    Ok(format!("ALTER TABLE {} {}", target, clauses.join(", ")))
}

/// Run a combined `ALTER TABLE` built by [`plan_combined`]. The engine does
/// not say which clause failed, so the failure is reported against the
/// first action.
pub async fn execute_combined(
    adapter: &dyn DatabaseAdapter,
    handle: &EngineHandle,
    request: &AlterTableRequest,
    sql: &str,
) -> Result<(), AppError> {
    ensure_actions(request)?;
    tracing::debug!("{} alter: {}", adapter.engine(), sql);
    let tag = request.actions.first().map_or("ALTER", |a| a.tag());
    adapter
        .execute(handle, sql)
        .await
        .map(|_| ())
        .map_err(|e| AppError::alter_action(1, tag, e))
}

/// Run a plan in order, stopping at the first failing statement.
pub async fn execute_plan(
    adapter: &dyn DatabaseAdapter,
    handle: &EngineHandle,
    plan: Vec<PlannedStatement>,
) -> Result<Vec<String>, AppError> {
    let mut executed = Vec::with_capacity(plan.len());
    for stmt in plan {
        tracing::debug!("{} alter: {}", adapter.engine(), stmt.sql);
        adapter
            .execute(handle, &stmt.sql)
            .await
            .map_err(|e| AppError::alter_action(stmt.action_index, stmt.action, e))?;
        executed.push(stmt.sql);
    }
    Ok(executed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_doubles_embedded_quote() {
        assert_eq!(QuoteStyle::Backtick.quote("we`ird"), "`we``ird`");
        assert_eq!(QuoteStyle::DoubleQuote.quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(QuoteStyle::Backtick.qualified("", "t"), "`t`");
        assert_eq!(QuoteStyle::DoubleQuote.qualified("s", "t"), "\"s\".\"t\"");
    }

    #[test]
    fn test_upper_type_keywords() {
        assert_eq!(
            upper_type_keywords("enum('active','Closed')"),
            "ENUM('active','Closed')"
        );
        assert_eq!(upper_type_keywords("int(10) unsigned"), "INT(10) UNSIGNED");
        assert_eq!(upper_type_keywords("set('it''s','X')"), "SET('it''s','X')");
        assert_eq!(upper_type_keywords("\"MyEnum\""), "\"MyEnum\"");
    }

    #[test]
    fn test_type_with_suffix() {
        let col = ColumnDef::new("a", "VARCHAR").with_length(255);
        assert_eq!(type_with_suffix("VARCHAR", &col), "VARCHAR(255)");

        let dec = ColumnDef::new("p", "DECIMAL").with_precision(10, 2);
        assert_eq!(type_with_suffix("DECIMAL", &dec), "DECIMAL(10,2)");

        let prec_only = ColumnDef::new("p", "NUMBER").with_precision(8, 0);
        assert_eq!(type_with_suffix("NUMBER", &prec_only), "NUMBER(8)");

        // already suffixed types are preserved
        let native = ColumnDef::new("n", "varchar(64)").with_length(10);
        assert_eq!(type_with_suffix("varchar(64)", &native), "varchar(64)");
    }

    #[test]
    fn test_format_default() {
        let kw = &["NULL", "CURRENT_TIMESTAMP"];
        assert_eq!(
            format_default("current_timestamp", kw, false, escape_single_quotes),
            "CURRENT_TIMESTAMP"
        );
        assert_eq!(format_default("0", kw, false, escape_single_quotes), "'0'");
        assert_eq!(format_default("0", kw, true, escape_single_quotes), "0");
        assert_eq!(format_default("it's", kw, false, escape_single_quotes), "'it''s'");
        assert_eq!(format_default("it's", kw, false, escape_backslash_quotes), "'it\\'s'");
    }

    #[test]
    fn test_default_operand_keeps_expressions() {
        let quote = |v: &str| format!("'{}'", escape_single_quotes(v));

        let literal = ColumnDef::new("s", "TEXT").with_default("it's");
        assert_eq!(default_operand(&literal, quote).as_deref(), Some("'it''s'"));

        let expr = ColumnDef::new("s", "TEXT").with_default_expression(" 'anon' ");
        assert_eq!(default_operand(&expr, quote).as_deref(), Some("'anon'"));

        let none = ColumnDef::new("s", "TEXT");
        assert_eq!(default_operand(&none, quote), None);
    }

    #[test]
    fn test_numeric_literal() {
        assert!(is_numeric_literal("42"));
        assert!(is_numeric_literal("-1.5"));
        assert!(!is_numeric_literal("abc"));
        assert!(!is_numeric_literal("inf"));
        assert!(!is_numeric_literal(""));
    }

    #[test]
    fn test_plan_rejects_empty_request() {
        let req = AlterTableRequest::new("db", "t");
        let err = plan_statements(&req, |_| Ok(vec!["x".to_string()])).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_plan_names_first_failing_action() {
        let req = AlterTableRequest::new("db", "t")
            .with_action(AlterTableAction::drop_column("a"))
            .with_action(AlterTableAction::ModifyColumn { column: None })
            .with_action(AlterTableAction::drop_column("b"));

        let mut calls = 0;
        let err = plan_statements(&req, |action| {
            calls += 1;
            match action {
                AlterTableAction::ModifyColumn { column } => {
                    require_column(column).map(|_| vec![])
                }
                _ => Ok(vec!["DROP".to_string()]),
            }
        })
        .unwrap_err();

        assert_eq!(calls, 2);
        match err {
            AppError::AlterAction { index, action, .. } => {
                assert_eq!(index, 2);
                assert_eq!(action, "MODIFY_COLUMN");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_plan_combined_joins_clauses() {
        let req = AlterTableRequest::new("db", "t")
            .with_action(AlterTableAction::drop_column("a"))
            .with_action(AlterTableAction::drop_column("b"));
        let sql = plan_combined(&req, "`db`.`t`", |action| match action {
            AlterTableAction::DropColumn { name } => Ok(format!("DROP COLUMN `{}`", name)),
            _ => unreachable!(),
        })
        .unwrap();
        assert_eq!(sql, "ALTER TABLE `db`.`t` DROP COLUMN `a`, DROP COLUMN `b`");
    }

    #[test]
    fn test_require_index() {
        assert!(require_index(&None).unwrap_err().is_validation());
        let empty = IndexDef::new("idx", Vec::<String>::new());
        let err = require_index(&Some(empty)).unwrap_err();
        assert!(err.to_string().contains("index columns are required"));
    }
}
