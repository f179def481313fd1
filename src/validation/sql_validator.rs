use once_cell::sync::Lazy;
use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// `LIMIT n` closing the statement text.
static TRAILING_LIMIT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\bLIMIT\s+(\d+)$").ok());

/// What a statement hands back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Produces a result set.
    Rows,
    /// Produces only an affected-row count.
    RowCount,
}

/// Statement inspection shared by the dialect adapters.
pub struct SqlValidator;

impl SqlValidator {
    /// Classify `sql` by its leading keyword against a dialect's allowlist of
    /// readable statement forms. Anything not on the list is a mutation.
    ///
    /// A `WITH` statement whose body modifies data (`WITH x AS (...) INSERT ...`)
    /// is a mutation even though `WITH` is on every allowlist. When the text
    /// cannot be parsed the keyword decision stands.
    pub fn classify(sql: &str, readable_keywords: &[&str]) -> StatementKind {
        let keyword = match Self::leading_keyword(sql) {
            Some(k) => k,
            None => return StatementKind::RowCount,
        };

        if !readable_keywords.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) {
            return StatementKind::RowCount;
        }

        if keyword == "WITH" {
            if let Some(true) = Self::is_data_modifying_cte(sql) {
                tracing::warn!(
                    "WITH statement ends in a data-modifying body; executing as a mutation"
                );
                return StatementKind::RowCount;
            }
        }

        StatementKind::Rows
    }

    /// First keyword of `sql`, upper-cased, skipping whitespace, comments and
    /// opening parentheses.
    pub fn leading_keyword(sql: &str) -> Option<String> {
        let mut rest = sql;
        loop {
            rest = rest.trim_start();
            if let Some(stripped) = rest.strip_prefix('(') {
                rest = stripped;
            } else if let Some(stripped) = rest.strip_prefix("--") {
                rest = stripped.split_once('\n').map(|(_, tail)| tail).unwrap_or("");
            } else if let Some(stripped) = rest.strip_prefix("/*") {
                rest = stripped.split_once("*/").map(|(_, tail)| tail).unwrap_or("");
            } else {
                break;
            }
        }

        let keyword: String = rest
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        if keyword.is_empty() {
            None
        } else {
            Some(keyword.to_ascii_uppercase())
        }
    }

    fn is_data_modifying_cte(sql: &str) -> Option<bool> {
        let dialect = GenericDialect {};
        let statements = Parser::new(&dialect)
            .try_with_sql(sql)
            .ok()?
            .parse_statements()
            .ok()?;

        let stmt = statements.first()?;
        match stmt {
            Statement::Query(query) => Some(!matches!(
                *query.body,
                SetExpr::Select(_)
                    | SetExpr::Query(_)
                    | SetExpr::SetOperation { .. }
                    | SetExpr::Values(_)
                    | SetExpr::Table(_)
            )),
            _ => Some(true),
        }
    }

    /// Check if SQL has a LIMIT clause using AST parsing. `None` when the text
    /// does not parse.
    pub fn has_limit(sql: &str) -> Option<bool> {
        let dialect = GenericDialect {};
        let statements = Parser::new(&dialect)
            .try_with_sql(sql)
            .ok()?
            .parse_statements()
            .ok()?;

        match statements.first()? {
            Statement::Query(query) => Some(query.limit_clause.is_some()),
            _ => Some(false),
        }
    }

    /// Translate a trailing `LIMIT n` into a `ROWNUM` wrapper for engines
    /// without LIMIT. Trailing semicolons are always stripped.
    pub fn rewrite_limit_as_rownum(sql: &str) -> String {
        let trimmed = sql
            .trim()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace());

        if Self::leading_keyword(trimmed).as_deref() != Some("SELECT") {
            return trimmed.to_string();
        }
        // a parsed statement without LIMIT may still mention it in a literal
        if Self::has_limit(trimmed) == Some(false) {
            return trimmed.to_string();
        }

        // only the outer statement's closing clause; nested or quoted LIMITs stay
        let Some(limit_re) = TRAILING_LIMIT.as_ref() else {
            return trimmed.to_string();
        };
        let Some(caps) = limit_re.captures(trimmed) else {
            return trimmed.to_string();
        };
        let (Some(clause), Some(limit)) = (caps.get(0), caps.get(1)) else {
            return trimmed.to_string();
        };

        let inner = &trimmed[..clause.start()];
        let rewritten = format!(
            "SELECT * FROM ({}) WHERE ROWNUM <= {}",
            inner.trim(),
            limit.as_str()
        );
        tracing::warn!(
            "Rewrote row limit for ROWNUM: original: {} | final: {}",
            sql,
            rewritten
        );
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const READS: &[&str] = &["SELECT", "SHOW", "DESC", "EXPLAIN", "WITH"];

    #[test]
    fn test_classify_by_leading_keyword() {
        assert_eq!(SqlValidator::classify("select * from t", READS), StatementKind::Rows);
        assert_eq!(SqlValidator::classify("  SHOW TABLES", READS), StatementKind::Rows);
        assert_eq!(
            SqlValidator::classify("(SELECT 1) UNION (SELECT 2)", READS),
            StatementKind::Rows
        );
        assert_eq!(SqlValidator::classify("UPDATE t SET a = 1", READS), StatementKind::RowCount);
        assert_eq!(SqlValidator::classify("PRAGMA table_info(t)", READS), StatementKind::RowCount);
        assert_eq!(SqlValidator::classify("", READS), StatementKind::RowCount);
    }

    #[test]
    fn test_classify_skips_comments() {
        let sql = "-- list users\n/* paged */ SELECT * FROM users";
        assert_eq!(SqlValidator::classify(sql, READS), StatementKind::Rows);
    }

    #[test]
    fn test_with_insert_is_a_mutation() {
        let sql = "WITH src AS (SELECT 1 AS id) INSERT INTO t (id) SELECT id FROM src";
        assert_eq!(SqlValidator::classify(sql, READS), StatementKind::RowCount);

        let read = "WITH src AS (SELECT 1 AS id) SELECT id FROM src";
        assert_eq!(SqlValidator::classify(read, READS), StatementKind::Rows);
    }

    #[test]
    fn test_unparseable_with_keeps_keyword_decision() {
        let sql = "WITH weird ((( engine specific";
        assert_eq!(SqlValidator::classify(sql, READS), StatementKind::Rows);
    }

    #[test]
    fn test_rownum_rewrite() {
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("SELECT * FROM emp ORDER BY sal DESC LIMIT 5;"),
            "SELECT * FROM (SELECT * FROM emp ORDER BY sal DESC) WHERE ROWNUM <= 5"
        );
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("select name from emp limit 10 "),
            "SELECT * FROM (select name from emp) WHERE ROWNUM <= 10"
        );
        // only trailing semicolons go for non-queries and queries without LIMIT
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("DELETE FROM emp WHERE note = 'limit 3';"),
            "DELETE FROM emp WHERE note = 'limit 3'"
        );
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("SELECT limit_value FROM t"),
            "SELECT limit_value FROM t"
        );
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("SELECT * FROM t WHERE note = 'limit 3'"),
            "SELECT * FROM t WHERE note = 'limit 3'"
        );
    }

    #[test]
    fn test_rownum_rewrite_touches_only_the_closing_limit() {
        let quoted = "SELECT * FROM t WHERE note = 'limit 3' LIMIT 10";
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum(quoted),
            "SELECT * FROM (SELECT * FROM t WHERE note = 'limit 3') WHERE ROWNUM <= 10"
        );
        let nested = "SELECT * FROM (SELECT * FROM a LIMIT 3) x LIMIT 5";
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum(nested),
            "SELECT * FROM (SELECT * FROM (SELECT * FROM a LIMIT 3) x) WHERE ROWNUM <= 5"
        );
        // a nested LIMIT alone leaves the statement as written
        assert_eq!(
            SqlValidator::rewrite_limit_as_rownum("SELECT * FROM (SELECT * FROM a LIMIT 3) x"),
            "SELECT * FROM (SELECT * FROM a LIMIT 3) x"
        );
    }

    #[test]
    fn test_has_limit() {
        assert_eq!(SqlValidator::has_limit("SELECT * FROM users"), Some(false));
        assert_eq!(SqlValidator::has_limit("SELECT * FROM users LIMIT 10"), Some(true));
        assert_eq!(SqlValidator::has_limit("SELECT * FROM table_limit"), Some(false));
        assert_eq!(SqlValidator::has_limit("SELECT limit_value FROM users"), Some(false));
        assert_eq!(SqlValidator::has_limit("not sql at all ((("), None);
    }
}
