use crate::error::AppError;
use crate::models::{Cell, QueryResult, SqlOptions, TableSchema, TIMESTAMP_FORMAT};
use crate::services::database::ddl::{escape_single_quotes, format_default, QuoteStyle};
use std::io::Write;

/// Renders a reconstructable statement script in one dialect's quoting.
pub struct SqlScriptWriter<'a> {
    opts: &'a SqlOptions,
    quote: QuoteStyle,
}

impl<'a> SqlScriptWriter<'a> {
    pub fn new(opts: &'a SqlOptions, quote: QuoteStyle) -> Self {
        Self { opts, quote }
    }

    fn write_drop(
        &self,
        writer: &mut (dyn Write + Send),
        database: &str,
        table: &str,
    ) -> Result<(), AppError> {
        if self.opts.include_drop_table {
            writeln!(
                writer,
                "DROP TABLE IF EXISTS {};\n",
                self.quote.qualified(database, table)
            )?;
        }
        Ok(())
    }

    /// Emit DDL text the engine itself produced.
    pub fn write_native_ddl(
        &self,
        writer: &mut (dyn Write + Send),
        database: &str,
        table: &str,
        ddl: &str,
    ) -> Result<(), AppError> {
        self.write_drop(writer, database, table)?;
        let ddl = ddl.trim().trim_end_matches(';');
        writeln!(writer, "{};\n", ddl)?;
        Ok(())
    }

    /// Rebuild a CREATE TABLE from a described schema.
    pub fn write_schema(
        &self,
        writer: &mut (dyn Write + Send),
        schema: &TableSchema,
    ) -> Result<(), AppError> {
        self.write_drop(writer, &schema.database, &schema.table)?;

        let mut lines: Vec<String> = schema
            .columns
            .iter()
            .map(|col| {
                let mut def = format!("  {} {}", self.quote.quote(&col.name), col.column_type);
                if !col.nullable {
                    def.push_str(" NOT NULL");
                }
                if let Some(default) = col.default_value.as_deref().filter(|d| !d.is_empty()) {
                    let operand = if col.default_is_expression {
                        default.to_string()
                    } else {
                        format_default(
                            default,
                            &["NULL", "CURRENT_TIMESTAMP"],
                            true,
                            escape_single_quotes,
                        )
                    };
                    def.push_str(&format!(" DEFAULT {}", operand));
                }
                if !col.extra.is_empty() {
                    def.push_str(&format!(" {}", col.extra));
                }
                def
            })
            .collect();

        if let Some(pk) = schema.primary_key() {
            lines.push(format!("  PRIMARY KEY ({})", self.quote.quote_list(&pk.columns)));
        }

        writeln!(
            writer,
            "CREATE TABLE {} (\n{}\n);\n",
            self.quote.qualified(&schema.database, &schema.table),
            lines.join(",\n")
        )?;
        Ok(())
    }

    /// Emit the rows of `result` as INSERT statements into `table`.
    /// Returns the number of rows written.
    pub fn write_rows(
        &self,
        writer: &mut (dyn Write + Send),
        database: &str,
        table: &str,
        result: &QueryResult,
    ) -> Result<u64, AppError> {
        if self.opts.structure_only || result.columns.is_empty() {
            return Ok(0);
        }

        let target = self.quote.qualified(database, table);
        let columns = self.quote.quote_list(&result.columns);
        let limit = if self.opts.max_rows > 0 {
            self.opts.max_rows as usize
        } else {
            usize::MAX
        };
        let rows: Vec<&Vec<Cell>> = result.rows.iter().take(limit).collect();

        let batch_size = self.opts.effective_batch_size();
        if self.opts.batch_insert && batch_size > 1 {
            for chunk in rows.chunks(batch_size) {
                let values: Vec<String> = chunk
                    .iter()
                    .map(|row| format!("({})", Self::format_row(row)))
                    .collect();
                writeln!(
                    writer,
                    "INSERT INTO {} ({}) VALUES\n{};",
                    target,
                    columns,
                    values.join(",\n")
                )?;
            }
        } else {
            for row in &rows {
                writeln!(
                    writer,
                    "INSERT INTO {} ({}) VALUES ({});",
                    target,
                    columns,
                    Self::format_row(row)
                )?;
            }
        }

        writer.flush()?;
        Ok(rows.len() as u64)
    }

    fn format_row(row: &[Cell]) -> String {
        row.iter()
            .map(format_literal)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// SQL literal for one cell.
pub fn format_literal(cell: &Cell) -> String {
    match cell {
        Cell::Null => "NULL".to_string(),
        Cell::Integer(i) => i.to_string(),
        Cell::Float(f) if f.is_finite() => f.to_string(),
        Cell::Float(_) => "NULL".to_string(),
        Cell::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Cell::Timestamp(ts) => format!("'{}'", ts.format(TIMESTAMP_FORMAT)),
        Cell::Text(s) | Cell::Structured(s) => format!("'{}'", escape_single_quotes(s)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ColumnInfo, IndexInfo};
    use std::time::Duration;

    fn result() -> QueryResult {
        QueryResult::from_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Cell::Integer(1), Cell::Text("O'Brien".into())],
                vec![Cell::Integer(2), Cell::Null],
                vec![Cell::Integer(3), Cell::Text("c".into())],
            ],
            Duration::from_millis(1),
        )
    }

    fn render<F>(f: F) -> String
    where
        F: FnOnce(&mut (dyn Write + Send)) -> Result<(), AppError>,
    {
        let mut out: Vec<u8> = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_single_row_inserts() {
        let opts = SqlOptions::default();
        let script = SqlScriptWriter::new(&opts, QuoteStyle::Backtick);
        let text = render(|w| script.write_rows(w, "shop", "users", &result()).map(|_| ()));
        assert_eq!(
            text,
            "INSERT INTO `shop`.`users` (`id`, `name`) VALUES (1, 'O''Brien');\n\
             INSERT INTO `shop`.`users` (`id`, `name`) VALUES (2, NULL);\n\
             INSERT INTO `shop`.`users` (`id`, `name`) VALUES (3, 'c');\n"
        );
    }

    #[test]
    fn test_batched_inserts() {
        let opts = SqlOptions {
            batch_insert: true,
            batch_size: 2,
            ..SqlOptions::default()
        };
        let script = SqlScriptWriter::new(&opts, QuoteStyle::DoubleQuote);
        let text = render(|w| script.write_rows(w, "", "t", &result()).map(|_| ()));
        assert_eq!(
            text,
            "INSERT INTO \"t\" (\"id\", \"name\") VALUES\n(1, 'O''Brien'),\n(2, NULL);\n\
             INSERT INTO \"t\" (\"id\", \"name\") VALUES\n(3, 'c');\n"
        );
    }

    #[test]
    fn test_schema_rebuild_with_drop() {
        let opts = SqlOptions {
            include_drop_table: true,
            ..SqlOptions::default()
        };
        let mut id = ColumnInfo::new("id", "INTEGER", false);
        id.extra = "AUTO_INCREMENT".into();
        let mut name = ColumnInfo::new("name", "TEXT", true);
        name.default_value = Some("'x'".into());
        name.default_is_expression = true;
        let mut state = ColumnInfo::new("state", "VARCHAR(8)", false);
        state.default_value = Some("it's".into());
        let schema = TableSchema {
            database: String::new(),
            schema: String::new(),
            table: "t".into(),
            columns: vec![id, name, state],
            indexes: vec![IndexInfo {
                name: "PRIMARY".into(),
                columns: vec!["id".into()],
                unique: true,
                primary: true,
                method: None,
                comment: String::new(),
            }],
        };
        let script = SqlScriptWriter::new(&opts, QuoteStyle::Backtick);
        let text = render(|w| script.write_schema(w, &schema));
        assert_eq!(
            text,
            "DROP TABLE IF EXISTS `t`;\n\n\
             CREATE TABLE `t` (\n  `id` INTEGER NOT NULL AUTO_INCREMENT,\n  `name` TEXT DEFAULT 'x',\n  \
             `state` VARCHAR(8) NOT NULL DEFAULT 'it''s',\n  PRIMARY KEY (`id`)\n);\n\n"
        );
    }

    #[test]
    fn test_structure_only_writes_no_rows() {
        let opts = SqlOptions {
            structure_only: true,
            ..SqlOptions::default()
        };
        let script = SqlScriptWriter::new(&opts, QuoteStyle::Backtick);
        let mut out: Vec<u8> = Vec::new();
        assert_eq!(script.write_rows(&mut out, "", "t", &result()).unwrap(), 0);
        assert!(out.is_empty());
    }
}
