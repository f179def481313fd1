use crate::error::AppError;
use crate::models::{Cell, CsvOptions, QueryResult};
use std::io::Write;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write `result` as CSV and return the number of data rows written.
///
/// UTF-8 output starts with a BOM so spreadsheet tools pick the right
/// encoding. Fields containing the separator, the quote character or a line
/// break are quoted, with embedded quotes doubled.
pub fn write_csv(
    writer: &mut (dyn Write + Send),
    result: &QueryResult,
    opts: &CsvOptions,
) -> Result<u64, AppError> {
    let separator = if opts.separator.is_empty() {
        ","
    } else {
        opts.separator.as_str()
    };
    let quote = opts.quote.chars().next().unwrap_or('"');

    if opts.encoding.eq_ignore_ascii_case("UTF-8") || opts.encoding.eq_ignore_ascii_case("UTF8") {
        writer.write_all(UTF8_BOM)?;
    } else {
        tracing::debug!("CSV encoding {} requested; writing UTF-8 without BOM", opts.encoding);
    }

    if opts.include_header {
        let header: Vec<String> = result
            .columns
            .iter()
            .map(|c| escape_field(c, separator, quote))
            .collect();
        write_record(writer, &header, separator)?;
    }

    let limit = if opts.max_rows > 0 {
        opts.max_rows as usize
    } else {
        usize::MAX
    };

    let mut written = 0u64;
    for row in result.rows.iter().take(limit) {
        let record: Vec<String> = row
            .iter()
            .map(|cell| escape_field(&format_cell(cell, opts), separator, quote))
            .collect();
        write_record(writer, &record, separator)?;
        written += 1;
    }

    writer.flush()?;
    Ok(written)
}

fn format_cell(cell: &Cell, opts: &CsvOptions) -> String {
    cell.display(&opts.date_format)
        .unwrap_or_else(|| opts.null_value.clone())
}

fn escape_field(value: &str, separator: &str, quote: char) -> String {
    let needs_quoting = value.contains(separator)
        || value.contains(quote)
        || value.contains('\n')
        || value.contains('\r');
    if !needs_quoting {
        return value.to_string();
    }
    let doubled: String = value
        .chars()
        .flat_map(|c| {
            if c == quote {
                vec![c, c]
            } else {
                vec![c]
            }
        })
        .collect();
    format!("{}{}{}", quote, doubled, quote)
}

fn write_record(
    writer: &mut (dyn Write + Send),
    fields: &[String],
    separator: &str,
) -> Result<(), AppError> {
    writer.write_all(fields.join(separator).as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}
