use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CsvOptions {
    pub include_header: bool,
    pub separator: String,
    pub quote: String,
    pub encoding: String,
    pub null_value: String,
    /// chrono format string for timestamp cells
    pub date_format: String,
    /// 0 means unlimited
    pub max_rows: u64,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            include_header: true,
            separator: ",".to_string(),
            quote: "\"".to_string(),
            encoding: "UTF-8".to_string(),
            null_value: "NULL".to_string(),
            date_format: "%Y-%m-%d %H:%M:%S".to_string(),
            max_rows: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqlOptions {
    pub include_create_table: bool,
    pub include_drop_table: bool,
    pub batch_insert: bool,
    pub batch_size: usize,
    pub structure_only: bool,
    /// 0 means unlimited
    pub max_rows: u64,
    /// Export the rows of this query instead of whole tables.
    pub query: Option<String>,
    /// Target table of the INSERTs generated for `query`.
    pub table_name: String,
}

impl Default for SqlOptions {
    fn default() -> Self {
        Self {
            include_create_table: true,
            include_drop_table: false,
            batch_insert: false,
            batch_size: 100,
            structure_only: false,
            max_rows: 0,
            query: None,
            table_name: "query_result".to_string(),
        }
    }
}

impl SqlOptions {
    pub fn custom_query(&self) -> Option<&str> {
        self.query.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size == 0 {
            100
        } else {
            self.batch_size
        }
    }

    pub fn effective_table_name(&self) -> &str {
        if self.table_name.trim().is_empty() {
            "query_result"
        } else {
            &self.table_name
        }
    }
}
