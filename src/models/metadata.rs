use serde::{Deserialize, Serialize};

/// Kind of a listed relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    #[serde(rename = "BASE TABLE")]
    BaseTable,
    #[serde(rename = "VIEW")]
    View,
    #[serde(rename = "COLLECTION")]
    Collection,
}

/// One table, view or collection.
///
/// `rows` and `size` come from each engine's statistics catalog and are
/// estimates, not transactional counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub name: String,
    pub database: String,
    #[serde(default)]
    pub schema: String,
    #[serde(rename = "tableType")]
    pub kind: TableKind,
    #[serde(default)]
    pub rows: i64,
    #[serde(default)]
    pub size: i64,
    #[serde(default)]
    pub comment: String,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, database: impl Into<String>, kind: TableKind) -> Self {
        Self {
            name: name.into(),
            database: database.into(),
            schema: String::new(),
            kind,
            rows: 0,
            size: 0,
            comment: String::new(),
        }
    }
}

/// Best-effort key role of a column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyRole {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "PRI")]
    Primary,
    #[serde(rename = "UNI")]
    Unique,
    #[serde(rename = "MUL")]
    Multiple,
}

impl KeyRole {
    /// Parse the MySQL-style `COLUMN_KEY` tag.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_uppercase().as_str() {
            "PRI" => KeyRole::Primary,
            "UNI" => KeyRole::Unique,
            "MUL" => KeyRole::Multiple,
            _ => KeyRole::None,
        }
    }
}

/// A column as the engine reports it.
///
/// `column_type` is the engine-native type string, kept verbatim so it can be
/// fed back to the same engine without loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub nullable: bool,
    #[serde(default)]
    pub default_value: Option<String>,
    /// The default is an engine expression (`'x'::text`, `nextval(..)`)
    /// rather than a bare value.
    #[serde(default)]
    pub default_is_expression: bool,
    #[serde(default)]
    pub key: KeyRole,
    #[serde(default)]
    pub extra: String,
    #[serde(default)]
    pub comment: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable,
            default_value: None,
            default_is_expression: false,
            key: KeyRole::None,
            extra: String::new(),
            comment: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutineKind {
    Procedure,
    Function,
}

impl RoutineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineKind::Procedure => "PROCEDURE",
            RoutineKind::Function => "FUNCTION",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_uppercase().as_str() {
            "PROCEDURE" => Some(RoutineKind::Procedure),
            "FUNCTION" => Some(RoutineKind::Function),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutineInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoutineKind,
    pub database: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub comment: String,
}

/// Full description of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub database: String,
    #[serde(default)]
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    pub fn primary_key(&self) -> Option<&IndexInfo> {
        self.indexes.iter().find(|idx| idx.primary)
    }
}

/// Groups one-row-per-column catalog output into indexes.
///
/// Indexes keep the order in which they were first seen and each index keeps
/// its columns in scan order. Composite index semantics depend on that order.
#[derive(Debug, Default)]
pub struct IndexCollector {
    indexes: Vec<IndexInfo>,
}

impl IndexCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one catalog row. The first row seen for an index fixes its flags.
    pub fn push(
        &mut self,
        index_name: &str,
        column: Option<&str>,
        unique: bool,
        primary: bool,
        method: Option<&str>,
    ) {
        let position = match self.indexes.iter().position(|idx| idx.name == index_name) {
            Some(pos) => pos,
            None => {
                self.indexes.push(IndexInfo {
                    name: index_name.to_string(),
                    columns: Vec::new(),
                    unique,
                    primary,
                    method: method.filter(|m| !m.is_empty()).map(str::to_string),
                    comment: String::new(),
                });
                self.indexes.len() - 1
            }
        };

        if let Some(col) = column.filter(|c| !c.is_empty()) {
            self.indexes[position].columns.push(col.to_string());
        }
    }

    pub fn set_comment(&mut self, index_name: &str, comment: &str) {
        if let Some(idx) = self.indexes.iter_mut().find(|idx| idx.name == index_name) {
            idx.comment = comment.to_string();
        }
    }

    /// Finished index list. Indexes that resolved no columns are logged and dropped.
    pub fn finish(self, table: &str) -> Vec<IndexInfo> {
        self.indexes
            .into_iter()
            .filter(|idx| {
                if idx.columns.is_empty() {
                    tracing::warn!(
                        "Index {} on {} resolved no columns; omitting it",
                        idx.name,
                        table
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_collector_preserves_scan_order() {
        let mut collector = IndexCollector::new();
        collector.push("idx_name_age", Some("name"), false, false, Some("BTREE"));
        collector.push("PRIMARY", Some("id"), true, true, Some("BTREE"));
        collector.push("idx_name_age", Some("age"), false, false, Some("BTREE"));
        collector.push("idx_name_age", Some("city"), false, false, Some("BTREE"));

        let indexes = collector.finish("users");
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "idx_name_age");
        assert_eq!(indexes[0].columns, vec!["name", "age", "city"]);
        assert_eq!(indexes[0].method.as_deref(), Some("BTREE"));
        assert!(indexes[1].primary);
    }

    #[test]
    fn test_index_collector_drops_empty_indexes() {
        let mut collector = IndexCollector::new();
        collector.push("idx_expr", None, false, false, None);
        collector.push("idx_ok", Some("a"), true, false, None);
        let indexes = collector.finish("t");
        assert_eq!(indexes.len(), 1);
        assert_eq!(indexes[0].name, "idx_ok");
    }

    #[test]
    fn test_key_role_serialization() {
        let mut col = ColumnInfo::new("id", "int(11)", false);
        col.key = KeyRole::from_tag("pri");
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["key"], "PRI");
        assert_eq!(json["type"], "int(11)");
        assert_eq!(json["defaultValue"], serde_json::Value::Null);
    }

    #[test]
    fn test_table_kind_wire_names() {
        let info = TableInfo::new("users", "shop", TableKind::BaseTable);
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["tableType"], "BASE TABLE");
    }
}
