use super::metadata::ColumnInfo;
use serde::{Deserialize, Serialize};

/// Ordered list of structural changes against one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlterTableRequest {
    pub database: String,
    /// Namespace for schema-aware engines; `public` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    pub actions: Vec<AlterTableAction>,
}

impl AlterTableRequest {
    pub fn new(database: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            schema: None,
            table: table.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: AlterTableAction) -> Self {
        self.actions.push(action);
        self
    }
}

/// One structural change. Each variant carries only what its tag needs.
///
/// Definitions are optional on the wire so a request missing one can be
/// rejected with a typed error instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum AlterTableAction {
    AddColumn {
        column: Option<ColumnDef>,
    },
    DropColumn {
        name: String,
    },
    ModifyColumn {
        column: Option<ColumnDef>,
    },
    RenameColumn {
        old_name: String,
        new_name: String,
        /// Full redefinition; required by dialects that retype on rename.
        #[serde(default)]
        column: Option<ColumnDef>,
    },
    AddIndex {
        index: Option<IndexDef>,
    },
    DropIndex {
        name: String,
    },
}

impl AlterTableAction {
    pub fn tag(&self) -> &'static str {
        match self {
            AlterTableAction::AddColumn { .. } => "ADD_COLUMN",
            AlterTableAction::DropColumn { .. } => "DROP_COLUMN",
            AlterTableAction::ModifyColumn { .. } => "MODIFY_COLUMN",
            AlterTableAction::RenameColumn { .. } => "RENAME_COLUMN",
            AlterTableAction::AddIndex { .. } => "ADD_INDEX",
            AlterTableAction::DropIndex { .. } => "DROP_INDEX",
        }
    }

    pub fn add_column(column: ColumnDef) -> Self {
        AlterTableAction::AddColumn {
            column: Some(column),
        }
    }

    pub fn modify_column(column: ColumnDef) -> Self {
        AlterTableAction::ModifyColumn {
            column: Some(column),
        }
    }

    pub fn drop_column(name: impl Into<String>) -> Self {
        AlterTableAction::DropColumn { name: name.into() }
    }

    pub fn rename_column(
        old_name: impl Into<String>,
        new_name: impl Into<String>,
        column: Option<ColumnDef>,
    ) -> Self {
        AlterTableAction::RenameColumn {
            old_name: old_name.into(),
            new_name: new_name.into(),
            column,
        }
    }

    pub fn add_index(index: IndexDef) -> Self {
        AlterTableAction::AddIndex { index: Some(index) }
    }

    pub fn drop_index(name: impl Into<String>) -> Self {
        AlterTableAction::DropIndex { name: name.into() }
    }
}

/// Column definition consumed by the DDL builders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub precision: u32,
    #[serde(default)]
    pub scale: u32,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Emit `default_value` verbatim instead of quoting it as a literal.
    #[serde(default)]
    pub default_is_expression: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            length: 0,
            precision: 0,
            scale: 0,
            nullable: true,
            default_value: None,
            default_is_expression: false,
            auto_increment: false,
            comment: None,
            after: None,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_precision(mut self, precision: u32, scale: u32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Default given as an SQL expression, e.g. `now()` or `'a'::text`.
    pub fn with_default_expression(mut self, expression: impl Into<String>) -> Self {
        self.default_value = Some(expression.into());
        self.default_is_expression = true;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn after(mut self, column: impl Into<String>) -> Self {
        self.after = Some(column.into());
        self
    }

    /// Definition that re-creates a described column on the same engine.
    ///
    /// The native type string already carries its own length suffix, so no
    /// length or precision is set. ClickHouse reports nullability inside the
    /// type; the `Nullable(...)` wrapper is lifted into `nullable`.
    pub fn from_column_info(info: &ColumnInfo) -> Self {
        let (column_type, nullable) = match unwrap_nullable(&info.column_type) {
            Some(inner) => (inner.to_string(), true),
            None => (info.column_type.clone(), info.nullable),
        };
        Self {
            name: info.name.clone(),
            column_type,
            length: 0,
            precision: 0,
            scale: 0,
            nullable,
            default_value: info.default_value.clone(),
            default_is_expression: info.default_is_expression,
            auto_increment: info.extra.to_lowercase().contains("auto_increment"),
            comment: Some(info.comment.clone()).filter(|c| !c.is_empty()),
            after: None,
        }
    }

    pub(crate) fn default_value(&self) -> Option<&str> {
        self.default_value.as_deref().filter(|v| !v.is_empty())
    }

    pub(crate) fn comment(&self) -> Option<&str> {
        self.comment.as_deref().filter(|c| !c.is_empty())
    }
}

/// Inner type of `Nullable(T)`.
pub(crate) fn unwrap_nullable(column_type: &str) -> Option<&str> {
    column_type
        .trim()
        .strip_prefix("Nullable(")
        .and_then(|rest| rest.strip_suffix(')'))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    /// Index method such as BTREE or HASH.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl IndexDef {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            method: None,
            comment: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn using(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// How an engine took a structural change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum AlterOutcome {
    /// Statements ran and the change is in effect.
    Applied { statements: Vec<String> },
    /// The engine accepted the change and is still propagating it to replicas.
    /// Completion has to be checked separately.
    #[serde(rename_all = "camelCase")]
    AcceptedPropagating {
        statements: Vec<String>,
        table_engine: String,
    },
}

impl AlterOutcome {
    pub fn statements(&self) -> &[String] {
        match self {
            AlterOutcome::Applied { statements }
            | AlterOutcome::AcceptedPropagating { statements, .. } => statements,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AlterOutcome::AcceptedPropagating { .. })
    }
}
