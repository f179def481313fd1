// Cross-engine column type mapping driven by a YAML rule table
use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{ColumnInfo, EngineKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// One selectable target type for a rule that needs a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeOption {
    pub label: String,
    pub value: String,
}

/// How one source type maps onto a target engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TypeRule {
    #[serde(alias = "target_type")]
    pub target_type: String,
    #[serde(alias = "safe_fallback")]
    pub safe_fallback: String,
    #[serde(alias = "precision_loss")]
    pub precision_loss: bool,
    #[serde(alias = "requires_user")]
    pub requires_user: bool,
    #[serde(alias = "user_options")]
    pub user_options: Vec<TypeOption>,
    pub note: String,
}

impl TypeRule {
    pub fn accepts(&self, choice: &str) -> bool {
        self.user_options.iter().any(|opt| opt.value == choice)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeSummary {
    pub total: usize,
    pub direct: usize,
    pub fallback: usize,
    pub user_choice: usize,
    pub lossy_count: usize,
}

/// Outcome of mapping one column list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMappingResult {
    pub success: bool,
    /// Source type to target type, in first-seen order.
    pub mapped: IndexMap<String, String>,
    pub warnings: Vec<String>,
    /// Source types still waiting for a decision.
    pub requires_user: IndexMap<String, TypeRule>,
    pub summary: TypeSummary,
    #[serde(skip)]
    pending_columns: HashMap<String, usize>,
}

impl TypeMappingResult {
    fn new(total: usize) -> Self {
        Self {
            success: true,
            mapped: IndexMap::new(),
            warnings: Vec::new(),
            requires_user: IndexMap::new(),
            summary: TypeSummary {
                total,
                ..TypeSummary::default()
            },
            pending_columns: HashMap::new(),
        }
    }

    pub fn target_for(&self, source_type: &str) -> Option<&str> {
        self.mapped.get(source_type).map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RuleTable {
    #[serde(default, alias = "typeMappings")]
    type_mappings: BTreeMap<String, BTreeMap<String, TypeRule>>,
}

/// Rule lookup keyed by `"<source>_to_<target>"` engine ids.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    mappings: BTreeMap<String, BTreeMap<String, TypeRule>>,
}

fn mapping_key(source: EngineKind, target: EngineKind) -> String {
    format!("{}_to_{}", source, target)
}

/// Upper-cased type with every parenthesised part removed, keeping trailing
/// modifiers: `varchar(255)` -> `VARCHAR`, `int(10) unsigned` -> `INT UNSIGNED`.
fn base_type(native: &str) -> String {
    let mut out = String::with_capacity(native.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in native.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') if depth > 0 => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, c) if depth == 0 => out.push(c),
            (None, _) => {}
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

impl TypeMapper {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, AppError> {
        let table: RuleTable = serde_yaml::from_str(yaml).map_err(|e| {
            AppError::TypeMapping(format!("Failed to parse type mapping config: {}", e))
        })?;
        Ok(Self {
            mappings: table.type_mappings,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            AppError::TypeMapping(format!(
                "Failed to read type mapping config {}: {}",
                path.display(),
                e
            ))
        })?;
        let mapper = Self::from_yaml_str(&yaml)?;
        tracing::info!(
            "Loaded {} type mapping tables from {}",
            mapper.mappings.len(),
            path.display()
        );
        Ok(mapper)
    }

    /// First existing table among the configured path, `~/.dbm/type_mapping.yaml`
    /// and the bundled `configs/type_mapping.yaml`.
    pub fn load_default(config: &AppConfig) -> Result<Self, AppError> {
        let candidates = config.type_mapping_candidates();
        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Self::from_path(path),
            None => Err(AppError::TypeMapping(format!(
                "No type mapping config found (tried {})",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    /// Add or replace one rule.
    pub fn with_rule(
        mut self,
        source: EngineKind,
        target: EngineKind,
        source_type: impl Into<String>,
        rule: TypeRule,
    ) -> Self {
        self.mappings
            .entry(mapping_key(source, target))
            .or_default()
            .insert(source_type.into(), rule);
        self
    }

    pub fn has_mapping(&self, source: EngineKind, target: EngineKind) -> bool {
        self.mappings.contains_key(&mapping_key(source, target))
    }

    fn rule_for<'a>(
        table: &'a BTreeMap<String, TypeRule>,
        native: &str,
    ) -> Option<&'a TypeRule> {
        let base = base_type(native);
        table
            .get(native)
            .or_else(|| table.get(&base))
            .or_else(|| {
                // unknown modifiers fall back to the bare type name
                let name = base.split_whitespace().next()?;
                table.get(name)
            })
    }

    /// Map every column's native type from `source` to `target`.
    pub fn map_types(
        &self,
        source: EngineKind,
        target: EngineKind,
        columns: &[ColumnInfo],
    ) -> TypeMappingResult {
        let mut result = TypeMappingResult::new(columns.len());

        let table = match self.mappings.get(&mapping_key(source, target)) {
            Some(table) => table,
            None => {
                tracing::debug!(
                    "No type mapping for {} -> {}; passing types through",
                    source,
                    target
                );
                for col in columns {
                    result
                        .mapped
                        .insert(col.column_type.clone(), col.column_type.clone());
                }
                result.summary.direct = columns.len();
                return result;
            }
        };

        for col in columns {
            let native = col.column_type.as_str();
            match Self::rule_for(table, native) {
                None => {
                    result.mapped.insert(native.to_string(), native.to_string());
                    result.summary.direct += 1;
                }
                Some(rule) if rule.requires_user => {
                    result.requires_user.insert(native.to_string(), rule.clone());
                    *result.pending_columns.entry(native.to_string()).or_insert(0) += 1;
                    result.mapped.insert(native.to_string(), rule.target_type.clone());
                    result.summary.user_choice += 1;
                }
                Some(rule) if rule.precision_loss => {
                    result
                        .mapped
                        .insert(native.to_string(), rule.safe_fallback.clone());
                    result.summary.fallback += 1;
                    result.summary.lossy_count += 1;
                    result.warnings.push(format!(
                        "{} → {} (precision loss)",
                        native, rule.safe_fallback
                    ));
                }
                Some(rule) => {
                    result.mapped.insert(native.to_string(), rule.target_type.clone());
                    result.summary.direct += 1;
                }
            }
        }

        result
    }

    /// Commit user decisions for pending source types.
    ///
    /// Every choice is validated before any is applied: one invalid choice
    /// rejects the whole call and leaves `result` untouched. Choices for types
    /// that are not pending are ignored.
    pub fn apply_user_choices(
        &self,
        result: &mut TypeMappingResult,
        choices: &BTreeMap<String, String>,
    ) -> Result<(), AppError> {
        for (source_type, choice) in choices {
            if let Some(rule) = result.requires_user.get(source_type) {
                if !rule.accepts(choice) {
                    return Err(AppError::TypeMapping(format!(
                        "invalid choice for type {}: {}",
                        source_type, choice
                    )));
                }
            }
        }

        for (source_type, choice) in choices {
            if result.requires_user.shift_remove(source_type).is_none() {
                continue;
            }
            let columns = result.pending_columns.remove(source_type).unwrap_or(1);
            result.mapped.insert(source_type.clone(), choice.clone());
            result.summary.user_choice = result.summary.user_choice.saturating_sub(columns);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> ColumnInfo {
        ColumnInfo::new(name, ty, true)
    }

    fn enum_rule() -> TypeRule {
        TypeRule {
            target_type: "TEXT".to_string(),
            requires_user: true,
            user_options: vec![
                TypeOption {
                    label: "Convert to TEXT".to_string(),
                    value: "TEXT".to_string(),
                },
                TypeOption {
                    label: "Convert to VARCHAR(255)".to_string(),
                    value: "VARCHAR(255)".to_string(),
                },
            ],
            ..TypeRule::default()
        }
    }

    fn mapper() -> TypeMapper {
        TypeMapper::default()
            .with_rule(
                EngineKind::MySql,
                EngineKind::PostgreSql,
                "VARCHAR",
                TypeRule {
                    target_type: "VARCHAR".to_string(),
                    ..TypeRule::default()
                },
            )
            .with_rule(
                EngineKind::MySql,
                EngineKind::PostgreSql,
                "TINYINT",
                TypeRule {
                    target_type: "SMALLINT".to_string(),
                    safe_fallback: "INTEGER".to_string(),
                    precision_loss: true,
                    ..TypeRule::default()
                },
            )
            .with_rule(EngineKind::MySql, EngineKind::PostgreSql, "ENUM", enum_rule())
    }

    #[test]
    fn test_direct_mapping() {
        let result = mapper().map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("name", "VARCHAR"), col("age", "INT")],
        );
        assert!(result.success);
        assert_eq!(result.summary.direct, 2);
        assert_eq!(result.target_for("INT"), Some("INT"));
    }

    #[test]
    fn test_lossy_rule_uses_safe_fallback() {
        let result = mapper().map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("count", "TINYINT")],
        );
        assert_eq!(result.target_for("TINYINT"), Some("INTEGER"));
        assert_eq!(result.summary.fallback, 1);
        assert_eq!(result.summary.lossy_count, 1);
        assert_eq!(result.warnings, vec!["TINYINT → INTEGER (precision loss)"]);
    }

    #[test]
    fn test_suffixed_type_matches_base_rule() {
        let result = mapper().map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("flag", "tinyint(1)")],
        );
        assert_eq!(result.target_for("tinyint(1)"), Some("INTEGER"));
    }

    #[test]
    fn test_base_type_keeps_modifiers() {
        assert_eq!(base_type("varchar(255)"), "VARCHAR");
        assert_eq!(base_type("int(10) unsigned"), "INT UNSIGNED");
        assert_eq!(base_type("decimal(10, 2)  unsigned zerofill"), "DECIMAL UNSIGNED ZEROFILL");
        assert_eq!(base_type("enum('a)', 'b')"), "ENUM");
    }

    #[test]
    fn test_unknown_modifier_falls_back_to_type_name() {
        let result = mapper().map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("flag", "tinyint(3) zerofill")],
        );
        assert_eq!(result.target_for("tinyint(3) zerofill"), Some("INTEGER"));
    }

    #[test]
    fn test_missing_pair_passes_through() {
        let result = mapper().map_types(
            EngineKind::Sqlite,
            EngineKind::MySql,
            &[col("a", "TEXT"), col("b", "BLOB")],
        );
        assert_eq!(result.summary.direct, 2);
        assert_eq!(result.target_for("BLOB"), Some("BLOB"));
    }

    #[test]
    fn test_user_choice_pending_then_applied() {
        let mapper = mapper();
        let mut result = mapper.map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("status", "ENUM")],
        );
        assert_eq!(result.summary.user_choice, 1);
        assert_eq!(result.target_for("ENUM"), Some("TEXT"));

        let choices = BTreeMap::from([
            ("ENUM".to_string(), "VARCHAR(255)".to_string()),
            ("JSON".to_string(), "whatever".to_string()),
        ]);
        mapper.apply_user_choices(&mut result, &choices).unwrap();
        assert_eq!(result.target_for("ENUM"), Some("VARCHAR(255)"));
        assert_eq!(result.summary.user_choice, 0);
        assert!(result.requires_user.is_empty());
    }

    #[test]
    fn test_invalid_choice_rejects_whole_call() {
        let mapper = mapper().with_rule(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            "SET",
            enum_rule(),
        );
        let mut result = mapper.map_types(
            EngineKind::MySql,
            EngineKind::PostgreSql,
            &[col("status", "ENUM"), col("tags", "SET")],
        );
        let choices = BTreeMap::from([
            ("ENUM".to_string(), "TEXT".to_string()),
            ("SET".to_string(), "INVALID_TYPE".to_string()),
        ]);
        let err = mapper.apply_user_choices(&mut result, &choices).unwrap_err();
        assert!(matches!(
            err,
            AppError::TypeMapping(ref m) if m.contains("SET") && m.contains("INVALID_TYPE")
        ));
        assert_eq!(result.summary.user_choice, 2);
        assert_eq!(result.requires_user.len(), 2);
    }

    #[test]
    fn test_yaml_rules() {
        let yaml = r#"
type_mappings:
  mysql_to_clickhouse:
    DATETIME:
      target_type: DateTime
    DECIMAL:
      targetType: Decimal(38, 10)
      safeFallback: String
      precisionLoss: true
      note: wide decimals overflow
"#;
        let mapper = TypeMapper::from_yaml_str(yaml).unwrap();
        assert!(mapper.has_mapping(EngineKind::MySql, EngineKind::ClickHouse));
        let result = mapper.map_types(
            EngineKind::MySql,
            EngineKind::ClickHouse,
            &[col("at", "DATETIME"), col("amount", "decimal(65,30)")],
        );
        assert_eq!(result.target_for("DATETIME"), Some("DateTime"));
        assert_eq!(result.target_for("decimal(65,30)"), Some("String"));

        assert!(matches!(
            TypeMapper::from_yaml_str("type_mappings: [1, 2"),
            Err(AppError::TypeMapping(_))
        ));
    }
}
