use crate::error::AppError;
use crate::models::{ConnectionDescriptor, EngineKind};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Engines enabled when configuration names none. `mssql` has no adapter.
pub const DEFAULT_ENGINES: [&str; 8] = [
    "mysql",
    "postgresql",
    "sqlite",
    "oracle",
    "clickhouse",
    "kingbase",
    "dm",
    "mongodb",
];

const BUNDLED_TYPE_MAPPING: &str = "configs/type_mapping.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub engines: EnginesConfig,
    #[serde(default)]
    pub type_mapping: TypeMappingConfig,
    #[serde(default)]
    pub probe: Option<ProbeConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub style: String,
}

/// Engines the adapter factory registers.
#[derive(Debug, Clone, Deserialize)]
pub struct EnginesConfig {
    pub enabled: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TypeMappingConfig {
    /// Explicit rule table; the home and bundled tables are tried otherwise.
    pub path: Option<String>,
}

/// Target for the `dbm-probe` binary.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    pub engine: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ProbeConfig {
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, AppError> {
        let engine = EngineKind::from_str(&self.engine)?;
        let mut descriptor = ConnectionDescriptor::new(engine, self.host.clone(), self.port)
            .with_credentials(self.username.clone(), self.password.clone())
            .with_database(self.database.clone());
        descriptor.params = self.params.clone();
        Ok(descriptor)
    }
}

impl AppConfig {
    /// Defaults, then an optional `dbm.yaml`/`dbm.toml` in the working
    /// directory, then `DBM_*` variables (`DBM_PROBE__HOST`, comma-separated
    /// `DBM_ENGINES__ENABLED`). `.env` is loaded first.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.style", "auto")?
            .set_default("engines.enabled", DEFAULT_ENGINES.to_vec())?
            .add_source(config::File::with_name("dbm").required(false))
            .add_source(
                config::Environment::with_prefix("DBM")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("engines.enabled")
                    .try_parsing(true),
            );

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        if let Ok(log_style) = env::var("RUST_LOG_STYLE") {
            builder = builder.set_override("logging.style", log_style)?;
        }

        if let Ok(path) = env::var("DBM_TYPE_MAPPING") {
            builder = builder.set_override("type_mapping.path", path)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Rule-table locations in lookup order.
    pub fn type_mapping_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = self.type_mapping.path.as_deref().filter(|p| !p.is_empty()) {
            candidates.push(PathBuf::from(path));
        }
        if let Ok(home) = env::var("HOME") {
            candidates.push(PathBuf::from(home).join(".dbm").join("type_mapping.yaml"));
        }
        candidates.push(PathBuf::from(BUNDLED_TYPE_MAPPING));
        candidates
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                style: "auto".to_string(),
            },
            engines: EnginesConfig {
                enabled: DEFAULT_ENGINES.iter().map(|e| e.to_string()).collect(),
            },
            type_mapping: TypeMappingConfig::default(),
            probe: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        // Clear environment variables for this test
        env::remove_var("DBM_ENGINES__ENABLED");
        env::remove_var("DBM_TYPE_MAPPING");
        env::remove_var("RUST_LOG");

        let config = AppConfig::from_env();
        assert!(config.is_ok());

        let config = config.unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engines.enabled.len(), DEFAULT_ENGINES.len());
        assert!(!config.engines.enabled.iter().any(|e| e == "mssql"));
    }

    #[test]
    fn test_type_mapping_candidates_start_with_explicit_path() {
        let mut config = AppConfig::default();
        config.type_mapping.path = Some("/etc/dbm/rules.yaml".to_string());
        let candidates = config.type_mapping_candidates();
        assert_eq!(candidates[0], PathBuf::from("/etc/dbm/rules.yaml"));
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from(BUNDLED_TYPE_MAPPING)
        );
    }

    #[test]
    fn test_probe_descriptor() {
        let probe = ProbeConfig {
            engine: "pg".to_string(),
            host: "db.local".to_string(),
            port: 0,
            username: "app".to_string(),
            password: "secret".to_string(),
            database: "shop".to_string(),
            params: BTreeMap::from([("sslmode".to_string(), "require".to_string())]),
        };
        let desc = probe.descriptor().unwrap();
        assert_eq!(desc.engine, EngineKind::PostgreSql);
        assert_eq!(desc.effective_port(), 5432);
        assert_eq!(desc.param("sslmode"), Some("require"));

        let bad = ProbeConfig {
            engine: "db2".to_string(),
            ..probe
        };
        assert!(matches!(bad.descriptor(), Err(AppError::Config(_))));
    }
}
