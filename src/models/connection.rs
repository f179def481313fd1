use crate::error::AppError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of engines the adapter layer knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    MySql,
    PostgreSql,
    Sqlite,
    MsSql,
    Oracle,
    ClickHouse,
    KingBase,
    Dm,
    MongoDb,
}

impl EngineKind {
    pub const ALL: [EngineKind; 9] = [
        EngineKind::MySql,
        EngineKind::PostgreSql,
        EngineKind::Sqlite,
        EngineKind::MsSql,
        EngineKind::Oracle,
        EngineKind::ClickHouse,
        EngineKind::KingBase,
        EngineKind::Dm,
        EngineKind::MongoDb,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::PostgreSql => "postgresql",
            EngineKind::Sqlite => "sqlite",
            EngineKind::MsSql => "mssql",
            EngineKind::Oracle => "oracle",
            EngineKind::ClickHouse => "clickhouse",
            EngineKind::KingBase => "kingbase",
            EngineKind::Dm => "dm",
            EngineKind::MongoDb => "mongodb",
        }
    }

    /// Port used when a descriptor leaves it at zero.
    pub fn default_port(&self) -> u16 {
        match self {
            EngineKind::MySql => 3306,
            EngineKind::PostgreSql => 5432,
            EngineKind::Sqlite => 0,
            EngineKind::MsSql => 1433,
            EngineKind::Oracle => 1521,
            EngineKind::ClickHouse => 8123,
            EngineKind::KingBase => 54321,
            EngineKind::Dm => 5236,
            EngineKind::MongoDb => 27017,
        }
    }

    /// Engines with a namespace level below the catalog.
    pub fn supports_schemas(&self) -> bool {
        matches!(self, EngineKind::PostgreSql | EngineKind::KingBase)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(EngineKind::MySql),
            "postgresql" | "postgres" | "pg" => Ok(EngineKind::PostgreSql),
            "sqlite" | "sqlite3" => Ok(EngineKind::Sqlite),
            "mssql" | "sqlserver" => Ok(EngineKind::MsSql),
            "oracle" => Ok(EngineKind::Oracle),
            "clickhouse" => Ok(EngineKind::ClickHouse),
            "kingbase" | "kingbasees" => Ok(EngineKind::KingBase),
            "dm" | "dameng" => Ok(EngineKind::Dm),
            "mongodb" | "mongo" => Ok(EngineKind::MongoDb),
            _ => Err(AppError::Config(format!("Unsupported database type: {}", s))),
        }
    }
}

/// Everything needed to open a live handle against one engine.
///
/// Adapters only read a descriptor. Callers that need another target catalog
/// derive a copy with [`ConnectionDescriptor::with_database`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub engine: EngineKind,
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

impl ConnectionDescriptor {
    pub fn new(engine: EngineKind, host: impl Into<String>, port: u16) -> Self {
        Self {
            engine,
            host: host.into(),
            port,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Copy of this descriptor pointed at another catalog.
    pub fn with_database(&self, database: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.database = database.into();
        copy
    }

    /// Non-empty parameter value.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.engine.default_port()
        } else {
            self.port
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("MySQL".parse::<EngineKind>().unwrap(), EngineKind::MySql);
        assert_eq!("postgres".parse::<EngineKind>().unwrap(), EngineKind::PostgreSql);
        assert_eq!("kingbase".parse::<EngineKind>().unwrap(), EngineKind::KingBase);
        assert_eq!("dameng".parse::<EngineKind>().unwrap(), EngineKind::Dm);
        assert!(matches!(
            "db2".parse::<EngineKind>(),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_engine_kind_round_trips_through_serde() {
        for kind in EngineKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
            let back: EngineKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_with_database_leaves_original_untouched() {
        let base = ConnectionDescriptor::new(EngineKind::MySql, "localhost", 3306)
            .with_credentials("root", "secret");
        let other = base.with_database("shop");
        assert_eq!(base.database, "");
        assert_eq!(other.database, "shop");
        assert_eq!(other.username, "root");
    }

    #[test]
    fn test_effective_port_and_params() {
        let desc = ConnectionDescriptor::new(EngineKind::KingBase, "kb", 0)
            .with_param("sslmode", "")
            .with_param("application_name", "dbm");
        assert_eq!(desc.effective_port(), 54321);
        assert_eq!(desc.param("sslmode"), None);
        assert_eq!(desc.param("application_name"), Some("dbm"));
    }
}
