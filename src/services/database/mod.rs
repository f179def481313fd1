// Database abstraction layer for multi-engine support
pub mod adapter;
pub mod clickhouse;
pub mod ddl;
pub mod dm;
pub mod handle;
pub mod kingbase;
pub mod mongodb;
pub mod mysql;
pub mod odbc;
pub mod oracle;
pub mod postgresql;
pub mod sqlite;

pub use adapter::{list_schemas, DatabaseAdapter, SchemaAwareAdapter};
pub use clickhouse::{ClickHouseAdapter, ClickHouseClient, MutationReport, MutationStatus};
pub use ddl::{PlannedStatement, QuoteStyle};
pub use dm::DmAdapter;
pub use handle::EngineHandle;
pub use kingbase::KingBaseAdapter;
pub use mongodb::MongoDbAdapter;
pub use mysql::MySqlAdapter;
pub use odbc::OdbcClient;
pub use oracle::OracleAdapter;
pub use postgresql::PostgresAdapter;
pub use sqlite::SqliteAdapter;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::EngineKind;
use std::str::FromStr;
use std::sync::Arc;

/// Engines with an adapter implementation.
pub const IMPLEMENTED_ENGINES: [EngineKind; 8] = [
    EngineKind::MySql,
    EngineKind::PostgreSql,
    EngineKind::Sqlite,
    EngineKind::Oracle,
    EngineKind::ClickHouse,
    EngineKind::KingBase,
    EngineKind::Dm,
    EngineKind::MongoDb,
];

/// Creates adapters for an immutable set of enabled engines.
///
/// Built once at startup and passed to whoever needs adapters.
#[derive(Debug, Clone)]
pub struct AdapterFactory {
    enabled: Vec<EngineKind>,
}

impl AdapterFactory {
    /// Factory for `engines`, kept in declaration order without duplicates.
    /// Engines without an implementation are dropped with a warning.
    pub fn new(engines: impl IntoIterator<Item = EngineKind>) -> Self {
        let requested: Vec<EngineKind> = engines.into_iter().collect();
        for kind in &requested {
            if !IMPLEMENTED_ENGINES.contains(kind) {
                tracing::warn!("No adapter is implemented for {}; ignoring it", kind);
            }
        }
        let enabled = EngineKind::ALL
            .iter()
            .copied()
            .filter(|kind| requested.contains(kind) && IMPLEMENTED_ENGINES.contains(kind))
            .collect();
        Self { enabled }
    }

    /// Every implemented engine.
    pub fn with_all() -> Self {
        Self::new(IMPLEMENTED_ENGINES)
    }

    /// Factory for `engines.enabled`. Unknown engine ids are a `Config` error.
    pub fn from_config(config: &AppConfig) -> Result<Self, AppError> {
        let engines = config
            .engines
            .enabled
            .iter()
            .map(|id| EngineKind::from_str(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(engines))
    }

    pub fn supported_engines(&self) -> Vec<EngineKind> {
        self.enabled.clone()
    }

    pub fn is_supported(&self, kind: EngineKind) -> bool {
        self.enabled.contains(&kind)
    }

    pub fn create_adapter(&self, kind: EngineKind) -> Result<Arc<dyn DatabaseAdapter>, AppError> {
        if !self.is_supported(kind) {
            return Err(AppError::Config(format!(
                "Unsupported database type: {}",
                kind
            )));
        }

        let adapter: Arc<dyn DatabaseAdapter> = match kind {
            EngineKind::MySql => Arc::new(MySqlAdapter::new()),
            EngineKind::PostgreSql => Arc::new(PostgresAdapter::new()),
            EngineKind::Sqlite => Arc::new(SqliteAdapter::new()),
            EngineKind::Oracle => Arc::new(OracleAdapter::new()),
            EngineKind::ClickHouse => Arc::new(ClickHouseAdapter::new()),
            EngineKind::KingBase => Arc::new(KingBaseAdapter::new()),
            EngineKind::Dm => Arc::new(DmAdapter::new()),
            EngineKind::MongoDb => Arc::new(MongoDbAdapter::new()),
            EngineKind::MsSql => {
                return Err(AppError::Config(format!(
                    "Unsupported database type: {}",
                    kind
                )))
            }
        };
        Ok(adapter)
    }
}

impl Default for AdapterFactory {
    fn default() -> Self {
        Self::with_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_all_lists_implemented_engines_in_order() {
        let factory = AdapterFactory::with_all();
        assert_eq!(factory.supported_engines(), IMPLEMENTED_ENGINES.to_vec());
        for kind in IMPLEMENTED_ENGINES {
            let adapter = factory.create_adapter(kind).unwrap();
            assert_eq!(adapter.engine(), kind);
        }
    }

    #[test]
    fn test_mssql_is_config_error() {
        let factory = AdapterFactory::new(EngineKind::ALL);
        assert!(!factory.is_supported(EngineKind::MsSql));
        let err = factory.create_adapter(EngineKind::MsSql).err().unwrap();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("mssql")));
    }

    #[test]
    fn test_disabled_engine_is_config_error() {
        let factory =
            AdapterFactory::new([EngineKind::Sqlite, EngineKind::MySql, EngineKind::Sqlite]);
        assert_eq!(
            factory.supported_engines(),
            vec![EngineKind::MySql, EngineKind::Sqlite]
        );
        assert!(matches!(
            factory.create_adapter(EngineKind::Oracle),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_schema_capability_only_on_schema_engines() {
        let factory = AdapterFactory::with_all();
        for kind in factory.supported_engines() {
            let adapter = factory.create_adapter(kind).unwrap();
            assert_eq!(adapter.as_schema_aware().is_some(), kind.supports_schemas());
        }
    }
}
