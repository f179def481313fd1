// Live engine clients handed to adapters on every call
use crate::error::AppError;
use crate::services::database::clickhouse::ClickHouseClient;
use crate::services::database::odbc::OdbcClient;
use rusqlite::Connection;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Opaque live connection, owned by the registry and borrowed per call.
///
/// Every variant is cheap to clone and shares the underlying client.
#[derive(Clone)]
pub enum EngineHandle {
    MySql(mysql_async::Pool),
    /// PostgreSQL and KingBase
    Postgres(deadpool_postgres::Pool),
    Sqlite(Arc<Mutex<Connection>>),
    ClickHouse(ClickHouseClient),
    /// Oracle and DM
    Odbc(OdbcClient),
    MongoDb(mongodb::Client),
}

impl EngineHandle {
    pub fn family(&self) -> &'static str {
        match self {
            EngineHandle::MySql(_) => "mysql",
            EngineHandle::Postgres(_) => "postgres",
            EngineHandle::Sqlite(_) => "sqlite",
            EngineHandle::ClickHouse(_) => "clickhouse",
            EngineHandle::Odbc(_) => "odbc",
            EngineHandle::MongoDb(_) => "mongodb",
        }
    }

    fn wrong_family(&self, expected: &str) -> AppError {
        AppError::Config(format!(
            "Expected a {} handle, got a {} handle",
            expected,
            self.family()
        ))
    }

    pub fn mysql(&self) -> Result<&mysql_async::Pool, AppError> {
        match self {
            EngineHandle::MySql(pool) => Ok(pool),
            other => Err(other.wrong_family("mysql")),
        }
    }

    pub fn postgres(&self) -> Result<&deadpool_postgres::Pool, AppError> {
        match self {
            EngineHandle::Postgres(pool) => Ok(pool),
            other => Err(other.wrong_family("postgres")),
        }
    }

    pub fn sqlite(&self) -> Result<&Arc<Mutex<Connection>>, AppError> {
        match self {
            EngineHandle::Sqlite(conn) => Ok(conn),
            other => Err(other.wrong_family("sqlite")),
        }
    }

    pub fn clickhouse(&self) -> Result<&ClickHouseClient, AppError> {
        match self {
            EngineHandle::ClickHouse(client) => Ok(client),
            other => Err(other.wrong_family("clickhouse")),
        }
    }

    pub fn odbc(&self) -> Result<&OdbcClient, AppError> {
        match self {
            EngineHandle::Odbc(client) => Ok(client),
            other => Err(other.wrong_family("odbc")),
        }
    }

    pub fn mongodb(&self) -> Result<&mongodb::Client, AppError> {
        match self {
            EngineHandle::MongoDb(client) => Ok(client),
            other => Err(other.wrong_family("mongodb")),
        }
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineHandle({})", self.family())
    }
}
