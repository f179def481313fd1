use crate::models::EngineKind;
use thiserror::Error;

/// Error taxonomy shared by every adapter.
///
/// `Config` and `Validation` are raised before any I/O is attempted.
/// `Unsupported` is a named condition callers can branch on; it is never
/// folded into a generic engine failure.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{engine} does not support {operation}: {hint}")]
    Unsupported {
        engine: EngineKind,
        operation: String,
        hint: String,
    },

    #[error("{engine} connection error: {message}")]
    Connection { engine: EngineKind, message: String },

    #[error("{engine} error: {message}")]
    Database { engine: EngineKind, message: String },

    #[error("Alter action #{index} ({action}) failed: {source}")]
    AlterAction {
        index: usize,
        action: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("Type mapping error: {0}")]
    TypeMapping(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn database(engine: EngineKind, message: impl Into<String>) -> Self {
        AppError::Database {
            engine,
            message: message.into(),
        }
    }

    pub fn connection(engine: EngineKind, message: impl Into<String>) -> Self {
        AppError::Connection {
            engine,
            message: message.into(),
        }
    }

    pub fn unsupported(
        engine: EngineKind,
        operation: impl Into<String>,
        hint: impl Into<String>,
    ) -> Self {
        AppError::Unsupported {
            engine,
            operation: operation.into(),
            hint: hint.into(),
        }
    }

    /// Wrap the failure of one action inside a multi-action alter request.
    pub fn alter_action(index: usize, action: impl Into<String>, source: AppError) -> Self {
        AppError::AlterAction {
            index,
            action: action.into(),
            source: Box::new(source),
        }
    }

    /// True for `Unsupported`, including when wrapped by a failing alter action.
    pub fn is_unsupported(&self) -> bool {
        match self {
            AppError::Unsupported { .. } => true,
            AppError::AlterAction { source, .. } => source.is_unsupported(),
            _ => false,
        }
    }

    pub fn is_validation(&self) -> bool {
        match self {
            AppError::Validation(_) => true,
            AppError::AlterAction { source, .. } => source.is_validation(),
            _ => false,
        }
    }

    /// Engine this error was raised against, when known.
    pub fn engine(&self) -> Option<EngineKind> {
        match self {
            AppError::Unsupported { engine, .. }
            | AppError::Connection { engine, .. }
            | AppError::Database { engine, .. } => Some(*engine),
            AppError::AlterAction { source, .. } => source.engine(),
            _ => None,
        }
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::database(EngineKind::Sqlite, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_message_names_engine_and_hint() {
        let err = AppError::unsupported(
            EngineKind::ClickHouse,
            "ADD_INDEX",
            "use ORDER BY or PRIMARY KEY instead",
        );
        let msg = err.to_string();
        assert!(msg.starts_with("clickhouse does not support ADD_INDEX"));
        assert!(msg.contains("ORDER BY or PRIMARY KEY"));
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_alter_action_wraps_source() {
        let inner = AppError::Validation("column definition is required".to_string());
        let err = AppError::alter_action(2, "MODIFY_COLUMN", inner);
        assert!(err.is_validation());
        assert!(!err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "Alter action #2 (MODIFY_COLUMN) failed: Validation error: column definition is required"
        );
    }

    #[test]
    fn test_engine_context() {
        let err = AppError::database(EngineKind::MySql, "Table 'x' doesn't exist");
        assert_eq!(err.engine(), Some(EngineKind::MySql));
        assert!(AppError::Internal("x".into()).engine().is_none());
    }
}
