pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod validation;

pub use error::AppError;
pub use services::{
    mask_credentials, AdapterFactory, ConnectionRegistry, DatabaseAdapter, EngineHandle,
    InMemoryRegistry, SchemaAwareAdapter, TypeMapper,
};
pub use validation::{SqlValidator, StatementKind};
