pub mod connection_registry; // Live handle cache keyed by connection id
pub mod database; // Per-engine adapters behind one contract
pub mod export; // CSV and SQL script writers
pub mod type_mapper;

pub use connection_registry::{mask_credentials, ConnectionRegistry, InMemoryRegistry};
pub use database::{
    AdapterFactory, DatabaseAdapter, EngineHandle, PlannedStatement, QuoteStyle,
    SchemaAwareAdapter, IMPLEMENTED_ENGINES,
};
pub use export::{write_csv, SqlScriptWriter};
pub use type_mapper::{TypeMapper, TypeMappingResult, TypeOption, TypeRule, TypeSummary};
