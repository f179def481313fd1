// Result-set serializers behind the export operations
pub mod csv;
pub mod sql;

pub use csv::write_csv;
pub use sql::{format_literal, SqlScriptWriter};
