pub mod alter;
pub mod connection;
pub mod export;
pub mod metadata;
pub mod query;

pub use alter::*;
pub use connection::*;
pub use export::*;
pub use metadata::*;
pub use query::*;
