pub mod codec;
pub mod config;
pub mod ddl;
pub mod error;
pub mod handle;
pub mod locks;
pub mod query_builder;
pub mod registry;
pub mod schema;
pub mod service;
pub mod types;

// Re-export them for easier access from the crate root
pub use codec::{FieldValue, PhysicalRow, RawValue, Record, Row};
pub use config::*;
pub use error::*;
pub use handle::*;
pub use query_builder::Statement;
pub use registry::*;
pub use schema::*;
pub use service::*;
pub use types::*;
