//! Schema Resolver
//!
//! Table selection and the per-session schema cache.

pub mod descriptor;
pub mod resolver;
pub mod session;

pub use descriptor::{ColumnDef, SchemaDescriptor};
pub use resolver::SchemaResolver;
pub use session::{Session, TableSelection};
