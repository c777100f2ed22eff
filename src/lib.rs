//! Natural-language questions to ClickHouse SQL.
//!
//! A question is classified and rephrased, turned into SQL, executed, and
//! repaired from the database's error message up to a fixed bound before the
//! rows are summarized. See [`execution_loop::QueryOrchestrator`].

pub mod config;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod gateway;
pub mod llm;
pub mod prompts;
pub mod schema;

pub use config::AppConfig;
pub use envelope::{QueryEnvelope, QueryResult};
pub use error::{ErrorKind, NlqError, Result};
pub use execution_loop::QueryOrchestrator;
pub use gateway::{ExecutionGateway, Instruction, InstructionKind, ReasoningGateway};
pub use schema::{SchemaDescriptor, SchemaResolver, Session};
