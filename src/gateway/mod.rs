//! Gateway contracts
//!
//! The orchestrator only ever talks to these two capability traits. The LLM
//! client and the ClickHouse engine implement them for production; tests
//! implement them directly with scripted doubles.

use crate::error::Result;
use crate::schema::SchemaDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstructionKind {
    Classify,
    Generate,
    Repair,
    Summarize,
}

impl fmt::Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionKind::Classify => write!(f, "classify"),
            InstructionKind::Generate => write!(f, "generate"),
            InstructionKind::Repair => write!(f, "repair"),
            InstructionKind::Summarize => write!(f, "summarize"),
        }
    }
}

/// One request to the reasoning service, with the parameters its task needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// Classify and rephrase the raw user question
    Classify { user_query: String },

    /// Produce SQL for the rephrased question
    Generate {
        rephrased_query: String,
        table_name: String,
        schema: SchemaDescriptor,
    },

    /// Fix SQL that failed with `error_message`
    Repair {
        error_message: String,
        original_sql: String,
        table_name: String,
        schema: SchemaDescriptor,
        rephrased_query: String,
    },

    /// Summarize the execution output for the user
    Summarize { user_query: String, sql_output: String },
}

impl Instruction {
    pub fn kind(&self) -> InstructionKind {
        match self {
            Instruction::Classify { .. } => InstructionKind::Classify,
            Instruction::Generate { .. } => InstructionKind::Generate,
            Instruction::Repair { .. } => InstructionKind::Repair,
            Instruction::Summarize { .. } => InstructionKind::Summarize,
        }
    }
}

/// Natural-language reasoning service (an LLM behind some transport).
///
/// `Classify` answers with a JSON object `{query_type, queries}`; every other
/// instruction answers with free text.
#[async_trait]
pub trait ReasoningGateway: Send + Sync {
    async fn complete(&self, instruction: &Instruction) -> Result<String>;
}

/// Database execution service.
///
/// `run` returns `Err` only when the service itself could not be reached.
/// Database-side failures come back as response text carrying
/// [`EXECUTION_ERROR_SENTINEL`](crate::execution::EXECUTION_ERROR_SENTINEL).
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Fails with `SchemaNotFound` if the table is unknown.
    async fn fetch_schema(&self, table_name: &str) -> Result<SchemaDescriptor>;

    async fn run(&self, table_name: &str, sql: &str) -> Result<String>;
}
