//! Execution Result - text protocol spoken by execution gateways
//!
//! A gateway answers every `run` with a single text payload:
//! - `Query executed successfully:\n\n<json>` on success
//! - `Query executed successfully, but returned no data.` for empty results
//! - `Error executing custom query: <message>` on failure

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Marks an execution response as failed, wherever it appears in the text.
pub const EXECUTION_ERROR_SENTINEL: &str = "Error executing custom query:";

pub const SUCCESS_PREFIX: &str = "Query executed successfully:";

pub const NO_DATA_MESSAGE: &str = "Query executed successfully, but returned no data.";

/// Rows returned by a successful execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Response text exactly as the gateway produced it
    pub raw: String,

    /// Column names, when the payload carried a parseable JSON document
    pub columns: Vec<String>,

    /// Row objects, when the payload carried a parseable JSON document
    pub rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct PayloadColumn {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    columns: Vec<PayloadColumn>,
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

impl RowSet {
    /// Parse the JSON document following the first blank line. Responses
    /// without one (or with malformed JSON) keep only the raw text.
    pub fn from_response(text: &str) -> Self {
        let parsed = text
            .split_once("\n\n")
            .and_then(|(_, body)| serde_json::from_str::<Payload>(body.trim()).ok());

        match parsed {
            Some(payload) => Self {
                raw: text.to_string(),
                columns: payload.columns.into_iter().map(|c| c.name).collect(),
                rows: payload.rows,
            },
            None => Self {
                raw: text.to_string(),
                columns: Vec::new(),
                rows: Vec::new(),
            },
        }
    }

    /// Build the success payload for a set of columns and rows.
    pub fn to_response(columns: &[(String, String)], rows: &[Map<String, Value>]) -> String {
        if rows.is_empty() {
            return NO_DATA_MESSAGE.to_string();
        }
        let body = serde_json::json!({
            "columns": columns
                .iter()
                .map(|(name, ty)| serde_json::json!({ "name": name, "type": ty }))
                .collect::<Vec<_>>(),
            "rows": rows,
        });
        let formatted = serde_json::to_string_pretty(&body).unwrap_or_default();
        format!("{}\n\n{}", SUCCESS_PREFIX, formatted)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Classified result of a single `run` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "payload", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows(RowSet),
    ExecutionError(String),
}

impl ExecutionOutcome {
    /// Any response containing the sentinel is a failure, even if rows were
    /// also present in the same payload.
    pub fn from_response(text: &str) -> Self {
        match text.split_once(EXECUTION_ERROR_SENTINEL) {
            Some((_, message)) => ExecutionOutcome::ExecutionError(message.trim().to_string()),
            None => ExecutionOutcome::Rows(RowSet::from_response(text)),
        }
    }

    /// Format a database-side failure in the gateway protocol.
    pub fn error_response(message: &str) -> String {
        format!("{} {}", EXECUTION_ERROR_SENTINEL, message)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionOutcome::ExecutionError(_))
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            ExecutionOutcome::ExecutionError(msg) => Some(msg),
            ExecutionOutcome::Rows(_) => None,
        }
    }
}
