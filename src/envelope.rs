//! Response envelope
//!
//! The structured result of one `process()` call, success or failure, and
//! the pure assembly of it from a finished [`QueryMachine`].

use crate::error::{ErrorKind, NlqError};
use crate::execution::{ExecutionOutcome, RowSet};
use crate::execution_loop::{QueryMachine, QueryState};
use serde::{Serialize, Serializer};
use std::fmt::Write;

pub const ALL_ATTEMPTS_FAILED_MESSAGE: &str =
    "All query correction attempts failed. Please try rephrasing your question.";

/// One execution of one SQL statement. Never modified once recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAttempt {
    pub sql: String,
    pub outcome: ExecutionOutcome,
}

impl QueryAttempt {
    pub fn new(sql: String, outcome: ExecutionOutcome) -> Self {
        Self { sql, outcome }
    }

    pub fn succeeded(&self) -> bool {
        !self.outcome.is_error()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.outcome.error_message()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(RowSet),
    Failure(String),
}

/// Envelope for a question that reached execution.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub user_query: String,
    pub rephrased_query: String,
    pub selected_table: String,
    pub original_sql: String,
    pub attempts: Vec<QueryAttempt>,
    pub result: QueryOutput,
    /// Present iff `result` holds rows.
    pub summary: Option<String>,
}

impl QueryResult {
    /// Last SQL that was executed.
    pub fn final_sql(&self) -> &str {
        self.attempts
            .last()
            .map(|a| a.sql.as_str())
            .unwrap_or(&self.original_sql)
    }

    pub fn error_messages(&self) -> Vec<&str> {
        self.attempts.iter().filter_map(|a| a.error_message()).collect()
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, QueryOutput::Rows(_))
    }

    /// At least one repair cycle ran.
    pub fn was_repaired(&self) -> bool {
        self.attempts.len() > 1
    }

    pub fn rows(&self) -> Option<&RowSet> {
        match &self.result {
            QueryOutput::Rows(rows) => Some(rows),
            QueryOutput::Failure(_) => None,
        }
    }

    fn has_repair_history(&self) -> bool {
        self.was_repaired() || !self.is_success()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEnvelope {
    pub user_query: String,
    pub error: String,
    pub error_kind: ErrorKind,
}

impl ErrorEnvelope {
    pub fn new(user_query: impl Into<String>, error: &NlqError) -> Self {
        Self {
            user_query: user_query.into(),
            error: error.to_string(),
            error_kind: error.kind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryEnvelope {
    Completed(QueryResult),
    Error(ErrorEnvelope),
}

impl QueryEnvelope {
    pub fn user_query(&self) -> &str {
        match self {
            QueryEnvelope::Completed(result) => &result.user_query,
            QueryEnvelope::Error(error) => &error.user_query,
        }
    }

    pub fn as_result(&self) -> Option<&QueryResult> {
        match self {
            QueryEnvelope::Completed(result) => Some(result),
            QueryEnvelope::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorEnvelope> {
        match self {
            QueryEnvelope::Completed(_) => None,
            QueryEnvelope::Error(error) => Some(error),
        }
    }

    pub fn summary(&self) -> Option<&str> {
        self.as_result().and_then(|r| r.summary.as_deref())
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Build the envelope for a machine. Deterministic in the machine's contents.
pub fn assemble(machine: &QueryMachine) -> QueryEnvelope {
    let completed = |result: QueryOutput, summary: Option<String>| {
        QueryEnvelope::Completed(QueryResult {
            user_query: machine.user_query().to_string(),
            rephrased_query: machine.rephrased_query().to_string(),
            selected_table: machine.table_name().to_string(),
            original_sql: machine.original_sql().unwrap_or_default().to_string(),
            attempts: machine.attempts().to_vec(),
            result,
            summary,
        })
    };

    match machine.state() {
        QueryState::Done { summary } => {
            match machine.attempts().last().map(|a| &a.outcome) {
                Some(ExecutionOutcome::Rows(rows)) => {
                    completed(QueryOutput::Rows(rows.clone()), Some(summary.clone()))
                }
                _ => QueryEnvelope::Error(ErrorEnvelope::new(
                    machine.user_query(),
                    &NlqError::Internal("finished without a successful attempt".to_string()),
                )),
            }
        }
        QueryState::Failed(NlqError::RetriesExhausted { .. }) => {
            completed(QueryOutput::Failure(ALL_ATTEMPTS_FAILED_MESSAGE.to_string()), None)
        }
        QueryState::Failed(error) => QueryEnvelope::Error(ErrorEnvelope::new(machine.user_query(), error)),
        state => QueryEnvelope::Error(ErrorEnvelope::new(
            machine.user_query(),
            &NlqError::Internal(format!("query processing stopped in state {}", state.name())),
        )),
    }
}

#[derive(Serialize)]
struct AttemptWire<'a> {
    sql: &'a str,
    succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_count: Option<usize>,
}

#[derive(Serialize)]
struct QueryResultWire<'a> {
    user_query: &'a str,
    rephrased_query: &'a str,
    selected_table: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sql_query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_sql_query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_messages: Option<Vec<&'a str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_sql_query: Option<&'a str>,
    attempts: Vec<AttemptWire<'a>>,
    result: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let history = self.has_repair_history();
        let attempts = self
            .attempts
            .iter()
            .map(|a| AttemptWire {
                sql: &a.sql,
                succeeded: a.succeeded(),
                error: a.error_message(),
                row_count: match &a.outcome {
                    ExecutionOutcome::Rows(rows) => Some(rows.row_count()),
                    ExecutionOutcome::ExecutionError(_) => None,
                },
            })
            .collect();

        QueryResultWire {
            user_query: &self.user_query,
            rephrased_query: &self.rephrased_query,
            selected_table: &self.selected_table,
            sql_query: (!history).then_some(self.original_sql.as_str()),
            original_sql_query: history.then_some(self.original_sql.as_str()),
            error_messages: history.then(|| self.error_messages()),
            final_sql_query: history.then(|| self.final_sql()),
            attempts,
            result: match &self.result {
                QueryOutput::Rows(rows) => rows.raw.as_str(),
                QueryOutput::Failure(message) => message.as_str(),
            },
            summary: self.summary.as_deref(),
        }
        .serialize(serializer)
    }
}

/// Human-readable rendering for terminals.
pub fn render_text(envelope: &QueryEnvelope) -> String {
    let mut out = String::new();
    match envelope {
        QueryEnvelope::Error(error) => {
            let _ = writeln!(out, "Error: {}", error.error);
        }
        QueryEnvelope::Completed(result) => {
            let _ = writeln!(out, "Rephrased Query:\n{}\n", result.rephrased_query);
            if result.has_repair_history() {
                let _ = writeln!(out, "Original SQL Query (Failed):\n{}\n", result.original_sql);
                let _ = writeln!(out, "Error Messages:");
                for (i, error) in result.error_messages().iter().enumerate() {
                    let _ = writeln!(out, "Attempt {}: {}", i + 1, error);
                }
                let _ = writeln!(out, "\nFinal SQL Query:\n{}\n", result.final_sql());
            } else {
                let _ = writeln!(out, "SQL Query:\n{}\n", result.original_sql);
            }
            let result_text = match &result.result {
                QueryOutput::Rows(rows) => rows.raw.as_str(),
                QueryOutput::Failure(message) => message.as_str(),
            };
            let _ = writeln!(out, "Result:\n{}", result_text);
            if let Some(summary) = &result.summary {
                let _ = writeln!(out, "\nSummary:\n{}", summary);
            }
        }
    }
    out
}
