//! Query state machine
//!
//! `QueryMachine` owns everything one `process()` call accumulates and moves
//! between states only through [`QueryMachine::apply`]. It never talks to a
//! gateway, so the retry bound and terminal states can be tested on their own.

use crate::envelope::QueryAttempt;
use crate::error::{NlqError, Result};
use crate::execution::{ExecutionOutcome, RowSet};
use crate::llm::Classification;
use std::fmt;
use tracing::{info, warn};

pub const IRRELEVANT_QUERY_MESSAGE: &str =
    "Invalid or irrelevant query. Please ask a database-related question.";

#[derive(Debug)]
pub enum QueryState {
    Classifying,
    Generating,
    Executing { sql: String },
    Repairing { error_message: String, failed_sql: String },
    Summarizing { rows: RowSet },
    Done { summary: String },
    Failed(NlqError),
}

impl QueryState {
    pub fn name(&self) -> &'static str {
        match self {
            QueryState::Classifying => "Classifying",
            QueryState::Generating => "Generating",
            QueryState::Executing { .. } => "Executing",
            QueryState::Repairing { .. } => "Repairing",
            QueryState::Summarizing { .. } => "Summarizing",
            QueryState::Done { .. } => "Done",
            QueryState::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueryState::Done { .. } | QueryState::Failed(_))
    }
}

/// Gateway results fed into the machine.
#[derive(Debug, Clone)]
pub enum Event {
    Classified(Classification),
    Generated(String),
    Executed(ExecutionOutcome),
    Repaired(String),
    Summarized(String),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Classified(_) => write!(f, "Classified"),
            Event::Generated(_) => write!(f, "Generated"),
            Event::Executed(_) => write!(f, "Executed"),
            Event::Repaired(_) => write!(f, "Repaired"),
            Event::Summarized(_) => write!(f, "Summarized"),
        }
    }
}

#[derive(Debug)]
pub struct QueryMachine {
    user_query: String,
    table_name: String,
    max_retries: u32,
    retries: u32,
    rephrased_query: Option<String>,
    original_sql: Option<String>,
    attempts: Vec<QueryAttempt>,
    state: QueryState,
}

impl QueryMachine {
    pub fn new(user_query: impl Into<String>, table_name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            user_query: user_query.into(),
            table_name: table_name.into(),
            max_retries,
            retries: 0,
            rephrased_query: None,
            original_sql: None,
            attempts: Vec::new(),
            state: QueryState::Classifying,
        }
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn user_query(&self) -> &str {
        &self.user_query
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Completed repair cycles so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// The rephrased query, or the raw input before classification finished.
    pub fn rephrased_query(&self) -> &str {
        self.rephrased_query.as_deref().unwrap_or(&self.user_query)
    }

    /// SQL produced by the generation step.
    pub fn original_sql(&self) -> Option<&str> {
        self.original_sql.as_deref()
    }

    pub fn attempts(&self) -> &[QueryAttempt] {
        &self.attempts
    }

    /// Advance by one event. An event that does not belong to the current
    /// state is rejected and leaves the machine unchanged.
    pub fn apply(&mut self, event: Event) -> Result<()> {
        let next = match (&self.state, event) {
            (QueryState::Classifying, Event::Classified(verdict)) => {
                if verdict.is_wrong() {
                    warn!("Query classified as irrelevant: {}", self.user_query);
                    QueryState::Failed(NlqError::IrrelevantQuery(IRRELEVANT_QUERY_MESSAGE.to_string()))
                } else {
                    let rephrased = verdict.rephrased_or(&self.user_query);
                    info!("Rephrased query: {}", rephrased);
                    self.rephrased_query = Some(rephrased);
                    QueryState::Generating
                }
            }
            (QueryState::Generating, Event::Generated(sql)) => {
                let sql = sql.trim().to_string();
                info!("Generated SQL: {}", sql);
                self.original_sql = Some(sql.clone());
                self.retries = 0;
                QueryState::Executing { sql }
            }
            (QueryState::Executing { sql }, Event::Executed(outcome)) => {
                let sql = sql.clone();
                self.attempts.push(QueryAttempt::new(sql.clone(), outcome.clone()));
                match outcome {
                    ExecutionOutcome::Rows(rows) => QueryState::Summarizing { rows },
                    ExecutionOutcome::ExecutionError(message) if self.retries < self.max_retries => {
                        warn!(
                            "Query execution failed (attempt {}/{}). Attempting to correct...",
                            self.attempts.len(),
                            self.max_retries + 1
                        );
                        QueryState::Repairing {
                            error_message: message,
                            failed_sql: sql,
                        }
                    }
                    ExecutionOutcome::ExecutionError(_) => {
                        warn!("Query execution failed after {} attempts", self.attempts.len());
                        QueryState::Failed(NlqError::RetriesExhausted {
                            attempts: self.attempts.len(),
                            errors: self.error_messages(),
                        })
                    }
                }
            }
            (QueryState::Repairing { .. }, Event::Repaired(sql)) => {
                self.retries += 1;
                let sql = sql.trim().to_string();
                info!("Corrected SQL (repair {}/{}): {}", self.retries, self.max_retries, sql);
                QueryState::Executing { sql }
            }
            (QueryState::Summarizing { .. }, Event::Summarized(summary)) => QueryState::Done {
                summary: summary.trim().to_string(),
            },
            (state, event) => {
                return Err(NlqError::Internal(format!(
                    "event {} is not valid in state {}",
                    event,
                    state.name()
                )))
            }
        };

        self.state = next;
        Ok(())
    }

    /// Stop with `error`. Terminal machines are left as they are.
    pub fn abort(&mut self, error: NlqError) {
        if !self.is_terminal() {
            self.state = QueryState::Failed(error);
        }
    }

    /// Execution-error messages in attempt order.
    pub fn error_messages(&self) -> Vec<String> {
        self.attempts
            .iter()
            .filter_map(|a| a.error_message())
            .map(str::to_string)
            .collect()
    }
}
