//! Query Orchestrator
//!
//! Drives a [`QueryMachine`] to a terminal state: classify, generate,
//! execute, repair (bounded), summarize.

use crate::config::DEFAULT_MAX_RETRIES;
use crate::envelope::{self, ErrorEnvelope, QueryEnvelope};
use crate::error::{NlqError, Result};
use crate::execution::ExecutionOutcome;
use crate::execution_loop::state::{Event, QueryMachine, QueryState};
use crate::gateway::{ExecutionGateway, Instruction, ReasoningGateway};
use crate::llm::Classification;
use crate::schema::{Session, TableSelection};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs questions against the table selected in a session.
///
/// Holds no per-query state, so one orchestrator can serve any number of
/// sessions concurrently. Dropping a `process()` future abandons the
/// remaining steps; nothing needs rolling back.
#[derive(Clone)]
pub struct QueryOrchestrator {
    reasoner: Arc<dyn ReasoningGateway>,
    executor: Arc<dyn ExecutionGateway>,
    default_max_retries: u32,
}

impl QueryOrchestrator {
    pub fn new(reasoner: Arc<dyn ReasoningGateway>, executor: Arc<dyn ExecutionGateway>) -> Self {
        Self {
            reasoner,
            executor,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn default_max_retries(&self) -> u32 {
        self.default_max_retries
    }

    /// `process` with the configured retry bound.
    pub async fn ask(&self, session: &Session, user_query: &str) -> QueryEnvelope {
        self.process(session, user_query, self.default_max_retries).await
    }

    /// Answer `user_query` against the session's table.
    ///
    /// Never fails: every error ends up in the returned envelope. At most
    /// `max_retries + 1` executions and `max_retries` repairs are issued.
    pub async fn process(&self, session: &Session, user_query: &str, max_retries: u32) -> QueryEnvelope {
        let selection = match session.require_selection() {
            Ok(selection) => selection,
            Err(e) => {
                warn!("Rejected query without a selected table");
                return QueryEnvelope::Error(ErrorEnvelope::new(user_query, &e));
            }
        };

        info!("Processing query on table {}: {}", selection.table, user_query);
        let mut machine = QueryMachine::new(user_query, selection.table.as_str(), max_retries);

        while !machine.is_terminal() {
            let step = machine.state().name();
            let applied = match self.step(&machine, selection).await {
                Ok(event) => machine.apply(event),
                Err(e) => Err(e),
            };
            if let Err(e) = applied {
                error!("{} step failed: {}", step, e);
                machine.abort(e);
            }
        }

        let envelope = envelope::assemble(&machine);
        match &envelope {
            QueryEnvelope::Completed(result) if result.is_success() => info!(
                "Query answered after {} attempt(s)",
                result.attempts.len()
            ),
            QueryEnvelope::Completed(result) => warn!(
                "Query failed after {} attempt(s)",
                result.attempts.len()
            ),
            QueryEnvelope::Error(e) => warn!("Query rejected ({:?}): {}", e.error_kind, e.error),
        }
        envelope
    }

    /// Perform the gateway call the current state asks for.
    async fn step(&self, machine: &QueryMachine, selection: &TableSelection) -> Result<Event> {
        match machine.state() {
            QueryState::Classifying => {
                let response = self
                    .reasoner
                    .complete(&Instruction::Classify {
                        user_query: machine.user_query().to_string(),
                    })
                    .await?;
                Ok(Event::Classified(Classification::parse(&response)?))
            }
            QueryState::Generating => {
                let sql = self
                    .reasoner
                    .complete(&Instruction::Generate {
                        rephrased_query: machine.rephrased_query().to_string(),
                        table_name: selection.table.clone(),
                        schema: selection.schema.clone(),
                    })
                    .await?;
                Ok(Event::Generated(sql))
            }
            QueryState::Executing { sql } => {
                let response = self.executor.run(&selection.table, sql).await?;
                Ok(Event::Executed(ExecutionOutcome::from_response(&response)))
            }
            QueryState::Repairing {
                error_message,
                failed_sql,
            } => {
                let sql = self
                    .reasoner
                    .complete(&Instruction::Repair {
                        error_message: error_message.clone(),
                        original_sql: failed_sql.clone(),
                        table_name: selection.table.clone(),
                        schema: selection.schema.clone(),
                        rephrased_query: machine.rephrased_query().to_string(),
                    })
                    .await?;
                Ok(Event::Repaired(sql))
            }
            QueryState::Summarizing { rows } => {
                let summary = self
                    .reasoner
                    .complete(&Instruction::Summarize {
                        user_query: machine.user_query().to_string(),
                        sql_output: rows.raw.clone(),
                    })
                    .await?;
                Ok(Event::Summarized(summary))
            }
            state => Err(NlqError::Internal(format!(
                "no step for terminal state {}",
                state.name()
            ))),
        }
    }
}
