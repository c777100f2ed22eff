use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use text_to_sql::envelope::{QueryEnvelope, ALL_ATTEMPTS_FAILED_MESSAGE};
use text_to_sql::execution::ExecutionOutcome;
use text_to_sql::schema::TableSelection;
use text_to_sql::{
    ErrorKind, ExecutionGateway, Instruction, InstructionKind, NlqError, QueryOrchestrator,
    ReasoningGateway, Result, SchemaDescriptor, SchemaResolver, Session,
};

const ORDERS_ROWS: &str = "Query executed successfully:\n\n{\n  \"columns\": [{\"name\": \"total\", \"type\": \"unknown\"}],\n  \"rows\": [{\"total\": 1000}]\n}";

/// Reasoning double: canned responses per instruction kind, consumed in order.
/// The last response for a kind is repeated once the queue runs dry.
#[derive(Default)]
struct ScriptedReasoner {
    responses: Mutex<HashMap<InstructionKind, VecDeque<Result<String>>>>,
    calls: Mutex<Vec<Instruction>>,
}

impl ScriptedReasoner {
    fn respond(self, kind: InstructionKind, response: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(Ok(response.to_string()));
        self
    }

    fn fail(self, kind: InstructionKind, error: NlqError) -> Self {
        self.responses.lock().unwrap().entry(kind).or_default().push_back(Err(error));
        self
    }

    fn calls(&self, kind: InstructionKind) -> usize {
        self.calls.lock().unwrap().iter().filter(|i| i.kind() == kind).count()
    }

    fn instructions(&self) -> Vec<Instruction> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningGateway for ScriptedReasoner {
    async fn complete(&self, instruction: &Instruction) -> Result<String> {
        self.calls.lock().unwrap().push(instruction.clone());
        let mut responses = self.responses.lock().unwrap();
        let queue = responses
            .get_mut(&instruction.kind())
            .ok_or_else(|| NlqError::Internal(format!("no script for {}", instruction.kind())))?;
        match queue.len() {
            0 => Err(NlqError::Internal(format!("script for {} is empty", instruction.kind()))),
            1 => match queue.front() {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(e)) => Err(NlqError::GatewayUnavailable(e.to_string())),
                None => unreachable!(),
            },
            _ => queue.pop_front().unwrap_or_else(|| Ok(String::new())),
        }
    }
}

/// Execution double: canned `run` responses consumed in order, last repeated.
struct ScriptedExecutor {
    schemas: HashMap<String, SchemaDescriptor>,
    responses: Mutex<VecDeque<Result<String>>>,
    runs: Mutex<Vec<(String, String)>>,
}

impl ScriptedExecutor {
    fn new(responses: Vec<Result<String>>) -> Self {
        let mut schemas = HashMap::new();
        schemas.insert("orders".to_string(), orders_schema());
        Self {
            schemas,
            responses: Mutex::new(responses.into()),
            runs: Mutex::new(Vec::new()),
        }
    }

    fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    fn executed_sql(&self) -> Vec<String> {
        self.runs.lock().unwrap().iter().map(|(_, sql)| sql.clone()).collect()
    }
}

#[async_trait]
impl ExecutionGateway for ScriptedExecutor {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.schemas.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    async fn fetch_schema(&self, table_name: &str) -> Result<SchemaDescriptor> {
        self.schemas
            .get(table_name)
            .cloned()
            .ok_or_else(|| NlqError::SchemaNotFound(table_name.to_string()))
    }

    async fn run(&self, table_name: &str, sql: &str) -> Result<String> {
        self.runs.lock().unwrap().push((table_name.to_string(), sql.to_string()));
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            return responses.pop_front().unwrap_or_else(|| Ok(String::new()));
        }
        match responses.front() {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(e)) => Err(NlqError::GatewayUnavailable(e.to_string())),
            None => Err(NlqError::Internal("no execution script".to_string())),
        }
    }
}

fn orders_schema() -> SchemaDescriptor {
    SchemaDescriptor::new([("id", "Int"), ("total", "Float")])
}

fn orders_session() -> Session {
    Session::with_selection(TableSelection::new("orders", orders_schema()))
}

fn valid_reasoner() -> ScriptedReasoner {
    ScriptedReasoner::default()
        .respond(
            InstructionKind::Classify,
            r#"{"query_type": "valid", "queries": ["total revenue last week"]}"#,
        )
        .respond(
            InstructionKind::Generate,
            "  SELECT SUM(total) FROM orders WHERE created_at >= now() - INTERVAL 7 DAY\n",
        )
        .respond(InstructionKind::Summarize, "Total revenue was 1000.")
}

fn error(message: &str) -> Result<String> {
    Ok(ExecutionOutcome::error_response(message))
}

fn orchestrator(
    reasoner: &Arc<ScriptedReasoner>,
    executor: &Arc<ScriptedExecutor>,
) -> QueryOrchestrator {
    QueryOrchestrator::new(reasoner.clone(), executor.clone())
}

#[tokio::test]
async fn test_orders_scenario_first_attempt_succeeds() {
    let reasoner = Arc::new(valid_reasoner());
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue last week", 3)
        .await;

    let result = envelope.as_result().expect("completed envelope");
    assert_eq!(result.attempts.len(), 1);
    assert_eq!(result.summary.as_deref(), Some("Total revenue was 1000."));
    assert_eq!(result.rephrased_query, "total revenue last week");
    assert_eq!(result.selected_table, "orders");
    assert_eq!(
        result.original_sql,
        "SELECT SUM(total) FROM orders WHERE created_at >= now() - INTERVAL 7 DAY"
    );
    assert_eq!(result.rows().map(|r| r.rows.len()), Some(1));
    assert!(!result.was_repaired());

    let json = serde_json::to_value(&envelope).unwrap();
    assert!(json.get("original_sql_query").is_none());
    assert!(json.get("error_messages").is_none());
    assert!(json.get("sql_query").is_some());

    assert_eq!(reasoner.calls(InstructionKind::Repair), 0);
    assert_eq!(executor.run_count(), 1);

    let instructions = reasoner.instructions();
    match instructions.last() {
        Some(Instruction::Summarize {
            user_query,
            sql_output,
        }) => {
            assert_eq!(user_query, "total revenue last week");
            assert_eq!(sql_output, ORDERS_ROWS);
        }
        other => panic!("expected a summarize call last, got {:?}", other),
    }
}

#[tokio::test]
async fn test_repair_then_success() {
    let reasoner = Arc::new(
        valid_reasoner().respond(InstructionKind::Repair, "SELECT SUM(total) AS revenue FROM orders"),
    );
    let executor = Arc::new(ScriptedExecutor::new(vec![
        error("Code: 47. DB::Exception: Missing columns: 'created_at'"),
        Ok(ORDERS_ROWS.to_string()),
    ]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue last week", 3)
        .await;

    let result = envelope.as_result().expect("completed envelope");
    assert_eq!(result.attempts.len(), 2);
    assert_eq!(
        result.error_messages(),
        vec!["Code: 47. DB::Exception: Missing columns: 'created_at'"]
    );
    assert!(result.summary.is_some());
    assert!(result.was_repaired());
    assert_eq!(result.final_sql(), "SELECT SUM(total) AS revenue FROM orders");

    let repair = reasoner
        .instructions()
        .into_iter()
        .find(|i| i.kind() == InstructionKind::Repair)
        .expect("repair call");
    match repair {
        Instruction::Repair {
            error_message,
            original_sql,
            table_name,
            rephrased_query,
            schema,
        } => {
            assert_eq!(error_message, "Code: 47. DB::Exception: Missing columns: 'created_at'");
            assert_eq!(original_sql, result.original_sql);
            assert_eq!(table_name, "orders");
            assert_eq!(rephrased_query, "total revenue last week");
            assert_eq!(schema, orders_schema());
        }
        other => panic!("unexpected instruction {:?}", other),
    }

    assert_eq!(
        executor.executed_sql(),
        vec![result.original_sql.clone(), "SELECT SUM(total) AS revenue FROM orders".to_string()]
    );
}

#[tokio::test]
async fn test_retry_bound_for_every_max_retries() {
    for max_retries in 0..=4u32 {
        let reasoner = Arc::new(valid_reasoner().respond(InstructionKind::Repair, "SELECT broken"));
        let executor = Arc::new(ScriptedExecutor::new(vec![error("Syntax error")]));

        let envelope = orchestrator(&reasoner, &executor)
            .process(&orders_session(), "total revenue last week", max_retries)
            .await;

        assert_eq!(executor.run_count(), (max_retries + 1) as usize);
        assert_eq!(reasoner.calls(InstructionKind::Repair), max_retries as usize);
        assert_eq!(reasoner.calls(InstructionKind::Summarize), 0);

        let result = envelope.as_result().expect("completed envelope");
        assert_eq!(result.error_messages().len(), (max_retries + 1) as usize);
        assert!(result.summary.is_none());
        assert!(!result.is_success());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["result"], ALL_ATTEMPTS_FAILED_MESSAGE);
        let expected_final = if max_retries == 0 {
            result.original_sql.as_str()
        } else {
            "SELECT broken"
        };
        assert_eq!(json["final_sql_query"], expected_final);
    }
}

#[tokio::test]
async fn test_wrong_classification_stops_pipeline() {
    let reasoner = Arc::new(
        ScriptedReasoner::default()
            .respond(InstructionKind::Classify, r#"{"query_type": "wrong", "queries": []}"#),
    );
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "what's the weather?", 3)
        .await;

    let error = envelope.error().expect("error envelope");
    assert_eq!(error.error_kind, ErrorKind::IrrelevantQuery);
    assert_eq!(error.user_query, "what's the weather?");
    assert_eq!(reasoner.calls(InstructionKind::Generate), 0);
    assert_eq!(reasoner.calls(InstructionKind::Repair), 0);
    assert_eq!(executor.run_count(), 0);
}

#[tokio::test]
async fn test_empty_candidate_list_uses_original_text() {
    let reasoner = Arc::new(
        ScriptedReasoner::default()
            .respond(InstructionKind::Classify, r#"{"query_type": "valid", "queries": []}"#)
            .respond(InstructionKind::Generate, "SELECT count() FROM orders")
            .respond(InstructionKind::Summarize, "There are 1000 orders."),
    );
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "how many orders?", 3)
        .await;

    assert_eq!(envelope.as_result().map(|r| r.rephrased_query.as_str()), Some("how many orders?"));
    match reasoner.instructions().get(1) {
        Some(Instruction::Generate { rephrased_query, .. }) => {
            assert_eq!(rephrased_query, "how many orders?")
        }
        other => panic!("expected generate call, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sentinel_with_rows_counts_as_failure() {
    let mixed = format!("{}\n{}", ORDERS_ROWS, ExecutionOutcome::error_response("partial read"));
    let reasoner = Arc::new(valid_reasoner());
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(mixed)]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue last week", 0)
        .await;

    let result = envelope.as_result().expect("completed envelope");
    assert!(!result.is_success());
    assert_eq!(result.error_messages(), vec!["partial read"]);
    assert_eq!(reasoner.calls(InstructionKind::Summarize), 0);
}

#[tokio::test]
async fn test_no_table_selected_makes_no_calls() {
    let reasoner = Arc::new(valid_reasoner());
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&Session::new(), "total revenue last week", 3)
        .await;

    let error = envelope.error().expect("error envelope");
    assert_eq!(error.error_kind, ErrorKind::NoTableSelected);
    assert_eq!(error.error, "No table has been selected for this session");
    assert!(reasoner.instructions().is_empty());
    assert_eq!(executor.run_count(), 0);
}

#[tokio::test]
async fn test_gateway_failure_is_not_retried() {
    let reasoner = Arc::new(valid_reasoner());
    let executor = Arc::new(ScriptedExecutor::new(vec![Err(NlqError::GatewayUnavailable(
        "connection refused".to_string(),
    ))]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue last week", 3)
        .await;

    let error = envelope.error().expect("error envelope");
    assert_eq!(error.error_kind, ErrorKind::GatewayUnavailable);
    assert_eq!(executor.run_count(), 1);
    assert_eq!(reasoner.calls(InstructionKind::Repair), 0);
}

#[tokio::test]
async fn test_reasoner_failure_during_repair_is_surfaced() {
    let reasoner = Arc::new(valid_reasoner().fail(
        InstructionKind::Repair,
        NlqError::GatewayUnavailable("rate limited".to_string()),
    ));
    let executor = Arc::new(ScriptedExecutor::new(vec![error("Unknown identifier")]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue last week", 3)
        .await;

    assert_eq!(envelope.error().map(|e| e.error_kind), Some(ErrorKind::GatewayUnavailable));
    assert_eq!(executor.run_count(), 1);
    assert_eq!(reasoner.calls(InstructionKind::Repair), 1);
}

#[tokio::test]
async fn test_unparseable_classification_is_invalid_response() {
    let reasoner = Arc::new(ScriptedReasoner::default().respond(InstructionKind::Classify, "sure!"));
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));

    let envelope = orchestrator(&reasoner, &executor)
        .process(&orders_session(), "total revenue", 3)
        .await;

    assert_eq!(envelope.error().map(|e| e.error_kind), Some(ErrorKind::InvalidResponse));
    assert_eq!(executor.run_count(), 0);
}

#[tokio::test]
async fn test_identical_inputs_produce_identical_envelopes() {
    let session = orders_session();
    let mut rendered = Vec::new();
    for _ in 0..2 {
        let reasoner = Arc::new(
            valid_reasoner().respond(InstructionKind::Repair, "SELECT SUM(total) FROM orders"),
        );
        let executor = Arc::new(ScriptedExecutor::new(vec![
            error("Missing columns: 'created_at'"),
            Ok(ORDERS_ROWS.to_string()),
        ]));
        let envelope = orchestrator(&reasoner, &executor)
            .process(&session, "total revenue last week", 3)
            .await;
        assert!(matches!(envelope, QueryEnvelope::Completed(_)));
        rendered.push(envelope.to_json_pretty());
    }
    assert_eq!(rendered[0], rendered[1]);
}

#[tokio::test]
async fn test_resolver_and_orchestrator_share_gateway() {
    let reasoner = Arc::new(valid_reasoner());
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(ORDERS_ROWS.to_string())]));
    let resolver = SchemaResolver::new(executor.clone());

    let mut session = Session::new();
    assert_eq!(resolver.list_tables().await.unwrap(), vec!["orders".to_string()]);
    assert!(resolver.select_table(&mut session, "missing").await.is_err());
    assert!(!session.is_ready());

    resolver.select_table(&mut session, "orders").await.unwrap();
    let envelope = QueryOrchestrator::new(reasoner, executor.clone())
        .with_max_retries(1)
        .ask(&session, "total revenue last week")
        .await;

    assert_eq!(envelope.summary(), Some("Total revenue was 1000."));
    assert_eq!(executor.runs.lock().unwrap()[0].0, "orders");
}
