//! HTTP server for the text-to-SQL pipeline
//! Simple HTTP server using tokio and basic HTTP handling

use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use text_to_sql::envelope::QueryEnvelope;
use text_to_sql::execution::ClickHouseEngine;
use text_to_sql::llm::LlmClient;
use text_to_sql::prompts::PromptTemplates;
use text_to_sql::{AppConfig, ErrorKind, NlqError, QueryOrchestrator, SchemaResolver, Session};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const MAX_REQUEST_BYTES: usize = 1024 * 1024;

struct AppState {
    resolver: SchemaResolver,
    orchestrator: QueryOrchestrator,
    sessions: DashMap<Uuid, Arc<Mutex<Session>>>,
}

#[derive(Debug, Deserialize)]
struct SelectTableRequest {
    table_name: String,
    #[serde(default)]
    session_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    session_id: Option<Uuid>,
    user_query: String,
    #[serde(default)]
    max_retries: Option<u32>,
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    body: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if config.llm.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set - LLM requests will be rejected");
    }

    let templates = match &config.prompts_path {
        Some(path) => PromptTemplates::load(path)?,
        None => PromptTemplates::default(),
    };
    let executor = Arc::new(ClickHouseEngine::new(&config.clickhouse)?);
    let reasoner = Arc::new(LlmClient::new(&config.llm, templates)?);

    let state = Arc::new(AppState {
        resolver: SchemaResolver::new(executor.clone()),
        orchestrator: QueryOrchestrator::new(reasoner, executor).with_max_retries(config.max_retries),
        sessions: DashMap::new(),
    });

    let listener = TcpListener::bind(&config.server_addr).await?;
    info!("Server listening on {}", config.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, Arc::clone(&state)));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let response = match read_request(&mut stream).await {
        Ok(Some(request)) => handle_request(&request, &state).await,
        Ok(None) => return,
        Err(e) => {
            warn!("Failed to read request: {}", e);
            create_response(400, "Bad Request", &error_body(&e.to_string(), None))
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

/// Read one request: headers up to the blank line, then `Content-Length` bytes.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<Request>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "incomplete request"));
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request too large"));
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = content_length(&head);
    if content_length > MAX_REQUEST_BYTES {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "request too large"));
    }

    let body_start = header_end + 4;
    while buffer.len() < body_start + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    let body_end = buffer.len().min(body_start + content_length);
    let body = String::from_utf8_lossy(&buffer[body_start..body_end]).to_string();

    parse_request_line(&head)
        .map(|(method, path)| Some(Request { method, path, body }))
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed request line"))
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn content_length(head: &str) -> usize {
    head.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(0)
}

/// Method and normalized path (query string and trailing slash removed).
fn parse_request_line(head: &str) -> Option<(String, String)> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;

    let path = target.split('?').next().unwrap_or("").trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some((method, path.to_string()))
}

async fn handle_request(request: &Request, state: &AppState) -> String {
    info!("Request: {} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("GET", "/api/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"text-to-sql"}"#)
        }
        ("GET", "/tables") => match state.resolver.list_tables().await {
            Ok(tables) => create_response(200, "OK", &serde_json::json!(tables).to_string()),
            Err(e) => error_response(&e, None),
        },
        ("POST", "/select_table") => {
            let body: SelectTableRequest = match serde_json::from_str(&request.body) {
                Ok(body) => body,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            select_table(state, body).await
        }
        ("POST", "/query") => {
            let body: QueryRequest = match serde_json::from_str(&request.body) {
                Ok(body) => body,
                Err(e) => return bad_request(&format!("Invalid request body: {}", e)),
            };
            run_query(state, body).await
        }
        _ => create_response(404, "Not Found", &error_body("Not found", None)),
    }
}

async fn select_table(state: &AppState, request: SelectTableRequest) -> String {
    let existing = request
        .session_id
        .and_then(|id| state.sessions.get(&id).map(|entry| (id, Arc::clone(entry.value()))));

    // A session is only registered once a selection has succeeded.
    match existing {
        Some((session_id, session)) => {
            let mut session = session.lock().await;
            match state.resolver.select_table(&mut session, &request.table_name).await {
                Ok(_) => selection_response(session_id, &session),
                Err(e) => error_response(&e, None),
            }
        }
        None => {
            let mut session = Session::new();
            match state.resolver.select_table(&mut session, &request.table_name).await {
                Ok(_) => {
                    let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
                    let response = selection_response(session_id, &session);
                    state.sessions.insert(session_id, Arc::new(Mutex::new(session)));
                    response
                }
                Err(e) => error_response(&e, None),
            }
        }
    }
}

fn selection_response(session_id: Uuid, session: &Session) -> String {
    let body = serde_json::json!({
        "session_id": session_id,
        "message": format!(
            "Table '{}' selected successfully.",
            session.selected_table().unwrap_or_default()
        ),
        "table": session.selected_table(),
        "schema": session.schema(),
        "selected_at": session.selection().map(|s| s.selected_at),
    });
    create_response(200, "OK", &body.to_string())
}

async fn run_query(state: &AppState, request: QueryRequest) -> String {
    let session = match request
        .session_id
        .and_then(|id| state.sessions.get(&id).map(|entry| Arc::clone(entry.value())))
    {
        Some(session) => session,
        None => {
            return error_response(&NlqError::NoTableSelected, Some(&request.user_query));
        }
    };

    // One query at a time per session.
    let session = session.lock().await;
    let max_retries = request
        .max_retries
        .unwrap_or_else(|| state.orchestrator.default_max_retries());
    let envelope = state
        .orchestrator
        .process(&session, &request.user_query, max_retries)
        .await;

    match &envelope {
        QueryEnvelope::Completed(result) if result.is_success() => {
            let rows = result.rows().map(|r| r.rows.clone()).unwrap_or_default();
            let body = serde_json::json!({
                "sql_query": result.final_sql(),
                "result": rows,
                "envelope": envelope,
            });
            create_response(200, "OK", &body.to_string())
        }
        QueryEnvelope::Completed(_) => {
            let body = serde_json::json!({
                "error": text_to_sql::envelope::ALL_ATTEMPTS_FAILED_MESSAGE,
                "error_kind": ErrorKind::RetriesExhausted,
                "envelope": envelope,
            });
            create_response(422, "Unprocessable Entity", &body.to_string())
        }
        QueryEnvelope::Error(error) => {
            let (status, status_text) = status_for(error.error_kind);
            let body = serde_json::to_string(error).unwrap_or_else(|_| error_body(&error.error, None));
            create_response(status, status_text, &body)
        }
    }
}

fn error_body(message: &str, kind: Option<ErrorKind>) -> String {
    serde_json::json!({ "error": message, "error_kind": kind }).to_string()
}

fn bad_request(message: &str) -> String {
    create_response(400, "Bad Request", &error_body(message, None))
}

fn status_for(kind: ErrorKind) -> (u16, &'static str) {
    match kind {
        ErrorKind::SchemaNotFound => (404, "Not Found"),
        ErrorKind::NoTableSelected | ErrorKind::IrrelevantQuery => (400, "Bad Request"),
        ErrorKind::RetriesExhausted => (422, "Unprocessable Entity"),
        ErrorKind::GatewayUnavailable | ErrorKind::InvalidResponse => (502, "Bad Gateway"),
        _ => (500, "Internal Server Error"),
    }
}

fn error_response(error: &NlqError, user_query: Option<&str>) -> String {
    let (status, status_text) = status_for(error.kind());
    let mut body = serde_json::json!({ "error": error.to_string(), "error_kind": error.kind() });
    if let Some(user_query) = user_query {
        body["user_query"] = serde_json::json!(user_query);
    }
    create_response(status, status_text, &body.to_string())
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
