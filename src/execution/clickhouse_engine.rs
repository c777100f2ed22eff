//! ClickHouse Execution Engine
//!
//! Talks to the ClickHouse HTTP interface. Every request is a POST with the
//! SQL in the body and `default_format=JSON`, so successful responses come
//! back as `{"meta": [...], "data": [...]}`.

use crate::config::ClickHouseConfig;
use crate::error::{NlqError, Result};
use crate::execution::result::{ExecutionOutcome, RowSet};
use crate::gateway::ExecutionGateway;
use crate::schema::SchemaDescriptor;
use async_trait::async_trait;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, info, warn};

lazy_static! {
    /// ClickHouse exception bodies end with the symbolic code, e.g.
    /// `... does not exist. (UNKNOWN_TABLE) (version 23.8.1)`.
    static ref ERROR_CODE: Regex = Regex::new(r"\(([A-Z][A-Z0-9_]+)\)").unwrap();
}

const NOT_FOUND_CODES: &[&str] = &["UNKNOWN_TABLE", "UNKNOWN_DATABASE"];

#[derive(Debug, Deserialize)]
struct JsonColumn {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
}

#[derive(Debug, Deserialize)]
struct JsonResponse {
    #[serde(default)]
    meta: Vec<JsonColumn>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Failure reported by ClickHouse itself, as opposed to the transport.
#[derive(Debug)]
struct ServerError {
    status: reqwest::StatusCode,
    message: String,
}

impl ServerError {
    fn code(&self) -> Option<&str> {
        ERROR_CODE
            .captures(&self.message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    fn is_not_found(&self) -> bool {
        self.code().map_or(false, |c| NOT_FOUND_CODES.contains(&c))
    }

    /// `SHOW TABLES` failures are never per-query SQL errors.
    fn into_list_error(self) -> NlqError {
        NlqError::GatewayUnavailable(format!("ClickHouse rejected SHOW TABLES: {}", self.message))
    }

    fn into_schema_error(self, table_name: &str) -> NlqError {
        if self.is_not_found() {
            NlqError::SchemaNotFound(table_name.to_string())
        } else {
            NlqError::GatewayUnavailable(format!(
                "Error retrieving schema for table {}: {}",
                table_name, self.message
            ))
        }
    }
}

pub struct ClickHouseEngine {
    url: String,
    user: String,
    password: String,
    database: Option<String>,
    client: Client,
}

impl ClickHouseEngine {
    pub fn new(config: &ClickHouseConfig) -> Result<Self> {
        // No idle connections are kept, so each call opens its own connection
        // and releases it once the response has been read.
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(0)
            .build()
            .map_err(|e| NlqError::Config(format!("Failed to create HTTP client for ClickHouse: {}", e)))?;

        Ok(Self {
            url: config.url(),
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.database.clone(),
            client,
        })
    }

    /// Send one statement. `Ok(Err(_))` is a database-side failure.
    async fn post(&self, sql: &str) -> Result<std::result::Result<JsonResponse, ServerError>> {
        let mut params: Vec<(&str, &str)> = vec![("default_format", "JSON")];
        if let Some(database) = &self.database {
            params.push(("database", database.as_str()));
        }

        let response = self
            .client
            .post(&self.url)
            .query(&params)
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(sql.to_string())
            .send()
            .await
            .map_err(|e| NlqError::GatewayUnavailable(format!("Failed to reach ClickHouse: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| NlqError::GatewayUnavailable(format!("Failed to read ClickHouse response: {}", e)))?;

        if !status.is_success() {
            if status.is_server_error() && !body.contains("DB::Exception") {
                return Err(NlqError::GatewayUnavailable(format!(
                    "ClickHouse returned status {}: {}",
                    status,
                    body.trim()
                )));
            }
            return Ok(Err(ServerError {
                status,
                message: body.trim().to_string(),
            }));
        }

        if body.trim().is_empty() {
            return Ok(Ok(JsonResponse {
                meta: Vec::new(),
                data: Vec::new(),
            }));
        }

        let parsed: JsonResponse = serde_json::from_str(&body)
            .map_err(|e| NlqError::InvalidResponse(format!("Failed to parse ClickHouse response: {}", e)))?;
        Ok(Ok(parsed))
    }
}

#[async_trait]
impl ExecutionGateway for ClickHouseEngine {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        match self.post("SHOW TABLES").await? {
            Ok(response) => {
                let tables = response
                    .data
                    .iter()
                    .filter_map(|row| row.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                info!("Found {} tables", tables.len());
                Ok(tables)
            }
            Err(e) => {
                error!("Error listing tables: {}", e.message);
                Err(e.into_list_error())
            }
        }
    }

    async fn fetch_schema(&self, table_name: &str) -> Result<SchemaDescriptor> {
        info!("Retrieving schema for table: {}", table_name);
        let sql = format!("DESCRIBE TABLE {}", quote_identifier(table_name));

        match self.post(&sql).await? {
            Ok(response) => {
                let schema = SchemaDescriptor::new(response.data.iter().filter_map(|row| {
                    let name = row.get("name")?.as_str()?;
                    let column_type = row.get("type")?.as_str()?;
                    Some((name.to_string(), column_type.to_string()))
                }));
                if schema.is_empty() {
                    return Err(NlqError::SchemaNotFound(table_name.to_string()));
                }
                Ok(schema)
            }
            Err(e) => {
                if e.is_not_found() {
                    warn!("Table {} not found: {}", table_name, e.message);
                } else {
                    error!("Error retrieving schema for table {} ({}): {}", table_name, e.status, e.message);
                }
                Err(e.into_schema_error(table_name))
            }
        }
    }

    async fn run(&self, table_name: &str, sql: &str) -> Result<String> {
        info!("Executing query on table {}", table_name);
        debug!("SQL: {}", sql);

        match self.post(sql).await? {
            Ok(response) => {
                let columns = response
                    .meta
                    .into_iter()
                    .map(|c| (c.name, c.column_type))
                    .collect::<Vec<_>>();
                debug!(
                    "Query returned {} rows ({})",
                    response.data.len(),
                    columns.iter().map(|(name, _)| name).join(", ")
                );
                Ok(RowSet::to_response(&columns, &response.data))
            }
            Err(e) => {
                warn!("Error executing query ({}): {}", e.code().unwrap_or("unknown"), e.message);
                Ok(ExecutionOutcome::error_response(&e.message))
            }
        }
    }
}

/// Backtick-quote each dot-separated part of a (possibly qualified) name.
fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let part = part.trim().trim_matches('`');
            format!("`{}`", part.replace('`', "\\`"))
        })
        .join(".")
}
