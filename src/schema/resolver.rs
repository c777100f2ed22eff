use crate::error::{NlqError, Result};
use crate::gateway::ExecutionGateway;
use crate::schema::{SchemaDescriptor, Session, TableSelection};
use std::sync::Arc;
use tracing::{info, warn};

/// Resolves a table name into its schema and installs both on a session.
#[derive(Clone)]
pub struct SchemaResolver {
    gateway: Arc<dyn ExecutionGateway>,
}

impl SchemaResolver {
    pub fn new(gateway: Arc<dyn ExecutionGateway>) -> Self {
        Self { gateway }
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        self.gateway.list_tables().await
    }

    /// Fetch the schema for `table_name` and make it the session's selection.
    ///
    /// On any failure the session keeps whatever selection it had before.
    pub async fn select_table<'s>(
        &self,
        session: &'s mut Session,
        table_name: &str,
    ) -> Result<&'s SchemaDescriptor> {
        let table_name = table_name.trim();
        if table_name.is_empty() {
            return Err(NlqError::SchemaNotFound(String::new()));
        }

        info!("Resolving schema for table '{}' via {}", table_name, self.gateway.name());
        let schema = self.gateway.fetch_schema(table_name).await?;

        if schema.is_empty() {
            warn!("Table '{}' has no columns", table_name);
            return Err(NlqError::SchemaNotFound(table_name.to_string()));
        }

        info!("Selected table '{}' ({} columns)", table_name, schema.len());
        let selection = session.replace_selection(TableSelection::new(table_name, schema));
        Ok(&selection.schema)
    }
}
