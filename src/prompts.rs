//! Prompt templates for the four reasoning tasks.
//!
//! Templates use `{{ name }}` placeholders and can be overridden from a YAML
//! file laid out as `prompts: { <template_name>: { template: "..." } }`.

use crate::error::{NlqError, Result};
use crate::gateway::Instruction;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const REPHRASE_USER_QUERY: &str = "rephrase_user_query";
pub const QUERY_GENERATION: &str = "query_generation_prompt";
pub const RETRY_QUERY: &str = "retry_query_prompt";
pub const SUMMARIZATION: &str = "summarization_prompt";

const DEFAULT_REPHRASE: &str = r#"You are given a user's question about data stored in a ClickHouse database.

Decide whether the question can be answered with a SQL query over a database table.
- If it cannot (small talk, unrelated topics, harmful requests), set "query_type" to "wrong".
- Otherwise set "query_type" to "valid" and rewrite the question as one or more clear,
  self-contained data questions in "queries", most relevant first.

Return only a JSON object of the form:
{"query_type": "valid" | "wrong", "queries": ["..."]}

User question: {{ user_query }}"#;

const DEFAULT_GENERATION: &str = r#"You are an expert ClickHouse SQL writer.

Write a single ClickHouse SQL query against the table `{{ table_name }}` that answers the question below.
The table schema is:
{{ schema }}

Rules:
- Use only the columns listed in the schema.
- Return only the SQL statement, with no explanation and no markdown formatting."#;

const DEFAULT_RETRY: &str = r#"The following ClickHouse SQL query failed.

Question: {{ rephrased_query }}
Table: {{ table_name }}
Schema:
{{ schema }}

Failed query:
{{ original_query }}

Error message:
{{ error_message }}

Write a corrected ClickHouse SQL query that answers the question.
Return only the SQL statement, with no explanation and no markdown formatting."#;

const DEFAULT_SUMMARIZATION: &str = r#"A user asked: {{ user_query }}

The database returned:
{{ sql_output }}

Summarize the result in a few sentences that directly answer the user's question."#;

#[derive(Debug, Deserialize)]
struct TemplateEntry {
    template: String,
}

#[derive(Debug, Deserialize)]
struct PromptFile {
    prompts: HashMap<String, TemplateEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplates {
    pub rephrase_user_query: String,
    pub query_generation: String,
    pub retry_query: String,
    pub summarization: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            rephrase_user_query: DEFAULT_REPHRASE.to_string(),
            query_generation: DEFAULT_GENERATION.to_string(),
            retry_query: DEFAULT_RETRY.to_string(),
            summarization: DEFAULT_SUMMARIZATION.to_string(),
        }
    }
}

impl PromptTemplates {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NlqError::Config(format!("Failed to read prompts file {}: {}", path.display(), e))
        })?;
        let templates = Self::from_yaml(&text)?;
        info!("Loaded prompt templates from {}", path.display());
        Ok(templates)
    }

    /// All four templates must be present.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let mut file: PromptFile = serde_yaml::from_str(text)?;
        let mut take = |name: &str| {
            file.prompts
                .remove(name)
                .map(|entry| entry.template)
                .ok_or_else(|| NlqError::Config(format!("Prompt template '{}' is missing", name)))
        };

        Ok(Self {
            rephrase_user_query: take(REPHRASE_USER_QUERY)?,
            query_generation: take(QUERY_GENERATION)?,
            retry_query: take(RETRY_QUERY)?,
            summarization: take(SUMMARIZATION)?,
        })
    }

    /// Build the user prompt for an instruction.
    pub fn render(&self, instruction: &Instruction) -> String {
        match instruction {
            Instruction::Classify { user_query } => {
                fill(&self.rephrase_user_query, &[("user_query", user_query)])
            }
            Instruction::Generate {
                rephrased_query,
                table_name,
                schema,
            } => {
                let schema_json = schema.to_prompt_json(table_name);
                let prompt = fill(
                    &self.query_generation,
                    &[("table_name", table_name), ("schema", &schema_json)],
                );
                format!("{}\n\nQuestion: {}", prompt, rephrased_query)
            }
            Instruction::Repair {
                error_message,
                original_sql,
                table_name,
                schema,
                rephrased_query,
            } => {
                let schema_json = schema.to_prompt_json(table_name);
                fill(
                    &self.retry_query,
                    &[
                        ("error_message", error_message),
                        ("original_query", original_sql),
                        ("table_name", table_name),
                        ("schema", &schema_json),
                        ("rephrased_query", rephrased_query),
                    ],
                )
            }
            Instruction::Summarize {
                user_query,
                sql_output,
            } => fill(
                &self.summarization,
                &[("user_query", user_query), ("sql_output", sql_output)],
            ),
        }
    }
}

/// Literal `{{ name }}` substitution, applied in order.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    values.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{{ {} }}}}", name), value)
    })
}
