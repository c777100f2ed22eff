use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use text_to_sql::envelope::{render_text, QueryEnvelope};
use text_to_sql::execution::ClickHouseEngine;
use text_to_sql::llm::LlmClient;
use text_to_sql::prompts::PromptTemplates;
use text_to_sql::{AppConfig, QueryOrchestrator, SchemaResolver, Session};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const BANNER: &str = "==================================================";

#[derive(Parser)]
#[command(name = "text-to-sql")]
#[command(about = "Ask questions about a ClickHouse table in natural language")]
struct Args {
    /// Question to answer; omit for an interactive session
    query: Option<String>,

    /// Table to query (skips the interactive table picker)
    #[arg(short, long)]
    table: Option<String>,

    /// Repair attempts after a failed execution (or set NLQ_MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// YAML prompt templates (or set NLQ_PROMPTS_PATH)
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Print the JSON envelope instead of text
    #[arg(long)]
    json: bool,

    /// OpenAI API key (or set OPENAI_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut config = AppConfig::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Some(api_key) = args.api_key.clone() {
        config.llm.api_key = api_key;
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(prompts) = args.prompts.clone() {
        config.prompts_path = Some(prompts);
    }

    let templates = match &config.prompts_path {
        Some(path) => PromptTemplates::load(path)?,
        None => PromptTemplates::default(),
    };
    let executor = Arc::new(ClickHouseEngine::new(&config.clickhouse)?);
    let reasoner = Arc::new(LlmClient::new(&config.llm, templates)?);
    let resolver = SchemaResolver::new(executor.clone());
    let orchestrator = QueryOrchestrator::new(reasoner, executor).with_max_retries(config.max_retries);

    info!("Text-to-SQL starting (model {})", config.llm.model);

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut session = Session::new();

    match &args.table {
        Some(table) => {
            resolver
                .select_table(&mut session, table)
                .await
                .with_context(|| format!("Could not retrieve schema for table {}", table))?;
        }
        None => pick_table(&resolver, &mut session, &mut stdin).await?,
    }

    if let Some(query) = &args.query {
        let envelope = orchestrator.ask(&session, query).await;
        print_envelope(&envelope, args.json);
        if envelope.error().is_some() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let table = session.selected_table().unwrap_or_default().to_string();
    loop {
        println!("\n{}", BANNER);
        println!("Querying table: {}", table);
        println!("{}", BANNER);
        println!("Enter your query in natural language (or 'exit' to quit):");

        let Some(line) = prompt_line(&mut stdin, "> ").await? else {
            break;
        };
        let user_query = line.trim();
        if user_query.eq_ignore_ascii_case("exit") {
            break;
        }
        if user_query.is_empty() {
            continue;
        }

        println!("\nProcessing your query...");
        let envelope = orchestrator.ask(&session, user_query).await;
        print_envelope(&envelope, args.json);
    }

    Ok(())
}

async fn pick_table(
    resolver: &SchemaResolver,
    session: &mut Session,
    stdin: &mut Lines<BufReader<Stdin>>,
) -> Result<()> {
    println!("\n{}", BANNER);
    println!("Text-to-SQL Query Executor");
    println!("{}", BANNER);

    let tables = resolver.list_tables().await?;
    if tables.is_empty() {
        bail!("No tables available in the database");
    }
    println!("Available tables:");
    for (i, table) in tables.iter().enumerate() {
        println!("{}. {}", i + 1, table);
    }

    loop {
        let Some(line) = prompt_line(stdin, "Enter the number of the table you want to query: ").await? else {
            bail!("No table selected");
        };
        let selection = match line.trim().parse::<usize>() {
            Ok(n) if (1..=tables.len()).contains(&n) => n,
            Ok(_) => {
                println!("Invalid selection. Please try again.");
                continue;
            }
            Err(_) => {
                println!("Please enter a valid number.");
                continue;
            }
        };

        let table = &tables[selection - 1];
        println!("Selected table: {}", table);
        if let Err(e) = resolver.select_table(session, table).await {
            error!("Schema lookup failed: {}", e);
            bail!("Could not retrieve schema for table {}: {}", table, e);
        }
        return Ok(());
    }
}

async fn prompt_line(stdin: &mut Lines<BufReader<Stdin>>, prompt: &str) -> Result<Option<String>> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(prompt.as_bytes()).await?;
    stdout.flush().await?;
    Ok(stdin.next_line().await?)
}

fn print_envelope(envelope: &QueryEnvelope, json: bool) {
    if json {
        println!("{}", envelope.to_json_pretty());
    } else {
        println!("\n{}", render_text(envelope));
    }
}
