//! GraphRAG CLI: validate and run Cypher through the query guard
//!
//! Connection settings come from the environment and `.env`
//! (`NEO4J_URI`, `NEO4J_USER`, `NEO4J_PASSWORD`, ...).

use clap::{Parser, Subcommand};
use comfy_table::{ContentArrangement, Table};
use graphrag::config::Settings;
use graphrag::guard::{StageStatus, ValidationReport};
use graphrag::nlq::FewShotExample;
use graphrag::{
    check_read_only, AskOptions, ConnectionProvider, ExecutionPolicy, GraphSchema, NLQPipeline,
    OutputMode, QueryExecutor, Row, ValidationPipeline, ValidationPolicy,
};
use std::sync::Arc;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "graphrag", version, about = "GraphRAG Cypher query guard")]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Database name (defaults to NEO4J_DATABASE, then the server default)
    #[arg(long, global = true)]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, clap::ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a query as read-only or not (offline)
    Check {
        /// The Cypher query string
        cypher: String,
    },
    /// Run the full validation pipeline and print the report
    Validate {
        cypher: String,

        /// Report failures instead of exiting with an error
        #[arg(long)]
        lenient: bool,

        /// Accept an unavailable structural checker
        #[arg(long)]
        allow_unchecked: bool,
    },
    /// Validate and execute a read-only query
    Run {
        cypher: String,

        /// Skip structural validation (the read-only gate still applies)
        #[arg(long)]
        skip_validation: bool,
    },
    /// Generate a query from a question
    Ask {
        question: String,

        /// Execute the generated query
        #[arg(long)]
        execute: bool,

        /// json, chat or both
        #[arg(long, default_value = "json")]
        output: String,

        /// Few-shot example as "question=>cypher" (repeatable)
        #[arg(long = "example")]
        examples: Vec<String>,
    },
    /// Print the database schema
    Schema,
    /// Start an interactive REPL
    Shell,
}

#[tokio::main]
async fn main() {
    graphrag::init_tracing("info");
    let cli = Cli::parse();

    let result = match Settings::from_env() {
        Ok(settings) => dispatch(cli, settings).await,
        Err(e) => Err(e.into()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli, settings: Settings) -> CliResult<()> {
    match cli.command {
        Commands::Check { cypher } => run_check(&cypher, &cli.format),
        Commands::Validate {
            cypher,
            lenient,
            allow_unchecked,
        } => {
            let mut policy = if lenient {
                ValidationPolicy::lenient()
            } else {
                ValidationPolicy::default()
            };
            policy.allow_unchecked = allow_unchecked || settings.validation.allow_unchecked;
            policy.database = cli.database.clone();
            run_validate(&settings, &cypher, &policy, &cli.format).await
        }
        Commands::Run {
            cypher,
            skip_validation,
        } => {
            let executor = connect_executor(&settings).await?;
            let policy = execution_policy(&settings, skip_validation, cli.database.as_deref());
            run_query(&executor, &cypher, &policy, &cli.format).await
        }
        Commands::Ask {
            question,
            execute,
            output,
            examples,
        } => {
            let output: OutputMode = output.parse()?;
            let examples = parse_examples(&examples)?;
            run_ask(&settings, &question, execute, output, examples, cli.database.as_deref()).await
        }
        Commands::Schema => run_schema(&settings, cli.database.as_deref(), &cli.format).await,
        Commands::Shell => run_shell(&settings, cli.database.as_deref(), &cli.format).await,
    }
}

fn provider(settings: &Settings) -> CliResult<Arc<ConnectionProvider>> {
    Ok(Arc::new(ConnectionProvider::from_settings(&settings.database)?))
}

async fn connect_executor(settings: &Settings) -> CliResult<QueryExecutor> {
    Ok(QueryExecutor::connect(provider(settings)?).await)
}

fn execution_policy(
    settings: &Settings,
    skip_validation: bool,
    database: Option<&str>,
) -> ExecutionPolicy {
    let mut policy = ExecutionPolicy::from_settings(&settings.validation);
    policy.skip_validation |= skip_validation;
    policy.database = database.map(str::to_string);
    policy
}

fn parse_examples(raw: &[String]) -> CliResult<Vec<FewShotExample>> {
    raw.iter()
        .map(|example| {
            example
                .split_once("=>")
                .map(|(q, c)| FewShotExample::new(q.trim(), c.trim()))
                .ok_or_else(|| {
                    Box::<dyn std::error::Error>::from(format!(
                        "example must be \"question=>cypher\": {example}"
                    ))
                })
        })
        .collect()
}

fn run_check(cypher: &str, format: &OutputFormat) -> CliResult<()> {
    let finding = check_read_only(cypher);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&finding)?),
        _ => {
            if finding.is_read_only {
                println!("read-only");
            } else {
                let ops: Vec<&str> = finding.detected_operations.iter().map(|op| op.as_str()).collect();
                println!("not read-only: {}", ops.join(", "));
            }
        }
    }
    Ok(())
}

async fn run_validate(
    settings: &Settings,
    cypher: &str,
    policy: &ValidationPolicy,
    format: &OutputFormat,
) -> CliResult<()> {
    let pipeline = ValidationPipeline::connect(provider(settings)?).await;
    let (is_valid, report) = pipeline.validate(cypher, policy).await?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_report(&report),
    }
    if !is_valid {
        return Err("query is not valid".into());
    }
    Ok(())
}

fn status_text(status: &StageStatus) -> String {
    match status {
        StageStatus::NotRun => "not run".to_string(),
        StageStatus::Passed => "passed".to_string(),
        StageStatus::Failed => "FAILED".to_string(),
        StageStatus::Skipped { reason } => format!("skipped ({reason})"),
    }
}

fn print_report(report: &ValidationReport) {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["stage", "status", "detail"]);

    let violations: Vec<&str> = report.read_only_violations.iter().map(|op| op.as_str()).collect();
    table.add_row(vec![
        "read-only".to_string(),
        status_text(&report.read_only),
        violations.join(", "),
    ]);
    table.add_row(vec![
        "syntax".to_string(),
        status_text(&report.syntax),
        metadata_text(&report.syntax_metadata),
    ]);
    table.add_row(vec![
        "schema".to_string(),
        status_text(&report.schema),
        format_score(report.schema_score.map(|s| s.to_string()), &report.schema_metadata),
    ]);
    table.add_row(vec![
        "properties".to_string(),
        status_text(&report.properties),
        format_score(report.property_score.map(|s| s.to_string()), &report.property_metadata),
    ]);

    println!("{}", table);
    if report.is_partially_checked() {
        println!("valid (structural stages skipped)");
    } else if report.is_valid {
        println!("valid");
    } else {
        println!("invalid");
    }
}

fn metadata_text(metadata: &graphrag::guard::Metadata) -> String {
    if metadata.is_empty() {
        String::new()
    } else {
        serde_json::Value::Object(metadata.clone()).to_string()
    }
}

fn format_score(score: Option<String>, metadata: &graphrag::guard::Metadata) -> String {
    match score {
        Some(score) => format!("score {} {}", score, metadata_text(metadata)),
        None => metadata_text(metadata),
    }
}

async fn run_query(
    executor: &QueryExecutor,
    cypher: &str,
    policy: &ExecutionPolicy,
    format: &OutputFormat,
) -> CliResult<()> {
    let rows = executor.run(cypher, policy).await?;
    print_rows(&rows, format)
}

fn print_rows(rows: &[Row], format: &OutputFormat) -> CliResult<()> {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.keys().cloned().collect())
        .unwrap_or_default();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows)?);
        }
        OutputFormat::Csv => {
            if !columns.is_empty() {
                println!("{}", columns.join(","));
                for row in rows {
                    let cells: Vec<String> = row.values().map(format_csv_value).collect();
                    println!("{}", cells.join(","));
                }
            }
        }
        OutputFormat::Table => {
            if columns.is_empty() {
                println!("(no results)");
                return Ok(());
            }

            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(&columns);

            for row in rows {
                let cells: Vec<String> = row.values().map(format_table_value).collect();
                table.add_row(cells);
            }

            println!("{}", table);
            println!("{} row(s)", rows.len());
        }
    }

    Ok(())
}

async fn run_ask(
    settings: &Settings,
    question: &str,
    execute: bool,
    output: OutputMode,
    examples: Vec<FewShotExample>,
    database: Option<&str>,
) -> CliResult<()> {
    let mut pipeline = NLQPipeline::new(settings.nlq.clone())?;

    let schema = match provider(settings) {
        Ok(provider) => {
            let schema = match GraphSchema::fetch(&provider, database).await {
                Ok(schema) => schema.to_prompt_text(),
                Err(e) => {
                    eprintln!("warning: schema unavailable: {}", e);
                    String::new()
                }
            };
            if execute {
                pipeline = pipeline.with_executor(QueryExecutor::connect(provider).await);
            }
            schema
        }
        Err(e) if execute => return Err(e),
        Err(_) => String::new(),
    };

    let options = AskOptions {
        schema,
        examples,
        execute,
        output,
        policy: execution_policy(settings, false, database),
    };
    let answer = pipeline.answer(question, &options).await?;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

async fn run_schema(
    settings: &Settings,
    database: Option<&str>,
    format: &OutputFormat,
) -> CliResult<()> {
    let provider = provider(settings)?;
    let schema = GraphSchema::fetch(&provider, database).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&schema)?),
        _ => print!("{}", schema.to_prompt_text()),
    }
    Ok(())
}

async fn run_shell(
    settings: &Settings,
    database: Option<&str>,
    format: &OutputFormat,
) -> CliResult<()> {
    let executor = connect_executor(settings).await?;
    let policy = execution_policy(settings, false, database);

    println!("GraphRAG Interactive Shell");
    println!("Type Cypher queries, or :help for commands. :quit to exit.\n");

    let stdin = std::io::stdin();
    let mut line = String::new();

    loop {
        eprint!("graphrag> ");

        line.clear();
        if stdin.read_line(&mut line)? == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match trimmed {
            ":quit" | ":exit" | ":q" => break,
            ":help" | ":h" => {
                println!("Commands:");
                println!("  :check <cypher>  Classify without executing");
                println!("  :schema          Show the database schema");
                println!("  :quit            Exit shell");
                println!("  <cypher>         Validate and execute a Cypher query");
            }
            ":schema" => {
                match GraphSchema::fetch(executor.provider(), database).await {
                    Ok(schema) => print!("{}", schema.to_prompt_text()),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
            cmd if cmd.starts_with(":check ") => {
                if let Err(e) = run_check(&cmd[":check ".len()..], format) {
                    eprintln!("Error: {}", e);
                }
            }
            cypher => {
                if let Err(e) = run_query(&executor, cypher, &policy, format).await {
                    eprintln!("Error: {}", e);
                }
            }
        }
    }

    println!("Bye!");
    Ok(())
}

fn format_table_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
            serde_json::to_string(v).unwrap_or_default()
        }
    }
}

fn format_csv_value(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "".to_string(),
        serde_json::Value::String(s) => {
            if s.contains(',') || s.contains('"') || s.contains('\n') {
                format!("\"{}\"", s.replace('"', "\"\""))
            } else {
                s.clone()
            }
        }
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        _ => {
            let json = serde_json::to_string(v).unwrap_or_default();
            format!("\"{}\"", json.replace('"', "\"\""))
        }
    }
}
