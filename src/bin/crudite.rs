//! crudite: run CRUD operations from the command line
//!
//! # Usage
//!
//! ```bash
//! # Create the tables declared in schema.toml
//! crudite --schema schema.toml --database-url sqlite://app.db?mode=rwc init
//!
//! # Create, then read back sorted by name
//! crudite create '{"_model": "User", "name": "Turner"}'
//! crudite read User --data '["name"]' --order name
//!
//! # Count per group
//! crudite count '{"_model": "User", "groupby": ["name"]}'
//!
//! # Weekly counts over January
//! crudite dates Event held_on --start 2017-01-01 --end 2017-01-31 --granularity week
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use crudite::prelude::*;
use crudite::query::referenced_models;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crudite")]
#[command(version)]
#[command(about = "JSON-described CRUD over SQLite and PostgreSQL", long_about = None)]
#[command(after_help = "EXAMPLES:
    crudite init --drop
    crudite read '{\"_model\": \"User\", \"field\": \"name\", \"comparison\": \"istartswith\", \"value\": \"tur\"}'
    crudite update '{\"_model\": \"User\", \"value\": \"<id>\"}' '{\"name\": \"Ninja\"}'")]
struct Cli {
    /// Config file (default: ./crudite.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database connection URL
    #[arg(long, env = "CRUDITE_DATABASE_URL")]
    database_url: Option<String>,

    /// Schema file declaring the models
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "pretty")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create every declared table
    Init {
        /// Drop existing tables first
        #[arg(long)]
        drop: bool,
    },
    /// Count matching rows
    Count { query: String },
    /// Read matching rows
    Read {
        query: String,
        /// Data specification
        #[arg(short, long)]
        data: Option<String>,
        /// Sort specification
        #[arg(short, long)]
        order: Option<String>,
        #[arg(short, long)]
        limit: Option<u64>,
        #[arg(long)]
        offset: Option<u64>,
    },
    /// Create rows from data mappings naming their `_model`
    Create { data: String },
    /// Update every matching row
    Update { query: String, data: String },
    /// Delete the single row each query matches
    Delete { query: String },
    /// Count matching rows per date bucket
    Dates {
        query: String,
        /// Date or timestamp attribute to bucket by
        field: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Window length, e.g. "3 days" (default: 1 month)
        #[arg(long)]
        interval: Option<String>,
        /// Bucket size (default: 1 day)
        #[arg(short, long)]
        granularity: Option<String>,
    },
    /// Show the crud spec of a model
    Spec { model: String },
    /// List the models a query references
    Models { query: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::discover(cli.config.as_deref())?;
    init_logging(&config);

    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(path) = &cli.schema {
        config.schema.path = Some(path.clone());
    }

    let registry = match &config.schema.path {
        Some(path) => SchemaFile::load(path)?.into_registry()?,
        None => Registry::default(),
    };
    if registry.is_empty() {
        eprintln!(
            "{}",
            "⚠ No models declared. Use --schema or [schema] path in crudite.toml".yellow()
        );
    }

    // answered from the schema alone
    match &cli.command {
        Commands::Spec { model } => {
            let Some(spec) = registry.resolve(model)?.crud_spec() else {
                bail!("model {} has no crud policy", model);
            };
            print_value(&spec, &cli.format);
            return Ok(());
        }
        Commands::Models { query } => {
            let models = referenced_models(&registry, &parse_query(query)?);
            print_value(&serde_json::json!(models), &cli.format);
            return Ok(());
        }
        _ => {}
    }

    let crud = Crud::connect_with(&config.database, registry).await?;

    match &cli.command {
        Commands::Init { drop } => {
            crud.initialize_db(*drop).await?;
            println!(
                "{} {} tables ready",
                "✓".green(),
                crud.registry().len().to_string().cyan()
            );
        }
        Commands::Count { query } => {
            let counts = crud.count(&parse_query(query)?).await?;
            print_value(&Value::Array(counts), &cli.format);
        }
        Commands::Dates {
            query,
            field,
            start,
            end,
            interval,
            granularity,
        } => {
            let mut range = DateRange::new();
            if let Some(start) = start {
                range = range.start(start.as_str());
            }
            if let Some(end) = end {
                range = range.end(end.as_str());
            }
            if let Some(interval) = interval {
                range = range.interval(Some(interval.parse()?));
            }
            let granularity = Interval::granularity(granularity.as_deref())?;
            let buckets = crud
                .count_by_date(&parse_query(query)?, field, &range, granularity)
                .await?;
            print_value(&Value::Array(buckets), &cli.format);
        }
        Commands::Read {
            query,
            data,
            order,
            limit,
            offset,
        } => {
            let data = parse_optional(data.as_deref())?;
            let order = parse_optional(order.as_deref())?;
            let page = crud
                .read(&parse_query(query)?, &data, &order, *limit, *offset)
                .await?;
            print_value(&page, &cli.format);
        }
        Commands::Create { data } => {
            let created = crud.create(&parse_json(data)?).await?;
            print_value(&Value::Array(created), &cli.format);
        }
        Commands::Update { query, data } => {
            crud.update(&parse_query(query)?, &parse_json(data)?).await?;
            println!("{} updated", "✓".green());
        }
        Commands::Delete { query } => {
            let deleted = crud.delete(&parse_query(query)?).await?;
            println!("{} {} rows deleted", "✓".green(), deleted.to_string().cyan());
        }
        Commands::Spec { .. } | Commands::Models { .. } => {}
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_json(text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("invalid JSON: {}", text))
}

/// Queries may be bare model names.
fn parse_query(text: &str) -> Result<Value> {
    Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

fn parse_optional(text: Option<&str>) -> Result<Value> {
    match text {
        Some(text) => parse_query(text),
        None => Ok(Value::Null),
    }
}

fn print_value(value: &Value, format: &OutputFormat) {
    match format {
        OutputFormat::Json => println!("{}", value),
        OutputFormat::Pretty => {
            println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
            if let Some(total) = value.get("total") {
                let shown = value
                    .get("results")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                println!();
                println!(
                    "{} of {} row(s) returned",
                    shown.to_string().cyan(),
                    total.to_string().cyan()
                );
            }
        }
    }
}
