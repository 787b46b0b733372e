//! datagate CLI - operator entrypoint over the data-access facade
//!
//! Every subcommand connects to the configured engine, runs one facade
//! operation and prints the result as JSON on stdout.

mod commands;

use clap::{Parser, Subcommand};
use commands::{
    CountCommand, CreateCommand, DeleteCommand, FindCommand, GateArgs, GetCommand, InitCommand,
    PingCommand, QueryCommand, SetCommand, SumCommand, UpdateCommand,
};
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DATAGATE_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "DATAGATE_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(flatten)]
    gate: GateArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create storage for every catalog collection
    Init(InitCommand),
    /// Check that the engine is reachable
    Ping(PingCommand),
    /// Fetch one record by id
    Get(GetCommand),
    /// Fetch the first record matching a predicate
    Find(FindCommand),
    /// Filtered, searched, sorted and paginated read
    Query(QueryCommand),
    /// Count records matching a filter
    Count(CountCommand),
    /// Sum a numeric field over records matching a filter
    Sum(SumCommand),
    /// Insert one record, or many from a JSON array
    Create(CreateCommand),
    /// Merge a partial record into an existing one
    Update(UpdateCommand),
    /// Replace a nested value inside a JSON field
    Set(SetCommand),
    /// Delete a record by id
    Delete(DeleteCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise datagate crates at the requested level and
    // driver internals at warn
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?,
        Err(_) => tracing_subscriber::EnvFilter::new(format!(
            "datagate={level},\
             datagate_cli={level},\
             datagate_postgres={level},\
             datagate_mysql={level},\
             datagate_mongodb={level},\
             sqlx=warn,\
             mongodb=warn",
            level = cli.log_level
        )),
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global default subscriber: {}", e))?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let gate = cli.gate.connect().await?;
        let outcome = match cli.command {
            Commands::Init(cmd) => cmd.execute(&gate).await,
            Commands::Ping(cmd) => cmd.execute(&gate).await,
            Commands::Get(cmd) => cmd.execute(&gate).await,
            Commands::Find(cmd) => cmd.execute(&gate).await,
            Commands::Query(cmd) => cmd.execute(&gate).await,
            Commands::Count(cmd) => cmd.execute(&gate).await,
            Commands::Sum(cmd) => cmd.execute(&gate).await,
            Commands::Create(cmd) => cmd.execute(&gate).await,
            Commands::Update(cmd) => cmd.execute(&gate).await,
            Commands::Set(cmd) => cmd.execute(&gate).await,
            Commands::Delete(cmd) => cmd.execute(&gate).await,
        };
        let closed = gate.close().await;
        settle(outcome, closed)
    })
}

/// The command's own result wins over a failed shutdown, which is only logged
fn settle(outcome: anyhow::Result<()>, closed: datagate::Result<()>) -> anyhow::Result<()> {
    match (outcome, closed) {
        (Err(e), Err(close_err)) => {
            warn!("Failed to close connection after error: {}", close_err);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), closed) => Ok(closed?),
    }
}
