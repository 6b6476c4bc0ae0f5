//! bedrock-usage CLI
//!
//! Serves the MCP tools over stdio, or runs the same reports once from the
//! command line.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use bedrock_usage::aggregator;
use bedrock_usage::config::LoggingConfig;
use bedrock_usage::mcp::tools::tools_list;
use bedrock_usage::mcp::McpServer;
use bedrock_usage::models::{AggregateRow, GroupBy, LogEntry, UsageParams, UsageTotals};
use bedrock_usage::pipeline::UsagePipeline;
use bedrock_usage::Config;
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// bedrock-usage - Token usage reports from Bedrock invocation logs
#[derive(Parser)]
#[command(name = "bedrock-usage")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "BEDROCK_USAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (for commands that support it)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// AWS region, overriding config and the SDK default chain
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    /// CloudWatch log group holding the invocation logs
    #[arg(long, global = true)]
    log_group: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, Debug, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum Dimension {
    Model,
    User,
    Day,
}

impl From<Dimension> for GroupBy {
    fn from(dimension: Dimension) -> Self {
        match dimension {
            Dimension::Model => GroupBy::Model,
            Dimension::User => GroupBy::User,
            Dimension::Day => GroupBy::Day,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the MCP tools over stdio (default)
    Serve,

    /// Show normalized invocation rows
    Logs {
        #[command(flatten)]
        window: WindowArgs,

        /// Read log documents from a JSON file instead of CloudWatch
        #[arg(long, conflicts_with_all = ["days", "last", "start_time", "end_time", "filter"])]
        input: Option<PathBuf>,
    },

    /// Show aggregated token usage
    Usage {
        /// Dimension to group by
        #[arg(long, value_enum, default_value = "model")]
        by: Dimension,

        #[command(flatten)]
        window: WindowArgs,

        /// Read log documents from a JSON file instead of CloudWatch
        #[arg(long, conflicts_with_all = ["days", "last", "start_time", "end_time", "filter"])]
        input: Option<PathBuf>,
    },

    /// List the MCP tools this server exposes
    Tools,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
struct WindowArgs {
    /// Days to look back from --end-time (or now)
    #[arg(long, conflicts_with_all = ["start_time", "last"])]
    days: Option<u32>,

    /// Look-back as a duration (e.g. "6h", "2days")
    #[arg(long, conflicts_with = "start_time", value_parser = humantime::parse_duration)]
    last: Option<std::time::Duration>,

    /// Inclusive window start (RFC 3339)
    #[arg(long)]
    start_time: Option<DateTime<Utc>>,

    /// Inclusive window end (RFC 3339), defaults to now
    #[arg(long)]
    end_time: Option<DateTime<Utc>>,

    /// CloudWatch Logs filter pattern
    #[arg(long)]
    filter: Option<String>,
}

impl WindowArgs {
    fn into_params(self) -> anyhow::Result<UsageParams> {
        let mut params = UsageParams {
            days: self.days,
            start_time: self.start_time,
            end_time: self.end_time,
            filter_pattern: self.filter,
        };

        if let Some(last) = self.last {
            let end = params.end_time.unwrap_or_else(Utc::now);
            let span = chrono::Duration::from_std(last).context("--last is out of range")?;
            params.start_time = Some(end - span);
            params.end_time = Some(end);
        }

        Ok(params)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(region) = cli.region {
        config.aws.region = Some(region);
    }
    if let Some(log_group) = cli.log_group {
        config.logs.log_group_name = log_group;
    }

    // Initialize logging; the guard flushes the file writer on exit
    let _guard = init_logging(&config.logging, cli.verbose);

    // Execute command
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(&config).await,
        Commands::Logs { window, input } => run_logs(&config, window, input, cli.format).await,
        Commands::Usage { by, window, input } => {
            run_usage(&config, by.into(), window, input, cli.format).await
        }
        Commands::Tools => run_tools(&config, cli.format),
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Install the global subscriber. stdout is left to the MCP transport, so
/// console output always goes to stderr.
fn init_logging(logging: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = if verbose {
        EnvFilter::new(level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    let json = logging.format.eq_ignore_ascii_case("json");

    let stderr = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).boxed()
    };

    let (file, guard) = match &logging.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, "bedrock-usage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .init();

    guard
}

async fn run_serve(config: &Config) -> anyhow::Result<()> {
    info!(
        log_group = %config.logs.log_group_name,
        region = config.aws.region.as_deref().unwrap_or("default"),
        "Starting MCP server"
    );

    let pipeline = UsagePipeline::from_config(config).await;
    McpServer::new(pipeline).serve_stdio().await?;

    Ok(())
}

async fn run_logs(
    config: &Config,
    window: WindowArgs,
    input: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (entries, skipped) = match input {
        Some(path) => {
            let report = aggregator::aggregate_json(&read_json(&path)?)?;
            (report.entries, report.skipped)
        }
        None => {
            let pipeline = UsagePipeline::from_config(config).await;
            let query = pipeline.resolve(window.into_params()?)?;
            let response = pipeline.get_raw_logs(&query).await?;
            (response.entries, response.skipped)
        }
    };

    match format {
        OutputFormat::Json => {
            let body = json!({ "count": entries.len(), "skipped": skipped, "entries": entries });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => print_entries(&entries, skipped),
    }

    Ok(())
}

async fn run_usage(
    config: &Config,
    group_by: GroupBy,
    window: WindowArgs,
    input: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let (rows, totals, skipped) = match input {
        Some(path) => {
            let report = aggregator::aggregate_json(&read_json(&path)?)?;
            let totals = report.totals.clone();
            let skipped = report.skipped;
            (report.into_table(group_by), totals, skipped)
        }
        None => {
            let pipeline = UsagePipeline::from_config(config).await;
            let query = pipeline.resolve(window.into_params()?)?;
            let response = pipeline.get_usage(&query, group_by).await?;
            (response.rows, response.totals, response.skipped)
        }
    };

    match format {
        OutputFormat::Json => {
            let body = json!({
                "group_by": group_by,
                "skipped": skipped,
                "totals": totals,
                "rows": rows,
            });
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Text => print_rows(group_by, &rows, &totals, skipped),
    }

    Ok(())
}

fn run_tools(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let list = tools_list(config.logs.default_days);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
        OutputFormat::Text => {
            for tool in list.tools {
                println!("{:<24} {}", tool.name, tool.description);
            }
        }
    }

    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn print_entries(entries: &[LogEntry], skipped: usize) {
    println!(
        "{:<20} {:<40} {:<40} {:>8} {:>8} {:>8}",
        "TIMESTAMP", "MODEL", "USER", "IN", "OUT", "TOTAL"
    );
    for entry in entries {
        println!(
            "{:<20} {:<40} {:<40} {:>8} {:>8} {:>8}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.model_id.as_deref().unwrap_or("-"),
            entry.user_identity.as_deref().unwrap_or("-"),
            entry.input_tokens,
            entry.output_tokens,
            entry.total_tokens,
        );
    }
    println!();
    println!("{} entries, {} skipped", entries.len(), skipped);
}

fn print_rows(group_by: GroupBy, rows: &[AggregateRow], totals: &UsageTotals, skipped: usize) {
    println!(
        "{:<40} {:>8} {:>10} {:>10} {:>10} {:>10} {:>12}",
        group_by.key_label().to_uppercase(),
        "CALLS",
        "IN",
        "OUT",
        "TOTAL",
        "AVG TOTAL",
        "AVG LAT(ms)"
    );
    for row in rows {
        println!(
            "{:<40} {:>8} {:>10} {:>10} {:>10} {:>10.2} {:>12.2}",
            row.key,
            row.invocation_count,
            row.input_tokens,
            row.output_tokens,
            row.total_tokens,
            row.avg_total_tokens,
            row.avg_latency_ms,
        );
        if !row.models.is_empty() {
            println!("    models: {}", row.models.join(", "));
        }
    }
    println!();
    println!(
        "{} invocations, {} tokens ({} in / {} out), {} skipped",
        totals.invocation_count, totals.total_tokens, totals.input_tokens, totals.output_tokens, skipped
    );
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "bedrock-usage", &mut io::stdout());
}
