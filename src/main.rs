//! rustexperts - incremental research-experts harvester
//!
//! Fetches organisational units, persons and research outputs from an
//! experts API, merges them into a person × publication table and tags
//! new publications with Sustainable Development Goals.
//!
//! ## Usage
//!
//! ```bash
//! EXPERTS_API_URL=https://experts.example.edu/ws/api EXPERTS_API_KEY=... rustexperts
//! rustexperts status --data-dir ./data
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rustexperts::classifier::{LlmClassifier, LlmConfig, SdgClassifier};
use rustexperts::config::{DataLayout, PipelineConfig, API_KEY_ENV, API_URL_ENV, DEFAULT_PAGE_SIZE};
use rustexperts::pipeline::{self, ClassificationStage, Pipeline, RunSummary, StreamStatus};
use rustexperts::sdg::ClassifyOutcome;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Incremental research-experts harvester with SDG classification
#[derive(Parser)]
#[command(name = "rustexperts")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory holding every table, offset file and the run lock
    #[arg(long, global = true, default_value = "./data")]
    data_dir: PathBuf,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one incremental update (default)
    Run,
    /// Show stored offsets and table sizes
    Status,
}

#[derive(clap::Args)]
struct RunArgs {
    /// Experts API root, e.g. https://experts.example.edu/ws/api
    #[arg(long, env = API_URL_ENV, global = true)]
    base_url: Option<String>,

    /// Experts API key
    #[arg(long, env = API_KEY_ENV, global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Items per page
    #[arg(long, global = true, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: u64,

    /// Restrict persons and research outputs to this organisational unit (repeatable)
    #[arg(long = "org-unit", global = true)]
    org_units: Vec<String>,

    // === SDG Classification ===
    /// LLM API base URL (enables classification, e.g., https://api.openai.com/v1)
    #[arg(long, env = "LLM_BASE_URL", global = true)]
    llm_base_url: Option<String>,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", global = true, hide_env_values = true)]
    llm_key: Option<String>,

    /// LLM model name
    #[arg(long, global = true, default_value = "gpt-4o-mini")]
    llm_model: String,

    // === Journal Rankings ===
    /// Journal ranking sheet (CSV with title, issn, rank)
    #[arg(long, global = true)]
    journals: Option<PathBuf>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let layout = DataLayout::new(cli.data_dir);
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_update(layout, cli.run).await,
        Commands::Status => show_status(&layout),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn llm_config(args: &RunArgs) -> Option<LlmConfig> {
    match (&args.llm_base_url, &args.llm_key) {
        (Some(base_url), Some(api_key)) => Some(LlmConfig {
            base_url: base_url.clone(),
            api_key: api_key.clone(),
            model: args.llm_model.clone(),
        }),
        _ => None,
    }
}

async fn run_update(layout: DataLayout, args: RunArgs) -> Result<()> {
    let Some(api_url) = args.base_url.clone() else {
        bail!("No experts API URL (set {} or pass --base-url)", API_URL_ENV);
    };
    let Some(api_key) = args.api_key.clone() else {
        bail!("No experts API key (set {} or pass --api-key)", API_KEY_ENV);
    };

    let classifier = llm_config(&args)
        .map(LlmClassifier::new)
        .transpose()
        .context("Failed to create LLM classifier")?;
    if let Some(c) = &classifier {
        info!(model = c.model(), "SDG classification enabled");
    }

    let config = PipelineConfig {
        layout,
        api_url,
        api_key,
        page_size: args.page_size,
        org_units: args.org_units,
        journals: args.journals,
    };

    println!("Data directory: {}", config.layout.root().display());
    let pipeline = Pipeline::new(config).context("Invalid pipeline configuration")?;
    let summary = pipeline
        .run(classifier.as_ref().map(|c| c as &dyn SdgClassifier))
        .await
        .context("Pipeline run failed")?;

    print_summary(&summary);

    if let Some(c) = &classifier {
        let usage = c.token_usage();
        println!(
            "LLM tokens: {} prompt + {} completion = {} total",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        );
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\n=== Summary ===");
    for s in &summary.streams {
        let status = match &s.status {
            StreamStatus::HasNewData => "updated",
            StreamStatus::NoNewData => "no new data",
            StreamStatus::FetchFailed(_) => "fetch failed",
        };
        println!(
            "{:<22} {:<13} +{} rows ({} stored), offset {}",
            s.stream.name(),
            status,
            s.inserted,
            s.table_rows,
            s.offset
        );
    }

    match &summary.merge {
        Some(m) => println!("merged                 +{} rows ({} total)", m.rows_added, m.total_rows),
        None => println!("merged                 unchanged"),
    }

    match &summary.classification {
        ClassificationStage::Skipped(reason) => println!("classification         skipped ({})", reason),
        ClassificationStage::Ran(ClassifyOutcome::NothingToClassify) => {
            println!("classification         nothing new")
        }
        ClassificationStage::Ran(ClassifyOutcome::Classified { added, total }) => {
            println!("classification         +{} rows ({} total)", added, total)
        }
        ClassificationStage::Ran(ClassifyOutcome::Failed { pending, .. }) => {
            println!("classification         failed, {} pending", pending)
        }
    }

    if let Some(r) = &summary.ranking {
        println!("rankings               {} / {} matched", r.matched, r.articles);
    }
}

fn show_status(layout: &DataLayout) -> Result<()> {
    let report = pipeline::status(layout).context("Failed to read data directory")?;

    println!("Data directory: {}", layout.root().display());
    println!("\nOffsets:");
    for (stream, offset) in &report.offsets {
        println!("  {:<22} {}", stream.name(), offset);
    }
    println!("\nTables:");
    for (name, rows) in &report.tables {
        println!("  {:<38} {} rows", name, rows);
    }
    Ok(())
}
