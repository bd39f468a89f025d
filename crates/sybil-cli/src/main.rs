use clap::{ArgAction, Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use sybil_analysis::scorer::SuspicionReason;
use sybil_analysis::{DetectorConfig, Finding, Pipeline, PipelineError};
use sybil_data::events::{parse_event_lines, DEFAULT_TOKEN_DECIMALS};
use sybil_data::{Store, TransferStore};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct AppContext {
    db_path: String,
}

#[derive(Parser, Debug)]
#[command(name = "sybil-watch")]
#[command(about = "Incremental Sybil and wash-trading cluster detection over transfer streams")]
#[command(version)]
struct Cli {
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    #[arg(long, global = true, default_value = "data/sybil.sqlite")]
    db_path: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Feed a JSON-lines file of transfers or ERC-20 logs through the pipeline.
    Replay(ReplayArgs),
    /// Show stored record counts.
    Status,
    /// List persisted suspicious clusters.
    Clusters(ClustersArgs),
}

/// Arguments for the `replay` subcommand.
///
/// Config values come from `--config` (if given) and are then overridden
/// by any explicit flag.
#[derive(Args, Debug)]
struct ReplayArgs {
    /// JSON-lines input, one transfer event or transaction log per line.
    #[arg(long)]
    input: PathBuf,

    /// JSON detector config file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    suspicion_ratio: Option<f64>,

    #[arg(long)]
    diversity_threshold: Option<f64>,

    #[arg(long)]
    retention_window: Option<usize>,

    #[arg(long)]
    max_iterations: Option<usize>,

    /// Token decimals used to scale raw ERC-20 log amounts.
    #[arg(long, default_value_t = DEFAULT_TOKEN_DECIMALS)]
    decimals: u8,

    /// Rewrite the graph as GraphML at this path after every batch.
    #[arg(long)]
    export_graphml: Option<PathBuf>,

    /// Process the final partial batch instead of leaving it pending.
    #[arg(long)]
    flush: bool,

    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[derive(Args, Debug)]
struct ClustersArgs {
    /// Output format: table (default) or json.
    #[arg(long, default_value = "table")]
    output: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet)?;

    let ctx = AppContext {
        db_path: cli.db_path,
    };

    match cli.command {
        Commands::Replay(args) => handle_replay(&ctx, args).await,
        Commands::Status => handle_status(&ctx),
        Commands::Clusters(args) => handle_clusters(&ctx, args),
    }
}

fn init_tracing(verbose: u8, quiet: bool) -> Result<()> {
    let level = if quiet {
        Level::WARN
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.as_str()))
        .wrap_err("failed to initialize tracing filter")?;

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn resolve_config(args: &ReplayArgs) -> Result<DetectorConfig> {
    let mut config = match &args.config {
        Some(path) => DetectorConfig::from_json_file(path)?,
        None => DetectorConfig::default(),
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(ratio) = args.suspicion_ratio {
        config.suspicion_ratio = ratio;
    }
    if let Some(threshold) = args.diversity_threshold {
        config.diversity_threshold = threshold;
    }
    if let Some(window) = args.retention_window {
        config.retention_window = window;
    }
    if let Some(max_iterations) = args.max_iterations {
        config.max_iterations = max_iterations;
    }

    config.validate()?;
    Ok(config)
}

async fn handle_replay(ctx: &AppContext, args: ReplayArgs) -> Result<()> {
    let config = resolve_config(&args)?;

    let contents = tokio::fs::read_to_string(&args.input)
        .await
        .wrap_err_with(|| format!("failed to read replay input {}", args.input.display()))?;
    let events = parse_event_lines(&contents, args.decimals)
        .wrap_err_with(|| format!("failed to parse replay input {}", args.input.display()))?;

    if ctx.db_path != ":memory:" {
        if let Some(parent) = Path::new(&ctx.db_path).parent() {
            ensure_dir(parent)?;
        }
    }
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let mut pipeline = Pipeline::new(store, config)?;
    if let Some(path) = &args.export_graphml {
        pipeline = pipeline.with_graphml_export(path);
    }

    let pb = ProgressBar::new(events.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} events {msg}",
        )
        .wrap_err("failed to create progress style")?
        .progress_chars("#>-"),
    );

    let mut findings: Vec<Finding> = Vec::new();
    let mut batches: u64 = 0;
    let mut rejected: u64 = 0;
    let mut failed: u64 = 0;

    for event in &events {
        match pipeline.try_handle_event(event) {
            Ok(Some(report)) => {
                batches += 1;
                pb.set_message(format!("batch {}", report.batch));
                findings = report.findings;
            }
            Ok(None) => {}
            Err(PipelineError::InvalidEvent { tx_hash, reason }) => {
                rejected += 1;
                tracing::debug!(%tx_hash, %reason, "event rejected");
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(error = %err, tx_hash = %event.tx_hash, "event handling failed");
            }
        }
        pb.inc(1);
    }

    if args.flush {
        // Drains records left unprocessed by earlier runs as well.
        loop {
            match pipeline.flush() {
                Ok(Some(report)) => {
                    batches += 1;
                    findings = report.findings;
                }
                Ok(None) => break,
                Err(err) => {
                    failed += 1;
                    tracing::warn!(error = %err, "final flush failed");
                    break;
                }
            }
        }
    }

    pb.finish_and_clear();

    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&findings)
                .wrap_err("failed to serialize findings to JSON")?;
            println!("{json}");
        }
        _ => {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            table.set_header(vec![
                "Community",
                "Members",
                "Intra Weight",
                "Inter Weight",
                "Reasons",
                "Sample Member",
            ]);

            for finding in &findings {
                let sample = finding.members.first().map(String::as_str).unwrap_or("-");
                table.add_row(vec![
                    &format!("{}", finding.community),
                    &format!("{}", finding.members.len()),
                    &format!("{:.4}", finding.intra_weight),
                    &format!("{:.4}", finding.inter_weight),
                    &describe_reasons(&finding.reasons),
                    &truncate_hash(sample),
                ]);
            }

            println!("\n{table}\n");

            let mut summary = Table::new();
            summary.load_preset(UTF8_BORDERS_ONLY);
            summary.set_header(vec!["Metric", "Value"]);
            summary.add_row(vec!["Events read", &format!("{}", events.len())]);
            summary.add_row(vec!["Events rejected", &format!("{rejected}")]);
            summary.add_row(vec!["Events failed", &format!("{failed}")]);
            summary.add_row(vec!["Batches processed", &format!("{batches}")]);
            summary.add_row(vec!["Pending transfers", &format!("{}", pipeline.pending())]);
            summary.add_row(vec!["Accounts", &format!("{}", pipeline.graph().node_count())]);
            summary.add_row(vec!["Edges", &format!("{}", pipeline.graph().edge_count())]);
            summary.add_row(vec![
                "Communities",
                &format!("{}", pipeline.partition().community_count()),
            ]);
            summary.add_row(vec!["Flagged (last batch)", &format!("{}", findings.len())]);
            println!("{summary}\n");
        }
    }

    info!(
        events = events.len(),
        rejected,
        failed,
        batches,
        flagged = findings.len(),
        "replay command completed"
    );

    Ok(())
}

fn handle_status(ctx: &AppContext) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;

    let unprocessed = store
        .count_unprocessed_transfers()
        .wrap_err("failed to count unprocessed transfers")?;
    let processed = store
        .count_processed_transfers()
        .wrap_err("failed to count processed transfers")?;
    let contract_records = store
        .count_contract_records()
        .wrap_err("failed to count contract interactions")?;
    let clusters = store
        .suspicious_clusters()
        .wrap_err("failed to query suspicious clusters")?;
    let flagged_communities: std::collections::BTreeSet<u64> =
        clusters.iter().map(|row| row.community_id).collect();

    let db_size_str = if ctx.db_path == ":memory:" {
        "N/A (in-memory)".to_string()
    } else {
        match std::fs::metadata(&ctx.db_path) {
            Ok(metadata) => format!("{} KB", metadata.len() / 1_000),
            Err(_) => "N/A (file not found)".to_string(),
        }
    };

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Metric", "Value"]);
    table.add_row(vec!["Database Path", ctx.db_path.as_str()]);
    table.add_row(vec!["DB Size", &db_size_str]);
    table.add_row(vec!["Unprocessed Transfers", &format!("{unprocessed}")]);
    table.add_row(vec!["Processed Transfers", &format!("{processed}")]);
    table.add_row(vec!["Contract Interactions", &format!("{contract_records}")]);
    table.add_row(vec!["Flagged Accounts", &format!("{}", clusters.len())]);
    table.add_row(vec![
        "Flagged Communities",
        &format!("{}", flagged_communities.len()),
    ]);

    println!("\n{}\n", table);

    info!(
        unprocessed,
        processed,
        contract_records,
        flagged_accounts = clusters.len(),
        db_path = %ctx.db_path,
        "status command completed"
    );

    Ok(())
}

fn handle_clusters(ctx: &AppContext, args: ClustersArgs) -> Result<()> {
    let store = Store::new(&ctx.db_path).wrap_err("failed to open SQLite store")?;
    let rows = store
        .suspicious_clusters()
        .wrap_err("failed to query suspicious clusters")?;

    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&rows)
                .wrap_err("failed to serialize clusters to JSON")?;
            println!("{json}");
        }
        "table" => {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            table.set_header(vec!["Community", "Account", "Flagged At"]);
            for row in &rows {
                table.add_row(vec![
                    &format!("{}", row.community_id),
                    &truncate_hash(&row.account),
                    &row.flagged_at,
                ]);
            }
            println!("\n{table}\n");
        }
        other => return Err(eyre!("unknown output format: {other}")),
    }

    info!(rows = rows.len(), "clusters command completed");
    Ok(())
}

fn describe_reasons(reasons: &[SuspicionReason]) -> String {
    reasons
        .iter()
        .map(|reason| match reason {
            SuspicionReason::WeightRatio { ratio } if ratio.is_infinite() => {
                "closed loop".to_string()
            }
            SuspicionReason::WeightRatio { ratio } => format!("intra/inter {ratio:.2}"),
            SuspicionReason::LowDiversity { account, diversity } => {
                format!("low diversity {} ({diversity:.3})", truncate_hash(account))
            }
            SuspicionReason::YoungActiveAccount {
                account,
                age_days,
                counterparties,
            } => format!(
                "young {} ({age_days}d, {counterparties} peers)",
                truncate_hash(account)
            ),
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Truncate a hex hash/address for compact table display.
fn truncate_hash(hash: &str) -> String {
    if hash.len() > 14 && hash.is_ascii() {
        format!("{}…{}", &hash[..8], &hash[hash.len() - 4..])
    } else {
        hash.to_string()
    }
}

fn ensure_dir(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Ok(());
    }
    std::fs::create_dir_all(path)
        .wrap_err_with(|| format!("failed to create data directory {}", path.display()))?;
    Ok(())
}
