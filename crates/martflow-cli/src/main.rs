use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use martflow_core::{Config, RunReport, RunSummary, TargetConfig, Unit, UnitStatus, WarehouseType};
use martflow_dag::{DependencyGraph, Project, Selection};
use martflow_engine::{ExecutionContext, Executor, RunMode, RunRequest};
use martflow_warehouse::{transfer, BigQueryEngine, MemoryEngine, QueryEngine, Relation};

/// Where run results are written, relative to the project root
const RUN_RESULTS_PATH: &str = "target/run_results.json";

/// martflow - build analytics marts from a graph of SQL units
#[derive(Parser)]
#[command(name = "martflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: martflow.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute units in dependency order
    Run(RunArgs),

    /// List units in execution order
    Ls {
        /// Selectors: name, +name, name+, tag:name
        #[arg(short, long)]
        select: Vec<String>,
    },

    /// Show the units skipped if a unit fails
    Impact {
        /// Unit name to analyze
        unit: String,
    },

    /// Load NDJSON files into relations, replacing their rows
    Seed {
        /// Relation as name, dataset.name or project.dataset.name
        /// (default: every entry of [seeds])
        relation: Option<String>,

        /// NDJSON file (default: the [seeds] entry for the relation)
        file: Option<PathBuf>,
    },

    /// Write every relation of a dataset to CSV
    Export {
        /// Dataset to export (default: the target schema)
        #[arg(long)]
        schema: Option<String>,

        /// Output directory; files land in <output>/<schema>/<name>.csv
        #[arg(short, long, default_value = "exports")]
        output: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Selectors: name, +name, name+, tag:name
    #[arg(short, long)]
    select: Vec<String>,

    /// Rebuild incremental units from scratch
    #[arg(long)]
    full_refresh: bool,

    /// Stop dispatching units after the first failure
    #[arg(long)]
    fail_fast: bool,

    /// Units executing at once (overrides run.threads)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Per-unit timeout in seconds (overrides run.unit_timeout_secs)
    #[arg(long)]
    timeout: Option<u64>,

    /// Export the target schema to CSV under this directory after the run
    #[arg(long, value_name = "DIR")]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from("martflow.toml"));
    if cli.verbose {
        eprintln!("{} {}", "Loading project from:".cyan(), config_path.display());
    }

    let project = Project::load(&config_path)
        .with_context(|| format!("Failed to load project from {}", config_path.display()))?;

    match cli.command {
        Commands::Run(args) => {
            let has_failures = run_command(&project, &args, cli.verbose).await?;
            if has_failures {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Ls { select } => ls_command(&project, &select),
        Commands::Impact { unit } => impact_command(&project, &unit),
        Commands::Seed { relation, file } => seed_command(&project, relation.as_deref(), file).await,
        Commands::Export { schema, output } => export_command(&project, schema, &output).await,
    }
}

/// Log to stderr; RUST_LOG wins over --verbose
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run command - execute the selected units; returns whether any failed
async fn run_command(project: &Project, args: &RunArgs, verbose: bool) -> Result<bool> {
    let graph = project.graph().context("Invalid dependency graph")?;
    let units = selected_units(project, &graph, &args.select)?;

    let request = run_request(project, args);
    if verbose {
        eprintln!(
            "{} {} units on {} ({} thread(s), {:?})",
            "Running".cyan(),
            units.len(),
            project.config.target.warehouse_type,
            request.threads,
            request.mode,
        );
    }

    let engine = connect(&project.config.target, &project.config.project_root).await?;

    // The memory target starts empty on every invocation
    if project.config.target.warehouse_type == WarehouseType::Memory {
        let seeds = seed_plan(&project.config, None, None)?;
        load_seeds(engine.as_ref(), &seeds, verbose).await?;
    }

    let executor = Executor::new(Arc::clone(&engine), ExecutionContext::from_config(&project.config));

    // Ctrl-C lets running units finish and skips the rest
    let cancel = executor.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "Cancelling: waiting for running units to finish".yellow());
            cancel.cancel();
        }
    });

    let started = Instant::now();
    let summary = executor.run(&units, &request).await;
    let report = RunReport::new(
        project.config.target.name.clone(),
        summary,
        started.elapsed().as_secs_f64(),
    )
    .with_metadata(run_metadata(&args.select, &request));

    let results_path = project.config.resolve_path(Path::new(RUN_RESULTS_PATH));
    report
        .save_to_file(&results_path)
        .with_context(|| format!("Failed to write {}", results_path.display()))?;

    if verbose {
        eprintln!("{} {}", "Run results saved to:".green(), results_path.display());
    }

    print_run_summary(&report);

    if let Some(output) = &args.export {
        let target = &project.config.target;
        let exported = transfer::export_schema(engine.as_ref(), &target.database, &target.schema, output)
            .await
            .with_context(|| format!("Failed to export {}.{}", target.database, target.schema))?;
        print_exported(&exported);
    }

    Ok(report.has_failures())
}

/// Selection and options recorded alongside the run results
fn run_metadata(select: &[String], request: &RunRequest) -> serde_json::Value {
    let mode = match request.mode {
        RunMode::Normal => "normal",
        RunMode::FullRefresh => "full_refresh",
    };

    serde_json::json!({
        "select": select,
        "mode": mode,
        "threads": request.threads,
        "fail_fast": request.fail_fast,
        "unit_timeout_secs": request.unit_timeout.map(|t| t.as_secs()),
    })
}

/// Command-line flags over the [run] section
fn run_request(project: &Project, args: &RunArgs) -> RunRequest {
    let mut request = RunRequest::from_config(&project.config.run);

    if args.full_refresh {
        request.mode = RunMode::FullRefresh;
    }
    if args.fail_fast {
        request.fail_fast = true;
    }
    if let Some(threads) = args.threads {
        request.threads = threads.max(1);
    }
    if let Some(secs) = args.timeout {
        request.unit_timeout = Some(Duration::from_secs(secs));
    }

    request
}

/// Units matching the selectors, in execution order
fn selected_units<'a>(
    project: &'a Project,
    graph: &DependencyGraph,
    select: &[String],
) -> Result<Vec<&'a Unit>> {
    let selection = if select.is_empty() {
        Selection::all()
    } else {
        Selection::parse(select)?
    };

    let order = graph.topological_order()?;
    let names = selection.apply(&order, &project.registry, graph)?;

    names
        .iter()
        .map(|name| project.registry.get(name).map_err(anyhow::Error::from))
        .collect()
}

/// Open the query engine for the configured target
async fn connect(target: &TargetConfig, project_root: &Path) -> Result<Arc<dyn QueryEngine>> {
    match target.warehouse_type {
        WarehouseType::Memory => {
            tracing::warn!(target = %target.name, "running against an in-memory engine; results are not persisted");
            Ok(Arc::new(MemoryEngine::new()))
        }
        WarehouseType::BigQuery => {
            let engine = match &target.credentials_path {
                Some(path) => {
                    let key_path = if path.is_absolute() {
                        path.clone()
                    } else {
                        project_root.join(path)
                    };
                    BigQueryEngine::from_service_account_file(&target.database, key_path).await
                }
                None => BigQueryEngine::with_adc(&target.database).await,
            }
            .context("Failed to create BigQuery engine")?
            .with_location(target.location.clone());

            engine
                .test_connection()
                .await
                .context("Failed to connect to BigQuery")?;

            Ok(Arc::new(engine))
        }
    }
}

/// Relations to seed with their files, resolved against the target
///
/// Without a relation every `[seeds]` entry is used. A relation without a
/// file takes its `[seeds]` entry.
fn seed_plan(config: &Config, relation: Option<&str>, file: Option<PathBuf>) -> Result<Vec<(Relation, PathBuf)>> {
    let target = &config.target;
    let resolve = |name: &str| Relation::parse(name, &target.database, &target.schema);

    let entries: Vec<(Relation, PathBuf)> = match (relation, file) {
        (Some(name), Some(path)) => vec![(resolve(name)?, path)],
        (Some(name), None) => {
            let path = config
                .seeds
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("No file given and no [seeds] entry for '{}'", name))?;
            vec![(resolve(name)?, config.resolve_path(path))]
        }
        (None, _) => config
            .seeds
            .iter()
            .map(|(name, path)| Ok((resolve(name)?, config.resolve_path(path))))
            .collect::<Result<_>>()?,
    };

    Ok(entries)
}

async fn load_seeds(engine: &dyn QueryEngine, seeds: &[(Relation, PathBuf)], verbose: bool) -> Result<()> {
    for (relation, path) in seeds {
        let rows = transfer::seed_relation(engine, relation, path)
            .await
            .with_context(|| format!("Failed to seed {} from {}", relation, path.display()))?;

        if verbose {
            eprintln!("{} {} ({} rows)", "Seeded".green(), relation, rows);
        }
    }
    Ok(())
}

/// Seed command - load NDJSON files into the target warehouse
async fn seed_command(project: &Project, relation: Option<&str>, file: Option<PathBuf>) -> Result<()> {
    let config = &project.config;
    if config.target.warehouse_type == WarehouseType::Memory {
        return Err(anyhow::anyhow!(
            "The memory target keeps no data between commands; [seeds] load automatically at the start of `run`"
        ));
    }

    let seeds = seed_plan(config, relation, file)?;
    if seeds.is_empty() {
        return Err(anyhow::anyhow!("Nothing to seed: pass a relation and file, or add a [seeds] section"));
    }

    let engine = connect(&config.target, &config.project_root).await?;
    load_seeds(engine.as_ref(), &seeds, true).await?;

    println!("{} {} relation(s)", "✓ Seeded".green().bold(), seeds.len());
    Ok(())
}

/// Export command - write a dataset's relations to CSV
async fn export_command(project: &Project, schema: Option<String>, output: &Path) -> Result<()> {
    let target = &project.config.target;
    if target.warehouse_type == WarehouseType::Memory {
        return Err(anyhow::anyhow!(
            "The memory target keeps no data between commands; use `run --export {}`",
            output.display()
        ));
    }

    let schema = schema.unwrap_or_else(|| target.schema.clone());
    let engine = connect(target, &project.config.project_root).await?;
    let exported = transfer::export_schema(engine.as_ref(), &target.database, &schema, output)
        .await
        .with_context(|| format!("Failed to export {}.{}", target.database, schema))?;

    print_exported(&exported);
    Ok(())
}

fn print_exported(exported: &[transfer::ExportedRelation]) {
    for entry in exported {
        println!(
            "  {} {} -> {} ({} rows)",
            "✓".green(),
            entry.relation.name,
            entry.path.display(),
            entry.rows
        );
    }
    println!("{} {} relation(s)", "Exported".green().bold(), exported.len());
}

/// Ls command - print the execution order
fn ls_command(project: &Project, select: &[String]) -> Result<()> {
    let graph = project.graph().context("Invalid dependency graph")?;
    let units = selected_units(project, &graph, select)?;

    for (i, unit) in units.iter().enumerate() {
        let mut line = format!(
            "{:>3}. {} {}",
            i + 1,
            unit.name.bold(),
            format!("({})", unit.materialization).dimmed()
        );
        if !unit.depends_on.is_empty() {
            line.push_str(&format!(" <- {}", unit.depends_on.join(", ")));
        }
        if !unit.tags.is_empty() {
            line.push_str(&format!(" {}", format!("[{}]", unit.tags.join(", ")).cyan()));
        }
        println!("{}", line);
    }

    Ok(())
}

/// Impact command - show downstream units in execution order
fn impact_command(project: &Project, unit: &str) -> Result<()> {
    if !project.registry.contains(unit) {
        return Err(anyhow::anyhow!("Unit '{}' not found in project", unit));
    }

    let graph = project.graph().context("Invalid dependency graph")?;
    let downstream = graph.downstream(unit);
    let order = graph.topological_order()?;
    let affected: Vec<&String> = order.iter().filter(|name| downstream.contains(name)).collect();

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Downstream Impact Analysis".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("{} {}", "Unit:".bold(), unit.green());
    println!("{} {}", "Downstream units:".bold(), affected.len());
    println!();

    if affected.is_empty() {
        println!("{}", "✓ No downstream units".green());
    } else {
        println!("{}", "Skipped if this unit fails (in execution order):".bold());
        println!();
        for (i, name) in affected.iter().enumerate() {
            let materialization = project
                .registry
                .get(name)
                .map(|u| u.materialization.to_string())
                .unwrap_or_default();
            println!("  {}. {} ({})", i + 1, name.yellow(), materialization);
        }
    }

    println!();
    println!("{}", "=".repeat(60).bright_blue());

    Ok(())
}

/// Print run summary to stdout
fn print_run_summary(report: &RunReport) {
    let summary: &RunSummary = &report.summary;

    println!("\n{}", "=".repeat(60).bright_blue());
    println!("{}", "Run Results".bold().bright_blue());
    println!("{}", "=".repeat(60).bright_blue());
    println!();

    println!("Target: {}", report.target);
    println!("Timestamp: {}", report.timestamp);
    println!("Elapsed: {:.2}s", report.elapsed_secs);
    println!();

    for result in &summary.results {
        let status = match result.status {
            UnitStatus::Succeeded => "OK".green().bold(),
            UnitStatus::Failed => "FAIL".red().bold(),
            UnitStatus::Skipped => "SKIP".yellow().bold(),
            UnitStatus::Pending | UnitStatus::Running => "????".dimmed(),
        };
        println!(
            "  [{}] {} ({}) {:.2}s",
            status, result.name, result.materialization, result.duration_secs
        );
    }
    println!();

    println!("{}", "Summary:".bold());
    println!("  Succeeded: {}", format!("{}", summary.counts.succeeded).green());

    if summary.counts.failed > 0 {
        println!("  Failed:    {}", format!("{}", summary.counts.failed).red().bold());
    } else {
        println!("  Failed:    {}", format!("{}", summary.counts.failed).green());
    }

    if summary.counts.skipped > 0 {
        println!("  Skipped:   {}", format!("{}", summary.counts.skipped).yellow());
    } else {
        println!("  Skipped:   {}", summary.counts.skipped);
    }
    println!();

    if !summary.failed.is_empty() {
        println!("{}", "Failures:".bold());
        for failed in &summary.failed {
            println!("  {} {}: {}", "✗".red(), failed.name.bold(), failed.error);
        }
        println!();
    }

    if !summary.skipped.is_empty() {
        println!("{}", "Skipped:".bold());
        for skipped in &summary.skipped {
            println!("  {} {}: {}", "-".yellow(), skipped.name, skipped.reason);
        }
        println!();
    }

    if summary.is_success() {
        println!("{}", "✓ All units succeeded".green().bold());
    }

    println!("{}", "=".repeat(60).bright_blue());
}
