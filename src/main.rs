//! complot-crawler main entry point
//!
//! Command-line interface over the crawl orchestrator. The same binary also
//! serves as the worker process of the pool when started with `--worker`.

use anyhow::{bail, Context};
use clap::Parser;
use complot_crawler::config::{load_config_with_hash, Config};
use complot_crawler::crawler::{
    worker, CrawlReport, Orchestrator, ProcessLauncher, Progress, RunOptions,
};
use complot_crawler::output::{load_status, print_status};
use complot_crawler::storage::open_store;
use complot_crawler::tenant::{find_tenant, merge_catalog, Credential, Tenant};
use complot_crawler::Phase;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Resumable crawler for Complot building-permit portals
///
/// Walks each tenant through street discovery, record search, building
/// details, request enrichment and export, checkpointing every phase so an
/// interrupted crawl resumes where it stopped.
#[derive(Parser, Debug)]
#[command(name = "complot-crawler")]
#[command(version)]
#[command(about = "Resumable crawler for Complot building-permit portals", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG", required_unless_present = "worker")]
    config: Option<PathBuf>,

    /// Tenant keys or names to crawl
    #[arg(value_name = "TENANTS")]
    tenants: Vec<String>,

    /// Crawl every known tenant
    #[arg(long, conflicts_with = "tenants")]
    all: bool,

    /// Leave a tenant out of --all (repeatable)
    #[arg(long, value_name = "KEY")]
    exclude: Vec<String>,

    /// List known tenants and exit
    #[arg(long)]
    list_tenants: bool,

    /// Show checkpoint statistics and exit
    #[arg(long, conflicts_with_all = ["dry_run", "export_only"])]
    status: bool,

    /// Write export files from existing checkpoints without crawling
    #[arg(long, conflicts_with = "dry_run")]
    export_only: bool,

    /// Show what each phase would dispatch without crawling
    #[arg(long)]
    dry_run: bool,

    /// Discard a phase's checkpoint before running it (repeatable, or `all`)
    #[arg(long, value_name = "PHASE")]
    force: Vec<String>,

    /// Re-dispatch items that failed in earlier runs
    #[arg(long)]
    retry_errors: bool,

    /// Skip a phase, reusing its existing checkpoint (repeatable)
    #[arg(long, value_name = "PHASE")]
    skip: Vec<String>,

    /// Re-scan streets even when discovery is complete
    #[arg(long)]
    rediscover: bool,

    /// Worker processes per phase
    #[arg(long, value_name = "N")]
    workers: Option<usize>,

    /// In-flight requests per worker
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Opaque token forwarded to request file endpoints
    #[arg(long, value_name = "TOKEN")]
    credential: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run as a pool worker: one job on stdin, results on stdout
    #[arg(long, hide = true)]
    worker: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    if cli.worker {
        return run_worker().await;
    }

    let config_path = cli
        .config
        .clone()
        .context("a configuration file is required")?;
    tracing::info!("Loading configuration from: {}", config_path.display());
    let (config, config_hash) = load_config_with_hash(&config_path)
        .with_context(|| format!("cannot load {}", config_path.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    let catalog = merge_catalog(&config.tenants);
    if cli.list_tenants {
        handle_list_tenants(&catalog);
        return Ok(());
    }

    let selected = select_tenants(&catalog, &cli)?;

    if cli.status {
        return handle_status(&config, &selected);
    }

    let opts = build_options(&cli)?;
    let workers = cli.workers.unwrap_or(config.crawler.workers);
    let store = open_store(&config.output).context("cannot open checkpoint store")?;
    let mut orchestrator = Orchestrator::new(config, store);
    if workers > 1 {
        orchestrator = orchestrator.with_launcher(Arc::new(ProcessLauncher::current_exe()?));
    }

    if cli.dry_run {
        handle_dry_run(&orchestrator, &selected, &opts);
        return Ok(());
    }

    handle_crawl(orchestrator, &selected, &opts).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs always go to stderr; in worker mode stdout carries results.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("complot_crawler=info,warn"),
            1 => EnvFilter::new("complot_crawler=debug,info"),
            2 => EnvFilter::new("complot_crawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received; letting in-flight requests finish");
            cancel.cancel();
        }
    });
}

/// Handles --worker mode
async fn run_worker() -> anyhow::Result<()> {
    // the pool signals cancellation by closing stdin; ctrl-c reaches the
    // whole process group and means the same thing
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    // tokio's stdin read sits on a blocking thread that runtime shutdown
    // waits for, so the process exits directly once serving is over
    match worker::serve(tokio::io::stdin(), tokio::io::stdout(), cancel).await {
        Ok(written) => {
            tracing::debug!(written, "Worker exiting");
            std::process::exit(0);
        }
        Err(e) => {
            tracing::error!("Worker failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn parse_phase(value: &str) -> anyhow::Result<Phase> {
    match Phase::from_db_string(value) {
        Some(phase) => Ok(phase),
        None => bail!(
            "unknown phase '{}' (expected one of: streets, records, details, requests, export)",
            value
        ),
    }
}

fn build_options(cli: &Cli) -> anyhow::Result<RunOptions> {
    let mut force = BTreeSet::new();
    for value in &cli.force {
        if value.eq_ignore_ascii_case("all") {
            force.extend(Phase::ALL.into_iter().filter(Phase::is_network));
        } else {
            force.insert(parse_phase(value)?);
        }
    }

    let mut opts = if cli.export_only {
        RunOptions::export_only()
    } else {
        RunOptions::default()
    };
    for value in &cli.skip {
        opts.skip.insert(parse_phase(value)?);
    }

    opts.force = force;
    opts.retry_errors = cli.retry_errors;
    opts.rediscover = cli.rediscover;
    opts.workers = cli.workers;
    opts.concurrency = cli.concurrency;
    opts.credential = cli.credential.as_deref().map(Credential::new);
    opts.progress = Some(Arc::new(|p: Progress| {
        if p.completed % 100 == 0 || p.completed == p.total {
            tracing::info!(completed = p.completed, total = p.total, "Progress");
        }
    }));
    Ok(opts)
}

fn select_tenants<'a>(catalog: &'a [Tenant], cli: &Cli) -> anyhow::Result<Vec<&'a Tenant>> {
    let mut selected = Vec::new();
    if cli.all {
        selected.extend(catalog.iter());
    } else {
        if cli.tenants.is_empty() {
            bail!("name at least one tenant, or pass --all (see --list-tenants)");
        }
        for query in &cli.tenants {
            match find_tenant(catalog, query) {
                Some(tenant) => selected.push(tenant),
                None => bail!(complot_crawler::ComplotError::UnknownTenant(query.clone())),
            }
        }
    }

    let excluded: Vec<&Tenant> = cli
        .exclude
        .iter()
        .filter_map(|query| find_tenant(catalog, query))
        .collect();
    selected.retain(|t| !excluded.iter().any(|e| e.key == t.key));
    let mut seen = HashSet::new();
    selected.retain(|t| seen.insert(t.key.clone()));
    Ok(selected)
}

/// Handles the --list-tenants mode
fn handle_list_tenants(catalog: &[Tenant]) {
    println!("=== Known Tenants ===\n");
    for tenant in catalog {
        let (lo, hi) = tenant.street_range;
        println!(
            "  {:<12} {:<14} site {:<4} city {:<5} streets {}-{} ({}){}",
            tenant.key,
            tenant.name,
            tenant.site_id,
            tenant.city_code,
            lo,
            hi,
            tenant.endpoint_family,
            if tenant.enrichment_blocked {
                ", enrichment blocked"
            } else {
                ""
            }
        );
    }
}

/// Handles the --status mode: shows checkpoint statistics
fn handle_status(config: &Config, tenants: &[&Tenant]) -> anyhow::Result<()> {
    let store = open_store(&config.output).context("cannot open checkpoint store")?;
    for tenant in tenants {
        print_status(&load_status(&*store, tenant));
    }
    Ok(())
}

/// Handles the --dry-run mode: shows what every phase would dispatch
fn handle_dry_run(orchestrator: &Orchestrator, tenants: &[&Tenant], opts: &RunOptions) {
    println!("=== Dry Run ===\n");
    for tenant in tenants {
        println!("{} ({})", tenant.key, tenant.name);
        for planned in orchestrator.plan(tenant, opts) {
            println!(
                "  {:<20} {:<22} expected {:>6}, present {:>6}, dispatch {:>6}",
                planned.phase.to_string(),
                planned.action.to_string(),
                planned.expected,
                planned.present,
                planned.dispatch
            );
        }
        println!();
    }
}

fn print_report(report: &CrawlReport) {
    println!("=== {} ===", report.tenant);
    for phase in &report.phases {
        println!(
            "  {:<20} {:<20} dispatched {:>6}, ok {:>6}, failed {:>6}",
            phase.phase.to_string(),
            phase.state.to_string(),
            phase.dispatched,
            phase.succeeded,
            phase.failed
        );
        for (category, count) in &phase.failures {
            println!("      {}: {}", category, count);
        }
    }
    if let Some(delta) = &report.delta {
        println!(
            "  streets: {} new, {} removed, {} unchanged",
            delta.new.len(),
            delta.removed.len(),
            delta.unchanged.len()
        );
    }
    if let Some(export) = &report.export {
        println!("  exported to {}", export.dir.display());
    }
    if report.interrupted {
        println!("  interrupted; run again to resume");
    }
    println!();
}

/// Handles the main crawl operation
async fn handle_crawl(
    mut orchestrator: Orchestrator,
    tenants: &[&Tenant],
    opts: &RunOptions,
) -> anyhow::Result<()> {
    cancel_on_ctrl_c(orchestrator.cancel_token());

    let mut aborted = Vec::new();
    let mut finished = 0usize;
    for tenant in tenants {
        if orchestrator.cancel_token().is_cancelled() {
            break;
        }
        match orchestrator.run_tenant(tenant, opts).await {
            Ok(report) => {
                finished += 1;
                print_report(&report);
            }
            Err(e) => {
                tracing::error!(tenant = %tenant.key, "{}", e);
                aborted.push(tenant.key.clone());
            }
        }
    }

    println!(
        "=== Summary: {} of {} tenants finished, {} aborted ===",
        finished,
        tenants.len(),
        aborted.len()
    );
    if !aborted.is_empty() {
        bail!("aborted tenants: {}", aborted.join(", "));
    }
    Ok(())
}
