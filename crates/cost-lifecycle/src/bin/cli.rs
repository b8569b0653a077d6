//! Cost lifecycle CLI - track and reconcile service cancellations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cost_lifecycle::{
    load_catalog, DisplayState, HttpCancellationTransport, JsonFileStore, LifecycleConfig,
    LifecycleController, LifecycleStatus, LifecycleSummary, Service,
};

/// Cost lifecycle CLI - request cancellations and show their progress.
#[derive(Parser)]
#[command(name = "cost-lifecycle")]
#[command(about = "Cancellation tracking for cost dashboard services")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "COST_LIFECYCLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the lifecycle status of every catalog entry
    Status {
        /// Catalog file exported by the cost collector
        #[arg(long)]
        catalog: PathBuf,

        /// Print display states as JSON
        #[arg(long)]
        json: bool,
    },

    /// Request cancellation of a service
    Cancel {
        /// Service name
        name: String,

        /// Resource id, when the entry refers to a single resource
        #[arg(long)]
        id: Option<String>,

        /// Only show what would be cancelled
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete tracked cancellations for a service name
    Clear {
        /// Service name
        name: String,
    },

    /// Delete tracked cancellations for every exempt service
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("cost_lifecycle=debug,info")
    } else {
        EnvFilter::new("cost_lifecycle=info,warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = LifecycleConfig::resolve(cli.config.as_deref())
        .context("Failed to load configuration")?;
    let controller = build_controller(&config)?;

    match cli.command {
        Commands::Status { catalog, json } => run_status(&controller, &catalog, json),
        Commands::Cancel { name, id, dry_run } => {
            tracing::info!(name, id, dry_run, "Cancelling service");
            let mut service = Service::new(name, 0.0);
            if let Some(id) = id {
                service = service.with_id(id);
            }
            run_cancel(&controller, &service, dry_run).await
        }
        Commands::Clear { name } => run_clear(&controller, &name),
        Commands::Prune => run_prune(&controller),
    }
}

fn build_controller(config: &LifecycleConfig) -> Result<LifecycleController> {
    let store = JsonFileStore::open(&config.state_path, config.horizon());
    if let Some(warning) = store.load_warning() {
        print_warning(&format!("{warning}; starting with no tracked cancellations"));
    }

    let transport =
        HttpCancellationTransport::new(&config.transport.endpoint, config.transport.timeout())
            .context("Failed to create HTTP client")?;
    let policy = config.policy().context("Invalid override policy")?;

    let controller = LifecycleController::new(
        Arc::new(store),
        Arc::new(transport),
        Arc::new(policy),
        config.horizon(),
    )?;
    Ok(controller)
}

fn run_status(controller: &LifecycleController, catalog: &Path, json: bool) -> Result<()> {
    let services = load_catalog(catalog)
        .with_context(|| format!("Failed to load catalog {}", catalog.display()))?;
    let states = controller.reconcile(&services);

    if json {
        println!("{}", serde_json::to_string_pretty(&states)?);
        return Ok(());
    }

    if states.is_empty() {
        println!("{}", "Catalog is empty".bright_black());
        return Ok(());
    }

    let width = states
        .iter()
        .map(|s| s.service.key().to_string().len())
        .max()
        .unwrap_or(0);

    for state in &states {
        let name = state.service.key().to_string();
        let progress = state.progress_label().unwrap_or_default();
        println!(
            "  {name:<width$}  {:>10}  {}  {}",
            format!("${:.2}", state.service.cost),
            status_colored(state),
            progress.bright_black()
        );
    }

    let summary = LifecycleSummary::from_states(&states);
    println!();
    println!(
        "{} services, ${:.2} total: ${:.2} active, ${:.2} pending, ${:.2} cancelled, ${:.2} exempt",
        summary.services,
        summary.total_cost,
        summary.active_cost,
        summary.pending_cost,
        summary.cancelled_cost,
        summary.exempt_cost
    );
    Ok(())
}

async fn run_cancel(
    controller: &LifecycleController,
    service: &Service,
    dry_run: bool,
) -> Result<()> {
    let plan = controller.confirm_cancellation(service)?;

    println!("{} {}", "▶".cyan(), format!("Cancel {}", plan.key).bold());
    println!("  Expected completion: {}", plan.eta_time.to_rfc3339());
    if !plan.implicated_children.is_empty() {
        println!("  Also covers: {}", plan.implicated_children.join(", "));
    }

    if dry_run {
        print_info("Dry run, no request sent");
        return Ok(());
    }

    let record = controller.request_cancellation(service).await?;
    if record.request_id.is_local() {
        print_warning(&format!(
            "Backend returned no request id; tracking locally as {}",
            record.request_id
        ));
    }
    print_success(&format!(
        "Cancellation requested ({})",
        record.request_id
    ));
    Ok(())
}

fn run_clear(controller: &LifecycleController, name: &str) -> Result<()> {
    let removed = controller.clear_override_tracking(name)?;
    if removed.is_empty() {
        print_info(&format!("No tracked cancellations for '{name}'"));
    } else {
        print_success(&format!("Cleared {} record(s) for '{name}'", removed.len()));
    }
    Ok(())
}

fn run_prune(controller: &LifecycleController) -> Result<()> {
    let removed = controller.prune_exempt_records()?;
    for key in &removed {
        println!("  {} {key}", "→".cyan());
    }
    print_success(&format!("Pruned {} exempt record(s)", removed.len()));
    Ok(())
}

fn status_colored(state: &DisplayState) -> ColoredString {
    let label = state.status_label();
    match state.lifecycle_status {
        LifecycleStatus::Active => label.green(),
        LifecycleStatus::PayAsYouGo | LifecycleStatus::Required => label.blue(),
        LifecycleStatus::PendingOwn | LifecycleStatus::PendingViaParent => label.yellow(),
        LifecycleStatus::Completed => label.bright_black(),
    }
}

fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow().bold(), message.yellow());
}

fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}
