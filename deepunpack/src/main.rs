use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::runtime::Runtime;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use deepunpack_lib::core::app_dirs;
use deepunpack_lib::{
    detect_conflicts, logger, run_install, run_scan, ConflictResolution, EngineConfig,
    InstallationResult, PlanStore, PlanToken, ProgressEvent, ScanPlan, TaskControl,
};

#[derive(Debug, Parser)]
#[command(name = "deepunpack")]
#[command(about = "Find and install payload files buried in nested archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scan an archive tree and save a plan
    Scan {
        archive: PathBuf,
        /// Print the plan without saving it
        #[arg(long)]
        no_save: bool,
    },
    /// Install the files listed in a saved plan
    Install {
        plan: PathBuf,
        destination: PathBuf,
        #[arg(long, value_enum, default_value_t = OnConflict::Skip)]
        on_conflict: OnConflict,
        /// File name to overwrite under `--on-conflict selective`
        #[arg(long = "approve")]
        approve: Vec<String>,
    },
    /// Print a saved plan
    Show { plan: PathBuf },
    /// Delete stale plans
    Purge {
        /// Override the configured maximum plan age
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OnConflict {
    Overwrite,
    Skip,
    Cancel,
    Selective,
}

fn main() -> ExitCode {
    let _guard = logger::init_logger();
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = app_dirs::get_config_path();
    let config = EngineConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let store = PlanStore::new(app_dirs::get_plans_dir());

    match cli.command {
        Commands::Scan { archive, no_save } => scan(&archive, no_save, config, &store),
        Commands::Install {
            plan,
            destination,
            on_conflict,
            approve,
        } => install(&plan, destination, on_conflict, approve, config, &store),
        Commands::Show { plan } => {
            let plan = store
                .get(&PlanToken::from_path(&plan))
                .with_context(|| format!("Failed to load plan {}", plan.display()))?;
            print_plan(&plan);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Purge { max_age_days } => {
            let max_age = match max_age_days {
                Some(days) => std::time::Duration::from_secs(days * 24 * 60 * 60),
                None => config.plan_max_age(),
            };
            let report = store.purge_orphans(max_age)?;
            println!("Removed {} plans, kept {}", report.removed.len(), report.kept);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")
}

/// Drive `operation` while printing its progress events. Ctrl-C cancels it
/// through `control`.
fn with_progress<T, F>(
    runtime: &Runtime,
    control: &TaskControl,
    operation: impl FnOnce(UnboundedSender<ProgressEvent>) -> F,
) -> T
where
    F: Future<Output = T>,
{
    let (tx, rx) = unbounded_channel();
    let printer = runtime.spawn(print_events(rx));
    let interrupt = runtime.spawn(cancel_on(tokio::signal::ctrl_c(), control.clone()));
    let output = runtime.block_on(operation(tx));
    interrupt.abort();
    // The worker's sender is gone, so the printer drains and stops
    let _ = runtime.block_on(printer);
    output
}

/// Cancel `control` once `signal` fires
async fn cancel_on<S>(signal: S, control: TaskControl)
where
    S: Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("Interrupt received, cancelling");
            eprintln!("\nCancelling...");
            control.cancel();
        }
        Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
    }
}

async fn print_events(mut rx: UnboundedReceiver<ProgressEvent>) {
    let mut total_bytes = 0u64;
    let mut files_done = 0usize;
    let mut total_files = 0usize;
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Status(line) => println!("{}", line),
            ProgressEvent::Totals { files, bytes } => {
                total_files = files;
                total_bytes = bytes;
                println!("Installing {} files ({} bytes)", files, bytes);
            }
            ProgressEvent::Bytes {
                processed,
                current_file,
            } => {
                let percent = if total_bytes > 0 {
                    processed as f64 / total_bytes as f64 * 100.0
                } else {
                    100.0
                };
                eprint!("\r{:5.1}%  {}/{}  {:<40}", percent, files_done, total_files, current_file);
            }
            ProgressEvent::FileCompleted => files_done += 1,
        }
    }
    if files_done > 0 {
        eprintln!();
    }
}

fn scan(archive: &Path, no_save: bool, config: EngineConfig, store: &PlanStore) -> Result<ExitCode> {
    let runtime = build_runtime()?;
    let control = TaskControl::new();
    let outcome = with_progress(&runtime, &control, |tx| {
        run_scan(archive.to_path_buf(), config, control.clone(), tx)
    })
        .with_context(|| format!("Failed to scan {}", archive.display()))?;

    for failure in &outcome.failures {
        println!("warning: {}: {}", failure.display_path, failure.message);
    }
    print_plan(&outcome.plan);

    if outcome.plan.target_files.is_empty() {
        println!("No target files found");
        return Ok(ExitCode::SUCCESS);
    }
    if !no_save {
        let token = store.put(&outcome.plan).context("Failed to save plan")?;
        println!("Plan saved to {}", token);
    }
    Ok(ExitCode::SUCCESS)
}

fn install(
    plan_path: &Path,
    destination: PathBuf,
    on_conflict: OnConflict,
    approve: Vec<String>,
    config: EngineConfig,
    store: &PlanStore,
) -> Result<ExitCode> {
    let token = PlanToken::from_path(plan_path);
    let plan = store
        .get(&token)
        .with_context(|| format!("Failed to load plan {}", plan_path.display()))?;

    let conflicts = detect_conflicts(&plan.target_files, &destination);
    for conflict in &conflicts {
        println!(
            "conflict: {} exists ({} bytes, plan has {} bytes from {})",
            conflict.destination_path.display(),
            conflict.existing_size,
            conflict.record.size,
            conflict.record.display_archive_path
        );
    }

    let resolution = match on_conflict {
        OnConflict::Overwrite => ConflictResolution::OverwriteAll,
        OnConflict::Skip => ConflictResolution::SkipAll,
        OnConflict::Cancel if conflicts.is_empty() => ConflictResolution::OverwriteAll,
        OnConflict::Cancel => ConflictResolution::Cancel,
        OnConflict::Selective => ConflictResolution::Selective(
            approve
                .iter()
                .map(|name| destination.join(name))
                .collect::<HashSet<_>>(),
        ),
    };

    let runtime = build_runtime()?;
    let control = TaskControl::new();
    let result = with_progress(&runtime, &control, |tx| {
        run_install(plan, destination, resolution, config, control.clone(), tx)
    });
    print_result(&result);

    if result.is_clean() {
        store.delete(&token)?;
        return Ok(ExitCode::SUCCESS);
    }
    println!("Plan kept at {}", token);
    if result.success {
        println!("Installation finished with warnings");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_plan(plan: &ScanPlan) {
    println!(
        "Plan for {} ({})",
        plan.root_archive_path.display(),
        plan.scan_timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    );
    for record in &plan.target_files {
        println!(
            "  {:<40} {:>12}  {} :: {}",
            record.file_name, record.size, record.display_archive_path, record.relative_path_in_archive
        );
    }
    let summary = &plan.summary;
    println!(
        "{} files, {} bytes, {} archives",
        summary.total_files, summary.total_size, summary.archives_scanned
    );
    for (ext, count) in &summary.files_by_extension {
        let size = summary.size_by_extension.get(ext).copied().unwrap_or_default();
        println!("  .{:<6} {:>6} files {:>14} bytes", ext, count, size);
    }
}

fn print_result(result: &InstallationResult) {
    if result.cancelled {
        println!("Installation cancelled after {} files", result.files_installed);
    }
    println!(
        "Installed {} files ({} bytes), skipped {}, failed {}, overwritten {}",
        result.files_installed,
        result.total_size_installed,
        result.files_skipped,
        result.files_failed,
        result.conflicts_resolved
    );
    for error in &result.errors {
        println!("error: {}", error);
    }
    if let Some(verification) = &result.verification {
        println!(
            "Verified {} files, {} missing, {} size mismatches",
            verification.files_verified, verification.files_missing, verification.size_mismatches
        );
        for name in &verification.missing_files {
            println!("  missing: {}", name);
        }
        for name in &verification.size_mismatch_files {
            println!("  size mismatch: {}", name);
        }
    }
}
