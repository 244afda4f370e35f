//! Install phase.
//!
//! Re-opens the root archive recorded in a plan, walks each archive chain
//! again, writes the resolved target files into the destination and verifies
//! the files that were actually written. Nothing from the scan phase is reused
//! except the plan itself.

mod conflicts;
mod extraction;
mod verification;

pub use conflicts::{detect_conflicts, PlannedWrite, ResolvedPlan, WriteDecision};
pub use verification::verify_installation;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::core::archive_input::prepare_archive_for_read;
use crate::core::config::EngineConfig;
use crate::core::pacing::{Pacer, Throttle};
use crate::core::task_control::TaskControl;
use crate::error::{ApiError, EngineError, Result};
use crate::models::{ConflictResolution, InstallationResult, ScanPlan, CHAIN_DISPLAY_SEPARATOR};
use crate::progress::ProgressSink;
use crate::staging::Stager;

/// Installed file name mapped to the size it is expected to have on disk
pub type InstalledFiles = BTreeMap<String, u64>;

/// Mutable state of one install attempt, owned by the worker
struct InstallRun<'r> {
    destination: &'r Path,
    sink: &'r dyn ProgressSink,
    result: InstallationResult,
    installed: InstalledFiles,
    bytes_done: u64,
    throttle: Throttle,
    pacer: Pacer,
}

impl<'r> InstallRun<'r> {
    fn new(destination: &'r Path, sink: &'r dyn ProgressSink, config: &EngineConfig) -> Self {
        Self {
            destination,
            sink,
            result: InstallationResult::default(),
            installed: InstalledFiles::new(),
            bytes_done: 0,
            throttle: Throttle::new(config.progress_interval()),
            pacer: Pacer::new(config.yield_interval()),
        }
    }

    /// Files that reached a final state during extraction
    fn processed(&self) -> usize {
        self.result.files_installed + self.result.files_skipped + self.result.files_failed
    }
}

pub struct Installer {
    config: EngineConfig,
    control: TaskControl,
    stager: Stager,
}

impl Installer {
    pub fn new(config: EngineConfig, control: TaskControl) -> Self {
        let stager = Stager::new(&config, control.clone());
        Self {
            config,
            control,
            stager,
        }
    }

    /// Install the plan's target files into `destination`.
    ///
    /// Never fails across the call boundary: cancellation and fatal errors are
    /// reported inside the returned result.
    pub fn install(
        &self,
        plan: &ScanPlan,
        destination: &Path,
        resolution: &ConflictResolution,
        sink: &dyn ProgressSink,
    ) -> InstallationResult {
        if *resolution == ConflictResolution::Cancel {
            tracing::info!(target: "installer", "Installation cancelled at conflict resolution");
            sink.status("Installation cancelled");
            return InstallationResult::cancelled();
        }

        let started = Instant::now();
        tracing::info!(
            target: "installer",
            "Installing {} planned files from {} into {}",
            plan.target_files.len(),
            plan.root_archive_path.display(),
            destination.display()
        );

        let mut run = InstallRun::new(destination, sink, &self.config);
        let outcome = self.run_install(plan, resolution, &mut run);
        let mut result = run.result;

        match outcome {
            Ok(()) => {
                result.success = result.files_failed == 0;
                sink.status(&format!(
                    "Installed {} files, skipped {}, failed {}",
                    result.files_installed, result.files_skipped, result.files_failed
                ));
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!(
                    target: "installer",
                    "Installation cancelled after {} files",
                    result.files_installed
                );
                result.cancelled = true;
                result.failure = Some(ApiError::cancelled("Installation cancelled"));
                sink.status("Installation cancelled");
            }
            Err(e) => {
                tracing::error!(target: "installer", "Installation failed: {}", e);
                sink.status(&format!("Installation failed: {}", e));
                result.errors.push(e.to_string());
                result.failure = Some(ApiError::from(&e));
            }
        }

        tracing::debug!(
            target: "installer",
            "[TIMING] Installation finished in {:.2}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        result
    }

    fn run_install(
        &self,
        plan: &ScanPlan,
        resolution: &ConflictResolution,
        run: &mut InstallRun<'_>,
    ) -> Result<()> {
        self.control.ensure_not_cancelled()?;
        fs::create_dir_all(run.destination).map_err(|e| EngineError::io(run.destination, e))?;

        let conflicts = detect_conflicts(&plan.target_files, run.destination);
        if !conflicts.is_empty() {
            tracing::info!(target: "installer", "{} destination conflicts", conflicts.len());
        }
        let resolved = ResolvedPlan::resolve(&plan.target_files, run.destination, &conflicts, resolution);
        run.result.files_skipped += resolved.skipped_count();
        run.sink
            .totals(resolved.files_to_install(), resolved.bytes_to_install());

        if self.config.check_free_space {
            check_free_space(run.destination, resolved.bytes_to_install())?;
        }

        // Fresh handle on the root archive; the scan phase's handles are gone
        let prepared = prepare_archive_for_read(&plan.root_archive_path)?;
        let root_name = plan.root_display_name();

        for (chain, writes) in resolved.groups() {
            self.control.ensure_not_cancelled()?;
            let pending: Vec<&PlannedWrite<'_>> =
                writes.into_iter().filter(|w| w.will_write()).collect();
            if pending.is_empty() {
                continue;
            }

            let before = run.processed();
            if let Err(e) = self.install_group(&prepared, &root_name, chain, &pending, run) {
                if e.is_cancelled() {
                    return Err(e);
                }
                let chain_display = chain.join(CHAIN_DISPLAY_SEPARATOR);
                let message = format!("Archive chain {} failed: {}", chain_display, e);
                tracing::error!(target: "installer", "{}", message);
                run.sink.status(&message);
                run.result.errors.push(message);
                let unprocessed = pending.len().saturating_sub(run.processed() - before);
                run.result.files_failed += unprocessed;
            }
        }

        let verification = verify_installation(plan, run.destination, &run.installed, &self.control)?;
        if !verification.success {
            tracing::warn!(
                target: "verifier",
                "Verification found {} missing and {} mismatched files",
                verification.files_missing,
                verification.size_mismatches
            );
        }
        run.result.verification = Some(verification);
        Ok(())
    }
}

/// Compare the destination's free space with the bytes about to be written
fn check_free_space(destination: &Path, needed: u64) -> Result<()> {
    let available = fs2::available_space(destination).map_err(|e| EngineError::io(destination, e))?;
    if available < needed {
        return Err(EngineError::InsufficientSpace { needed, available });
    }
    Ok(())
}
