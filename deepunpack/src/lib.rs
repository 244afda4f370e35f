//! Find payload files buried in nested archives and install them.
//!
//! The scan phase ([`scanner::Scanner`]) walks an archive tree and produces a
//! [`models::ScanPlan`], which [`plan_store::PlanStore`] persists. The install
//! phase ([`install::Installer`]) reloads the plan, re-opens every archive
//! chain from the root, extracts the resolved files and verifies them.
//!
//! The engine itself is blocking. [`run_scan`] and [`run_install`] move an
//! operation onto tokio's blocking pool and stream progress through a channel.

pub mod archive;
pub mod core;
pub mod error;
pub mod install;
pub mod logger;
pub mod models;
pub mod plan_store;
pub mod progress;
pub mod scanner;
pub mod staging;

use std::path::PathBuf;

use tokio::sync::mpsc::UnboundedSender;

pub use crate::core::config::EngineConfig;
pub use crate::core::task_control::TaskControl;
pub use error::{ApiError, ApiErrorCode, EngineError};
pub use install::{detect_conflicts, Installer};
pub use models::{
    ConflictResolution, FileConflict, InstallationResult, ScanPlan, ScanSummary,
    TargetFileRecord, VerificationResult,
};
pub use plan_store::{PlanStore, PlanToken};
pub use progress::{ChannelSink, ProgressEvent, ProgressSink};
pub use scanner::{ScanOutcome, Scanner};

/// Scan `root` on a blocking worker, forwarding progress to `events`
pub async fn run_scan(
    root: PathBuf,
    config: EngineConfig,
    control: TaskControl,
    events: UnboundedSender<ProgressEvent>,
) -> Result<ScanOutcome, ApiError> {
    tokio::task::spawn_blocking(move || {
        tracing::debug!(target: "scanner", "Scan task started for {}", root.display());
        let sink = ChannelSink::new(events);
        Scanner::new(config, control)
            .scan(&root, &sink)
            .map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::internal(format!("Task join error: {}", e)))?
}

/// Install `plan` into `destination` on a blocking worker, forwarding
/// progress to `events`
pub async fn run_install(
    plan: ScanPlan,
    destination: PathBuf,
    resolution: ConflictResolution,
    config: EngineConfig,
    control: TaskControl,
    events: UnboundedSender<ProgressEvent>,
) -> InstallationResult {
    tokio::task::spawn_blocking(move || {
        let sink = ChannelSink::new(events);
        Installer::new(config, control).install(&plan, &destination, &resolution, &sink)
    })
    .await
    .unwrap_or_else(|e| InstallationResult::failed(ApiError::internal(format!("Task join error: {}", e))))
}
