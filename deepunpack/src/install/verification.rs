use super::*;
use crate::models::VerificationResult;

const VERIFY_YIELD_INTERVAL: std::time::Duration = std::time::Duration::from_millis(25);

/// Check that every file in `installed` exists under `destination` with its
/// expected size.
///
/// Files the plan lists but that were never written are only counted in
/// `not_installed_count`; they are never reported as missing.
pub fn verify_installation(
    plan: &ScanPlan,
    destination: &Path,
    installed: &InstalledFiles,
    control: &TaskControl,
) -> Result<VerificationResult> {
    let mut result = VerificationResult {
        not_installed_count: plan
            .target_files
            .iter()
            .filter(|record| !installed.contains_key(&record.file_name))
            .count(),
        ..VerificationResult::default()
    };
    let mut pacer = Pacer::new(VERIFY_YIELD_INTERVAL);

    for (file_name, expected_size) in installed {
        control.ensure_not_cancelled()?;
        let path = destination.join(file_name);

        match fs::metadata(&path) {
            Ok(metadata) if !metadata.is_file() => {
                result
                    .verification_errors
                    .push(format!("{} is not a regular file", file_name));
            }
            Ok(metadata) if metadata.len() != *expected_size => {
                tracing::warn!(
                    target: "verifier",
                    "Size mismatch for {}: expected {}, found {}",
                    file_name,
                    expected_size,
                    metadata.len()
                );
                result.size_mismatches += 1;
                result.size_mismatch_files.push(file_name.clone());
            }
            Ok(_) => result.files_verified += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(target: "verifier", "Installed file missing: {}", file_name);
                result.files_missing += 1;
                result.missing_files.push(file_name.clone());
            }
            Err(e) => {
                result
                    .verification_errors
                    .push(format!("Cannot check {}: {}", file_name, e));
            }
        }
        pacer.tick();
    }

    result.success = result.files_missing == 0
        && result.size_mismatches == 0
        && result.verification_errors.is_empty();

    tracing::info!(
        target: "verifier",
        "Verified {} files, {} missing, {} mismatched, {} not installed",
        result.files_verified,
        result.files_missing,
        result.size_mismatches,
        result.not_installed_count
    );
    Ok(result)
}
