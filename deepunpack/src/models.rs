use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Payload extensions recognized as installable (compared case-insensitively)
pub const TARGET_EXTENSIONS: &[&str] = &["esp", "esm", "esl", "bsa", "ba2"];

/// Separator used in the human-readable chain display string
pub const CHAIN_DISPLAY_SEPARATOR: &str = " > ";

/// One discovered occurrence of a target file inside an archive tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFileRecord {
    pub file_name: String,
    /// Lowercase extension without the dot
    pub extension: String,
    /// Declared uncompressed size from the entry header
    pub size: u64,
    /// Archive names from the root archive down to the innermost archive.
    /// `archive_chain[0]` is the root's display name; later segments are
    /// in-archive paths of nested archives.
    pub archive_chain: Vec<String>,
    pub relative_path_in_archive: String,
    pub display_archive_path: String,
}

impl TargetFileRecord {
    pub fn new(
        file_name: impl Into<String>,
        size: u64,
        archive_chain: Vec<String>,
        relative_path_in_archive: impl Into<String>,
    ) -> Self {
        let file_name = file_name.into();
        let extension = extension_of(&file_name).unwrap_or_default();
        let display_archive_path = archive_chain.join(CHAIN_DISPLAY_SEPARATOR);
        Self {
            file_name,
            extension,
            size,
            archive_chain,
            relative_path_in_archive: relative_path_in_archive.into(),
            display_archive_path,
        }
    }

    /// Nesting depth below the root archive
    pub fn depth(&self) -> usize {
        self.archive_chain.len().saturating_sub(1)
    }

    /// Where this record lands inside `destination`
    pub fn destination_in(&self, destination: &Path) -> PathBuf {
        destination.join(&self.file_name)
    }
}

/// Lowercase extension of a file name, if it has one
pub fn extension_of(name: &str) -> Option<String> {
    let file_name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() && ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_target_extension(ext: &str) -> bool {
    TARGET_EXTENSIONS.iter().any(|t| t.eq_ignore_ascii_case(ext))
}

/// Aggregate statistics over a plan's records. Always recomputed from the
/// record list, never edited in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub total_files: usize,
    pub total_size: u64,
    /// Number of distinct archive chains holding at least one target file
    pub archives_scanned: usize,
    pub files_by_extension: BTreeMap<String, usize>,
    pub size_by_extension: BTreeMap<String, u64>,
}

/// The only artifact carried from the scan phase to the install phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanPlan {
    pub scan_timestamp: DateTime<Utc>,
    pub root_archive_path: PathBuf,
    pub target_files: Vec<TargetFileRecord>,
    pub summary: ScanSummary,
}

impl ScanPlan {
    /// Display name of the root archive, the expected first chain segment
    pub fn root_display_name(&self) -> String {
        root_display_name(&self.root_archive_path)
    }
}

pub fn root_display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A planned output path that already exists at the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileConflict {
    pub destination_path: PathBuf,
    pub record: TargetFileRecord,
    pub existing_size: u64,
}

/// The caller's decision for the whole conflict set
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictResolution {
    OverwriteAll,
    SkipAll,
    Cancel,
    /// Overwrite only the approved destination paths; skip other conflicts
    Selective(HashSet<PathBuf>),
}

impl ConflictResolution {
    /// Whether a conflicting write to `destination` may proceed
    pub fn permits(&self, destination: &Path) -> bool {
        match self {
            ConflictResolution::OverwriteAll => true,
            ConflictResolution::SkipAll | ConflictResolution::Cancel => false,
            ConflictResolution::Selective(approved) => approved.contains(destination),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub files_verified: usize,
    pub files_missing: usize,
    pub size_mismatches: usize,
    pub missing_files: Vec<String>,
    pub size_mismatch_files: Vec<String>,
    pub verification_errors: Vec<String>,
    /// Planned files not installed because of skip decisions; informational
    pub not_installed_count: usize,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationResult {
    pub success: bool,
    pub cancelled: bool,
    pub files_installed: usize,
    pub files_skipped: usize,
    /// Files lost to per-file or per-chain failures
    pub files_failed: usize,
    /// Conflicting files that were overwritten
    pub conflicts_resolved: usize,
    pub total_size_installed: u64,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    /// Fatal failure that aborted the install
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ApiError>,
}

impl InstallationResult {
    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn failed(error: ApiError) -> Self {
        Self {
            errors: vec![error.to_string()],
            failure: Some(error),
            ..Self::default()
        }
    }

    /// Extraction succeeded but something deserves the user's attention
    pub fn has_warnings(&self) -> bool {
        !self.errors.is_empty()
            || self
                .verification
                .as_ref()
                .map(|v| !v.success)
                .unwrap_or(false)
    }

    /// Succeeded with nothing left to inspect, so the plan can be discarded
    pub fn is_clean(&self) -> bool {
        self.success && !self.has_warnings()
    }
}
