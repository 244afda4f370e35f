use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};

const MIB: u64 = 1024 * 1024;

/// Tunables shared by the scan and install phases.
///
/// The install phase must stage nested archives with the same threshold the
/// scanner used, so both phases read from one config value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nested archives larger than this are staged to a temp file instead of memory
    pub memory_stage_threshold: u64,
    /// Where on-disk staging files are created; the system temp dir when unset
    pub staging_dir: Option<PathBuf>,
    /// Target files larger than this use the large-file extraction strategy
    pub large_file_threshold: u64,
    /// Chunk size for staging copies and standard extraction
    pub copy_chunk_size: usize,
    /// Chunk size for the large-file extraction strategy
    pub large_copy_chunk_size: usize,
    /// Chunk size for the defensive staging retry
    pub defensive_chunk_size: usize,
    /// Maximum wall time between cooperative yields
    pub yield_interval_ms: u64,
    /// Minimum interval between byte progress reports
    pub progress_interval_ms: u64,
    /// Saved plans older than this are purged as orphans
    pub plan_max_age_days: u64,
    /// Compare available space with the resolved install size before extracting
    pub check_free_space: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_stage_threshold: 128 * MIB,
            staging_dir: None,
            large_file_threshold: 100 * MIB,
            copy_chunk_size: 1024 * 1024,
            large_copy_chunk_size: 8 * 1024 * 1024,
            defensive_chunk_size: 64 * 1024,
            yield_interval_ms: 25,
            progress_interval_ms: 150,
            plan_max_age_days: 7,
            check_free_space: true,
        }
    }
}

impl EngineConfig {
    /// Load the config file if it exists, falling back to defaults.
    ///
    /// A present but malformed file is an error rather than a silent default.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        let config: EngineConfig =
            serde_json::from_str(&content).map_err(|e| EngineError::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        Ok(config.sanitized())
    }

    pub fn yield_interval(&self) -> Duration {
        Duration::from_millis(self.yield_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn plan_max_age(&self) -> Duration {
        Duration::from_secs(self.plan_max_age_days * 24 * 60 * 60)
    }

    /// Clamp values that would stall the copy loops
    fn sanitized(mut self) -> Self {
        self.copy_chunk_size = self.copy_chunk_size.max(4096);
        self.large_copy_chunk_size = self.large_copy_chunk_size.max(4096);
        self.defensive_chunk_size = self.defensive_chunk_size.clamp(4096, self.copy_chunk_size);
        self.yield_interval_ms = self.yield_interval_ms.clamp(1, 50);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_or_default(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "memory_stage_threshold": 1024, "yield_interval_ms": 500 }"#)
            .unwrap();

        let config = EngineConfig::load_or_default(&path).unwrap();
        assert_eq!(config.memory_stage_threshold, 1024);
        assert_eq!(config.yield_interval_ms, 50);
        assert_eq!(config.large_file_threshold, 100 * MIB);
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            EngineConfig::load_or_default(&path),
            Err(EngineError::Config { .. })
        ));
    }
}
