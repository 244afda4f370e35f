//! Archive tree walker for the scan phase.
//!
//! Opens the root archive, classifies each entry by extension, records target
//! files with the chain of archives that contains them and descends into
//! nested archives through the stager. A nested archive that cannot be staged
//! or opened is reported and skipped; its siblings are still walked.

pub mod plan_builder;

use std::path::Path;
use std::time::Instant;

use crate::archive::{ArchiveFormat, ArchiveSource, EntryInfo, OpenedArchive};
use crate::core::archive_input::{normalize_archive_entry_path, prepare_archive_for_read};
use crate::core::config::EngineConfig;
use crate::core::path_utils::safe_file_name;
use crate::core::task_control::TaskControl;
use crate::error::{EngineError, Result};
use crate::models::{
    extension_of, is_target_extension, root_display_name, ScanPlan, TargetFileRecord,
    CHAIN_DISPLAY_SEPARATOR,
};
use crate::progress::ProgressSink;
use crate::staging::Stager;
use plan_builder::{describe_extensions, summarize, PlanBuilder};

/// How the walker treats an archive entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Target,
    Container(ArchiveFormat),
    Ignored,
}

/// OS metadata entries that never hold payload
#[inline]
fn should_ignore_archive_path(path: &str) -> bool {
    path.split('/')
        .any(|part| matches!(part, "__MACOSX" | ".DS_Store" | "Thumbs.db" | "desktop.ini"))
}

pub fn classify_entry(entry: &EntryInfo) -> EntryClass {
    if entry.is_dir || should_ignore_archive_path(&entry.path) {
        return EntryClass::Ignored;
    }
    let Some(ext) = extension_of(entry.file_name()) else {
        return EntryClass::Ignored;
    };
    if is_target_extension(&ext) {
        EntryClass::Target
    } else if let Some(format) = ArchiveFormat::from_extension(&ext) {
        EntryClass::Container(format)
    } else {
        EntryClass::Ignored
    }
}

/// An entry the walk could not process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFailure {
    /// Chain display string ending with the failed entry
    pub display_path: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ScanOutcome {
    pub plan: ScanPlan,
    pub failures: Vec<EntryFailure>,
}

struct WalkState<'s> {
    chain: Vec<String>,
    builder: PlanBuilder,
    failures: Vec<EntryFailure>,
    sink: &'s dyn ProgressSink,
}

impl WalkState<'_> {
    fn display_path(&self, entry: &str) -> String {
        format!(
            "{}{}{}",
            self.chain.join(CHAIN_DISPLAY_SEPARATOR),
            CHAIN_DISPLAY_SEPARATOR,
            entry
        )
    }

    fn fail(&mut self, entry: &str, message: String) {
        let display_path = self.display_path(entry);
        tracing::warn!(target: "scanner", "Skipping {}: {}", display_path, message);
        self.sink
            .status(&format!("Skipping {}: {}", display_path, message));
        self.failures.push(EntryFailure {
            display_path,
            message,
        });
    }
}

pub struct Scanner {
    config: EngineConfig,
    control: TaskControl,
    stager: Stager,
}

impl Scanner {
    pub fn new(config: EngineConfig, control: TaskControl) -> Self {
        let stager = Stager::new(&config, control.clone());
        Self {
            config,
            control,
            stager,
        }
    }

    /// Walk the archive tree under `root` and build a plan.
    ///
    /// Failure to open the root archive is fatal. Failures inside it are
    /// collected in [`ScanOutcome::failures`].
    pub fn scan(&self, root: &Path, sink: &dyn ProgressSink) -> Result<ScanOutcome> {
        let started = Instant::now();
        self.control.ensure_not_cancelled()?;

        // Stored in the plan; must resolve the same from any working directory
        let root_path = std::path::absolute(normalize_archive_entry_path(root))
            .map_err(|e| EngineError::io(root, e))?;
        let prepared = prepare_archive_for_read(&root_path)?;
        let root_name = root_display_name(&root_path);
        sink.status(&format!("Scanning {}", root_name));
        tracing::info!(target: "scanner", "Scanning {}", root_path.display());

        let source = ArchiveSource::open_file(prepared.read_path())?;
        let mut archive = OpenedArchive::open(
            root_name.clone(),
            source,
            prepared.format(),
            self.config.memory_stage_threshold,
        )?;

        let mut state = WalkState {
            chain: vec![root_name],
            builder: PlanBuilder::new(&root_path),
            failures: Vec::new(),
            sink,
        };
        self.walk(&mut archive, &mut state)?;
        drop(archive);

        let WalkState {
            builder, failures, ..
        } = state;
        let plan = builder.build();

        tracing::info!(
            target: "scanner",
            "Scan found {} target files ({} bytes) in {} archives, {} entries skipped",
            plan.summary.total_files,
            plan.summary.total_size,
            plan.summary.archives_scanned,
            failures.len()
        );
        tracing::debug!(
            target: "scanner",
            "[TIMING] Scan completed in {:.2}ms",
            started.elapsed().as_secs_f64() * 1000.0
        );
        sink.status(&format!(
            "Scan complete: {} target files found",
            plan.summary.total_files
        ));

        Ok(ScanOutcome { plan, failures })
    }

    fn walk(&self, archive: &mut OpenedArchive, state: &mut WalkState<'_>) -> Result<()> {
        self.control.ensure_not_cancelled()?;
        let entries = archive.entries()?;

        let first_record = state.builder.len();
        let mut nested = Vec::new();
        for entry in &entries {
            match classify_entry(entry) {
                EntryClass::Target => match safe_file_name(&entry.path) {
                    Ok(file_name) => state.builder.push(TargetFileRecord::new(
                        file_name,
                        entry.size,
                        state.chain.clone(),
                        entry.path.clone(),
                    )),
                    Err(e) => state.fail(&entry.path, e.to_string()),
                },
                EntryClass::Container(format) => nested.push((entry, format)),
                EntryClass::Ignored => {}
            }
        }
        let direct = state.builder.len() - first_record;

        for (entry, format) in nested {
            self.control.ensure_not_cancelled()?;
            if let Err(e) = self.descend(archive, entry, format, state) {
                if e.is_cancelled() {
                    return Err(e);
                }
                state.fail(&entry.path, e.to_string());
            }
        }

        if direct > 0 {
            let records = &state.builder.records()[first_record..first_record + direct];
            let summary = summarize(records);
            let line = format!(
                "{}: {} target files, {} bytes ({})",
                state.chain.join(CHAIN_DISPLAY_SEPARATOR),
                summary.total_files,
                summary.total_size,
                describe_extensions(&summary)
            );
            tracing::info!(target: "scanner", "{}", line);
            state.sink.status(&line);
        }

        Ok(())
    }

    /// Stage a nested archive entry, open it and walk it one level deeper
    fn descend(
        &self,
        parent: &mut OpenedArchive,
        entry: &EntryInfo,
        format: ArchiveFormat,
        state: &mut WalkState<'_>,
    ) -> Result<()> {
        tracing::debug!(
            target: "scanner",
            "Descending into {} ({} bytes) inside {}",
            entry.path,
            entry.size,
            parent.name()
        );
        let source = self.stager.stage_entry(parent, entry, format)?;
        let mut nested = OpenedArchive::open(
            entry.path.clone(),
            source,
            format,
            self.config.memory_stage_threshold,
        )?;

        state.chain.push(entry.path.clone());
        let result = self.walk(&mut nested, state);
        state.chain.pop();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::zip_bytes;
    use crate::error::EngineError;
    use crate::progress::SilentSink;

    fn entry(path: &str, is_dir: bool) -> EntryInfo {
        EntryInfo {
            index: 0,
            path: path.to_string(),
            size: 1,
            is_dir,
        }
    }

    fn write_root(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn scanner() -> Scanner {
        Scanner::new(EngineConfig::default(), TaskControl::new())
    }

    #[test]
    fn test_classify_entry() {
        assert_eq!(classify_entry(&entry("Data/Mod.ESP", false)), EntryClass::Target);
        assert_eq!(
            classify_entry(&entry("inner/Pack.7Z", false)),
            EntryClass::Container(ArchiveFormat::SevenZ)
        );
        assert_eq!(classify_entry(&entry("readme.txt", false)), EntryClass::Ignored);
        assert_eq!(classify_entry(&entry("Data.esp/", true)), EntryClass::Ignored);
        assert_eq!(
            classify_entry(&entry("__MACOSX/Data/._mod.esp", false)),
            EntryClass::Ignored
        );
    }

    #[test]
    fn test_scan_records_chain_per_depth() {
        let deepest = zip_bytes(&[("deep.ba2", &[0u8; 64])]);
        let middle = zip_bytes(&[("Data/middle.esm", &[0u8; 32]), ("deeper.zip", &deepest)]);
        let root = zip_bytes(&[
            ("top.esp", &[0u8; 16]),
            ("notes.txt", b"ignored"),
            ("nested/middle.zip", &middle),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let root_path = write_root(dir.path(), "root.zip", &root);

        let outcome = scanner().scan(&root_path, &SilentSink).unwrap();
        let plan = outcome.plan;
        assert!(outcome.failures.is_empty());
        assert_eq!(plan.target_files.len(), 3);

        let by_name = |name: &str| {
            plan.target_files
                .iter()
                .find(|r| r.file_name == name)
                .unwrap()
                .clone()
        };
        assert_eq!(by_name("top.esp").archive_chain, vec!["root.zip"]);
        let middle_record = by_name("middle.esm");
        assert_eq!(middle_record.archive_chain, vec!["root.zip", "nested/middle.zip"]);
        assert_eq!(middle_record.relative_path_in_archive, "Data/middle.esm");
        let deep = by_name("deep.ba2");
        assert_eq!(deep.archive_chain.len(), 3);
        assert_eq!(deep.size, 64);

        for record in &plan.target_files {
            assert_eq!(record.archive_chain[0], plan.root_display_name());
        }
        assert_eq!(plan.summary.total_files, 3);
        assert_eq!(plan.summary.total_size, 112);
        assert_eq!(plan.summary.archives_scanned, 3);
    }

    #[test]
    fn test_corrupt_nested_archive_does_not_stop_siblings() {
        let good = zip_bytes(&[("good.esl", &[1u8; 8])]);
        let root = zip_bytes(&[
            ("broken.zip", b"this is not a zip archive"),
            ("good.zip", &good),
            ("direct.esp", &[2u8; 4]),
        ]);
        let dir = tempfile::tempdir().unwrap();
        let root_path = write_root(dir.path(), "root.zip", &root);

        let outcome = scanner().scan(&root_path, &SilentSink).unwrap();
        assert_eq!(outcome.plan.target_files.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].display_path.ends_with("broken.zip"));
    }

    #[test]
    fn test_unsafe_target_path_is_reported() {
        let root = zip_bytes(&[("../escape.esp", &[0u8; 4]), ("ok.esp", &[0u8; 4])]);
        let dir = tempfile::tempdir().unwrap();
        let root_path = write_root(dir.path(), "root.zip", &root);

        let outcome = scanner().scan(&root_path, &SilentSink).unwrap();
        assert_eq!(outcome.plan.target_files.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let result = scanner().scan(&dir.path().join("absent.zip"), &SilentSink);
        assert!(matches!(result, Err(EngineError::Io { .. })));
    }

    #[test]
    fn test_cancelled_scan() {
        let root = zip_bytes(&[("a.esp", &[0u8; 4])]);
        let dir = tempfile::tempdir().unwrap();
        let root_path = write_root(dir.path(), "root.zip", &root);
        let control = TaskControl::new();
        control.cancel();

        let result = Scanner::new(EngineConfig::default(), control).scan(&root_path, &SilentSink);
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
