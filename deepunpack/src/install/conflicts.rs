//! Conflict detection and the resolved write plan.
//!
//! Conflicts are detected once, before any extraction. The caller's
//! [`ConflictResolution`] is then applied a single time to produce a
//! [`ResolvedPlan`], which drives both the progress totals and the extraction
//! loop so the two can never disagree.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{ConflictResolution, FileConflict, TargetFileRecord};

/// Report every record whose destination already exists. Reads metadata only.
pub fn detect_conflicts(records: &[TargetFileRecord], destination: &Path) -> Vec<FileConflict> {
    records
        .iter()
        .filter_map(|record| {
            let destination_path = record.destination_in(destination);
            let metadata = fs::metadata(&destination_path).ok()?;
            Some(FileConflict {
                destination_path,
                record: record.clone(),
                existing_size: metadata.len(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// No conflict
    Write,
    /// Conflict resolved in favour of the planned file
    Overwrite,
    /// Conflict resolved in favour of the existing file
    Skip,
}

#[derive(Debug, Clone)]
pub struct PlannedWrite<'p> {
    pub record: &'p TargetFileRecord,
    pub destination: PathBuf,
    pub decision: WriteDecision,
}

impl PlannedWrite<'_> {
    pub fn will_write(&self) -> bool {
        self.decision != WriteDecision::Skip
    }
}

/// Every plan record paired with its resolved decision, in plan order
#[derive(Debug)]
pub struct ResolvedPlan<'p> {
    writes: Vec<PlannedWrite<'p>>,
}

impl<'p> ResolvedPlan<'p> {
    pub fn resolve(
        records: &'p [TargetFileRecord],
        destination: &Path,
        conflicts: &[FileConflict],
        resolution: &ConflictResolution,
    ) -> Self {
        let conflicting: std::collections::HashSet<&Path> = conflicts
            .iter()
            .map(|c| c.destination_path.as_path())
            .collect();

        let writes = records
            .iter()
            .map(|record| {
                let destination = record.destination_in(destination);
                let decision = if !conflicting.contains(destination.as_path()) {
                    WriteDecision::Write
                } else if resolution.permits(&destination) {
                    WriteDecision::Overwrite
                } else {
                    WriteDecision::Skip
                };
                PlannedWrite {
                    record,
                    destination,
                    decision,
                }
            })
            .collect();
        Self { writes }
    }

    pub fn writes(&self) -> &[PlannedWrite<'p>] {
        &self.writes
    }

    pub fn files_to_install(&self) -> usize {
        self.writes.iter().filter(|w| w.will_write()).count()
    }

    pub fn bytes_to_install(&self) -> u64 {
        self.writes
            .iter()
            .filter(|w| w.will_write())
            .map(|w| w.record.size)
            .sum()
    }

    pub fn skipped_count(&self) -> usize {
        self.writes.len() - self.files_to_install()
    }

    /// Writes grouped by archive chain, groups in first-seen order
    pub fn groups(&self) -> Vec<(&'p [String], Vec<&PlannedWrite<'p>>)> {
        let mut index: HashMap<&'p [String], usize> = HashMap::new();
        let mut groups: Vec<(&'p [String], Vec<&PlannedWrite<'p>>)> = Vec::new();
        for write in &self.writes {
            let chain = write.record.archive_chain.as_slice();
            let slot = *index.entry(chain).or_insert_with(|| {
                groups.push((chain, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(write);
        }
        groups
    }
}
