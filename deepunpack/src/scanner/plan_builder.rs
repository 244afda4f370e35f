use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::Utc;

use crate::models::{ScanPlan, ScanSummary, TargetFileRecord};

/// Collects walker output into a [`ScanPlan`].
#[derive(Debug)]
pub struct PlanBuilder {
    root_archive_path: PathBuf,
    records: Vec<TargetFileRecord>,
}

impl PlanBuilder {
    pub fn new(root_archive_path: impl Into<PathBuf>) -> Self {
        Self {
            root_archive_path: root_archive_path.into(),
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: TargetFileRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records discovered so far, in discovery order
    pub fn records(&self) -> &[TargetFileRecord] {
        &self.records
    }

    pub fn build(self) -> ScanPlan {
        let summary = summarize(&self.records);
        ScanPlan {
            scan_timestamp: Utc::now(),
            root_archive_path: self.root_archive_path,
            target_files: self.records,
            summary,
        }
    }
}

/// Recompute the summary of a record list
pub fn summarize(records: &[TargetFileRecord]) -> ScanSummary {
    let mut files_by_extension = BTreeMap::new();
    let mut size_by_extension = BTreeMap::new();
    let mut chains = HashSet::new();
    let mut total_size = 0u64;

    for record in records {
        *files_by_extension.entry(record.extension.clone()).or_insert(0) += 1;
        *size_by_extension.entry(record.extension.clone()).or_insert(0) += record.size;
        chains.insert(record.archive_chain.as_slice());
        total_size += record.size;
    }

    ScanSummary {
        total_files: records.len(),
        total_size,
        archives_scanned: chains.len(),
        files_by_extension,
        size_by_extension,
    }
}

/// Format a per-extension breakdown like `2 esp, 1 bsa`
pub fn describe_extensions(summary: &ScanSummary) -> String {
    summary
        .files_by_extension
        .iter()
        .map(|(ext, count)| format!("{} {}", count, ext))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, size: u64, chain: &[&str]) -> TargetFileRecord {
        TargetFileRecord::new(
            name,
            size,
            chain.iter().map(|s| s.to_string()).collect(),
            name,
        )
    }

    #[test]
    fn test_summary_matches_records() {
        let mut builder = PlanBuilder::new("/in/root.zip");
        builder.push(record("a.esp", 10, &["root.zip"]));
        builder.push(record("b.esp", 20, &["root.zip", "inner.zip"]));
        builder.push(record("c.bsa", 30, &["root.zip", "inner.zip"]));
        let plan = builder.build();

        assert_eq!(plan.summary.total_files, plan.target_files.len());
        assert_eq!(
            plan.summary.total_size,
            plan.target_files.iter().map(|f| f.size).sum::<u64>()
        );
        assert_eq!(plan.summary.archives_scanned, 2);
        assert_eq!(plan.summary.files_by_extension["esp"], 2);
        assert_eq!(plan.summary.size_by_extension["bsa"], 30);
        assert_eq!(describe_extensions(&plan.summary), "1 bsa, 2 esp");
    }

    #[test]
    fn test_empty_plan() {
        let plan = PlanBuilder::new("/in/root.zip").build();
        assert_eq!(plan.summary, ScanSummary::default());
    }
}
