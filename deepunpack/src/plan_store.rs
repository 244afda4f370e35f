//! JSON files holding scan plans between the scan and install phases.
//!
//! A token is the plan file's path, so it survives process restarts.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{EngineError, Result};
use crate::models::ScanPlan;

const PLAN_PREFIX: &str = "scan_plan_";
const PLAN_SUFFIX: &str = ".json";

/// Durable handle to a stored plan
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanToken(PathBuf);

impl PlanToken {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        PlanToken(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for PlanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
}

pub struct PlanStore {
    dir: PathBuf,
}

impl PlanStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `plan` to a new file and return its token.
    ///
    /// The file is written next to its final name and renamed into place, so
    /// a reader never sees a partial plan.
    pub fn put(&self, plan: &ScanPlan) -> Result<PlanToken> {
        fs::create_dir_all(&self.dir).map_err(|e| EngineError::io(&self.dir, e))?;
        let path = self
            .dir
            .join(format!("{}{}{}", PLAN_PREFIX, uuid::Uuid::new_v4(), PLAN_SUFFIX));

        let json = serde_json::to_vec_pretty(plan)?;
        let mut temp =
            tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| EngineError::io(&self.dir, e))?;
        temp.write_all(&json)
            .map_err(|e| EngineError::io(temp.path().to_path_buf(), e))?;
        temp.persist(&path)
            .map_err(|e| EngineError::io(&path, e.error))?;

        tracing::info!(
            target: "plan_store",
            "Stored plan with {} target files at {}",
            plan.target_files.len(),
            path.display()
        );
        Ok(PlanToken(path))
    }

    pub fn get(&self, token: &PlanToken) -> Result<ScanPlan> {
        let content = match fs::read(token.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::PlanNotFound(token.path().to_path_buf()));
            }
            Err(e) => return Err(EngineError::io(token.path(), e)),
        };
        Ok(serde_json::from_slice(&content)?)
    }

    /// Remove a plan. Deleting a plan that is already gone is not an error.
    pub fn delete(&self, token: &PlanToken) -> Result<()> {
        match fs::remove_file(token.path()) {
            Ok(()) => {
                tracing::debug!(target: "plan_store", "Deleted plan {}", token);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::io(token.path(), e)),
        }
    }

    /// Stored plans, oldest first
    pub fn list(&self) -> Result<Vec<PlanToken>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EngineError::io(&self.dir, e)),
        };

        let mut plans: Vec<(SystemTime, PathBuf)> = read_dir
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_plan_file(path))
            .map(|path| {
                let modified = fs::metadata(&path)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, path)
            })
            .collect();
        plans.sort();
        Ok(plans.into_iter().map(|(_, path)| PlanToken(path)).collect())
    }

    /// Delete plans that are older than `max_age`, unreadable, or whose root
    /// archive no longer exists.
    pub fn purge_orphans(&self, max_age: Duration) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();
        let now = SystemTime::now();

        for token in self.list()? {
            let reason = match self.get(&token) {
                Err(e) => Some(e.to_string()),
                Ok(plan) if !plan.root_archive_path.exists() => Some(format!(
                    "root archive {} is gone",
                    plan.root_archive_path.display()
                )),
                Ok(_) => {
                    let age = fs::metadata(token.path())
                        .and_then(|m| m.modified())
                        .ok()
                        .and_then(|modified| now.duration_since(modified).ok())
                        .unwrap_or_default();
                    (age >= max_age).then(|| {
                        format!("older than {} days", max_age.as_secs() / 86_400)
                    })
                }
            };

            match reason {
                Some(reason) => {
                    tracing::info!(target: "plan_store", "Purging plan {}: {}", token, reason);
                    self.delete(&token)?;
                    report.removed.push(token.0);
                }
                None => report.kept += 1,
            }
        }
        Ok(report)
    }
}

fn is_plan_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(PLAN_PREFIX) && n.ends_with(PLAN_SUFFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetFileRecord;
    use crate::scanner::plan_builder::PlanBuilder;

    fn sample_plan(root: &Path) -> ScanPlan {
        let mut builder = PlanBuilder::new(root);
        builder.push(TargetFileRecord::new("mod.esl", 2048, vec!["root.zip".into()], "mod.esl"));
        builder.push(TargetFileRecord::new(
            "extra.bsa",
            4096,
            vec!["root.zip".into(), "nested.7z".into()],
            "Data/extra.bsa",
        ));
        builder.build()
    }

    #[test]
    fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path().join("plans"));
        let plan = sample_plan(Path::new("/archives/root.zip"));

        let token = store.put(&plan).unwrap();
        assert!(token.path().exists());
        assert_eq!(store.get(&token).unwrap(), plan);
        assert_eq!(store.list().unwrap(), vec![token]);
    }

    #[test]
    fn test_get_missing_and_delete_twice() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStore::new(dir.path());
        let plan = sample_plan(Path::new("/archives/root.zip"));
        let token = store.put(&plan).unwrap();

        store.delete(&token).unwrap();
        store.delete(&token).unwrap();
        assert!(matches!(store.get(&token), Err(EngineError::PlanNotFound(_))));
    }

    #[test]
    fn test_corrupt_plan_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_plan_broken.json");
        fs::write(&path, "{ \"scanTimestamp\": 1").unwrap();
        let store = PlanStore::new(dir.path());
        assert!(matches!(
            store.get(&PlanToken::from_path(&path)),
            Err(EngineError::PlanFormat(_))
        ));
    }

    #[test]
    fn test_purge_orphans() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("root.zip");
        fs::write(&root, b"placeholder").unwrap();
        let store = PlanStore::new(dir.path().join("plans"));

        let live = store.put(&sample_plan(&root)).unwrap();
        let orphan = store.put(&sample_plan(&dir.path().join("gone.zip"))).unwrap();
        let garbage = store.dir().join("scan_plan_garbage.json");
        fs::write(&garbage, "not json").unwrap();
        fs::write(store.dir().join("unrelated.txt"), "keep me").unwrap();

        let report = store.purge_orphans(Duration::from_secs(3600)).unwrap();
        assert_eq!(report.kept, 1);
        assert_eq!(report.removed.len(), 2);
        assert!(live.path().exists());
        assert!(!orphan.path().exists());
        assert!(!garbage.exists());
        assert!(store.dir().join("unrelated.txt").exists());

        let report = store.purge_orphans(Duration::ZERO).unwrap();
        assert_eq!(report.removed.len(), 1);
        assert!(!live.path().exists());
    }
}
