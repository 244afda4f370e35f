#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};

use deepunpack_lib::{EngineConfig, ProgressSink, ScanPlan, Scanner, TaskControl};
use zip::write::SimpleFileOptions;

/// Build an in-memory ZIP from (name, bytes) pairs
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();
    for (name, data) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

pub fn scan(root: &Path) -> ScanPlan {
    let outcome = Scanner::new(EngineConfig::default(), TaskControl::new())
        .scan(root, &deepunpack_lib::progress::SilentSink)
        .unwrap();
    assert!(outcome.failures.is_empty(), "{:?}", outcome.failures);
    outcome.plan
}

/// Cancels the operation as soon as the first file has been written
pub struct CancelAfterFirstFile {
    pub control: TaskControl,
}

impl ProgressSink for CancelAfterFirstFile {
    fn file_completed(&self) {
        self.control.cancel();
    }
}
