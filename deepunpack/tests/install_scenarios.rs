mod common;

use std::collections::HashSet;
use std::fs;

use common::{scan, write_file, zip_bytes, CancelAfterFirstFile};
use deepunpack_lib::progress::SilentSink;
use deepunpack_lib::{
    detect_conflicts, run_install, run_scan, ConflictResolution, EngineConfig, Installer,
    PlanStore, ProgressEvent, TaskControl,
};

/// root.zip holds mod.esl (2048 bytes) and nested.zip, which holds extra.bsa (4096 bytes)
fn nested_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let nested = zip_bytes(&[("extra.bsa", &[7u8; 4096])]);
    let root = zip_bytes(&[("mod.esl", &[1u8; 2048]), ("nested.zip", &nested)]);
    write_file(dir, "root.zip", &root)
}

fn installer() -> Installer {
    Installer::new(EngineConfig::default(), TaskControl::new())
}

#[test]
fn scan_store_install_verify() {
    let dir = tempfile::tempdir().unwrap();
    let root = nested_fixture(dir.path());
    let dest = dir.path().join("dest");

    let plan = scan(&root);
    assert_eq!(plan.target_files.len(), 2);
    let esl = plan.target_files.iter().find(|r| r.file_name == "mod.esl").unwrap();
    assert_eq!(esl.archive_chain, vec!["root.zip"]);
    let bsa = plan.target_files.iter().find(|r| r.file_name == "extra.bsa").unwrap();
    assert_eq!(bsa.archive_chain, vec!["root.zip", "nested.zip"]);
    assert_eq!(bsa.display_archive_path, "root.zip > nested.zip");

    let store = PlanStore::new(dir.path().join("plans"));
    let token = store.put(&plan).unwrap();
    let loaded = store.get(&token).unwrap();
    assert_eq!(loaded, plan);

    let result = installer().install(&loaded, &dest, &ConflictResolution::OverwriteAll, &SilentSink);
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.files_installed, 2);
    assert_eq!(result.total_size_installed, 6144);
    let verification = result.verification.unwrap();
    assert_eq!(verification.files_verified, 2);
    assert_eq!(verification.files_missing, 0);
    assert_eq!(verification.size_mismatches, 0);
    assert_eq!(fs::metadata(dest.join("extra.bsa")).unwrap().len(), 4096);
}

#[test]
fn skip_leaves_existing_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let root = nested_fixture(dir.path());
    let dest = dir.path().join("dest");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("mod.esl"), [0u8; 10]).unwrap();

    let plan = scan(&root);
    let result = installer().install(&plan, &dest, &ConflictResolution::SkipAll, &SilentSink);

    assert!(result.success);
    assert_eq!(result.files_skipped, 1);
    assert_eq!(result.files_installed, 1);
    assert_eq!(fs::metadata(dest.join("mod.esl")).unwrap().len(), 10);

    let verification = result.verification.unwrap();
    assert!(verification.success);
    assert!(!verification.missing_files.contains(&"mod.esl".to_string()));
    assert!(!verification.size_mismatch_files.contains(&"mod.esl".to_string()));
    assert_eq!(verification.not_installed_count, 1);
}

#[test]
fn overwrite_replaces_every_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let root = nested_fixture(dir.path());
    let dest = dir.path().join("dest");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("mod.esl"), b"old").unwrap();
    fs::write(dest.join("extra.bsa"), b"old").unwrap();

    let plan = scan(&root);
    assert_eq!(detect_conflicts(&plan.target_files, &dest).len(), 2);

    let result = installer().install(&plan, &dest, &ConflictResolution::OverwriteAll, &SilentSink);
    assert!(result.success);
    assert_eq!(result.files_installed, plan.target_files.len());
    assert_eq!(result.conflicts_resolved, 2);
    assert_eq!(fs::metadata(dest.join("mod.esl")).unwrap().len(), 2048);
}

#[test]
fn selective_installs_approved_and_non_conflicting() {
    let dir = tempfile::tempdir().unwrap();
    let extra = zip_bytes(&[("third.esp", &[3u8; 30])]);
    let root = zip_bytes(&[
        ("one.esp", &[1u8; 10]),
        ("two.esm", &[2u8; 20]),
        ("more.zip", &extra),
    ]);
    let root = write_file(dir.path(), "root.zip", &root);
    let dest = dir.path().join("dest");
    fs::create_dir_all(&dest).unwrap();
    fs::write(dest.join("one.esp"), b"keep").unwrap();
    fs::write(dest.join("two.esm"), b"replace").unwrap();

    let plan = scan(&root);
    let approved = HashSet::from([dest.join("two.esm")]);
    let result = installer().install(
        &plan,
        &dest,
        &ConflictResolution::Selective(approved),
        &SilentSink,
    );

    assert!(result.success);
    assert_eq!(result.files_installed, 2);
    assert_eq!(result.files_skipped, 1);
    assert_eq!(fs::read(dest.join("one.esp")).unwrap(), b"keep");
    assert_eq!(fs::read(dest.join("two.esm")).unwrap(), vec![2u8; 20]);
    assert_eq!(fs::read(dest.join("third.esp")).unwrap(), vec![3u8; 30]);
}

#[test]
fn cancellation_mid_install_keeps_written_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = zip_bytes(&[
        ("a.esp", &[1u8; 64]),
        ("b.esp", &[2u8; 64]),
        ("c.esp", &[3u8; 64]),
    ]);
    let root = write_file(dir.path(), "root.zip", &root);
    let dest = dir.path().join("dest");
    let plan = scan(&root);

    let control = TaskControl::new();
    let sink = CancelAfterFirstFile {
        control: control.clone(),
    };
    let result = Installer::new(EngineConfig::default(), control).install(
        &plan,
        &dest,
        &ConflictResolution::OverwriteAll,
        &sink,
    );

    assert!(!result.success);
    assert!(result.cancelled);
    assert_eq!(result.files_installed, 1);
    assert!(result.verification.is_none());
    assert!(result.failure.is_some());
    assert!(dest.join("a.esp").exists());
    assert!(!dest.join("c.esp").exists());
}

#[test]
fn async_wrappers_stream_progress() {
    let dir = tempfile::tempdir().unwrap();
    let root = nested_fixture(dir.path());
    let dest = dir.path().join("dest");
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let outcome = runtime
        .block_on(run_scan(root, EngineConfig::default(), TaskControl::new(), tx))
        .unwrap();
    let mut scan_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        scan_events.push(event);
    }
    assert!(matches!(scan_events.first(), Some(ProgressEvent::Status(_))));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let result = runtime.block_on(run_install(
        outcome.plan,
        dest,
        ConflictResolution::OverwriteAll,
        EngineConfig::default(),
        TaskControl::new(),
        tx,
    ));
    assert!(result.success);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    let totals = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Totals { files: 2, bytes: 6144 }))
        .unwrap();
    let first_bytes = events
        .iter()
        .position(|e| matches!(e, ProgressEvent::Bytes { .. }))
        .unwrap();
    assert!(totals < first_bytes);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::FileCompleted))
            .count(),
        2
    );
}
