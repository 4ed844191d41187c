// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! History files written by one version and read by another

use std::sync::Arc;

use chrono::Local;
use tb_history::{
    history_path, list_history_files, load_file, Error, HistoryConfig, HistoryFile, HistoryStore,
    LineEntry, ManualClock, PlainEmulator, SessionController,
};
use tb_test_utils::{logged_test, logged_tokio_test, temp_storage_dir};

fn write_file(dir: &std::path::Path, file: &HistoryFile) -> std::path::PathBuf {
    let path = history_path(dir, &file.session_id).unwrap();
    std::fs::write(&path, file.encode().unwrap()).unwrap();
    path
}

#[logged_test]
fn test_future_version_is_rejected() {
    let dir = temp_storage_dir("future").unwrap();
    let mut file = HistoryFile::new("future", Local::now());
    file.version = "2.0".to_string();
    let path = write_file(dir.path(), &file);

    let err = load_file(&path).unwrap_err();
    logger.log(&format!("load error: {}", err)).unwrap();
    assert!(err.is_corrupt());
    assert!(err.to_string().contains("unsupported history version 2.0"));

    // Listing skips it rather than failing
    assert!(list_history_files(dir.path()).unwrap().is_empty());
}

#[logged_test]
fn test_garbage_file_is_corrupt_and_left_alone() {
    let dir = temp_storage_dir("garbage").unwrap();
    let path = history_path(dir.path(), "garbage").unwrap();
    std::fs::write(&path, b"not gzip at all").unwrap();

    let err = HistoryStore::create_or_open(dir.path(), "garbage", Local::now()).unwrap_err();
    assert!(matches!(err, Error::CorruptArchive { .. }));
    assert_eq!(std::fs::read(&path).unwrap(), b"not gzip at all");
}

#[logged_test]
fn test_out_of_order_rows_are_corrupt() {
    let dir = temp_storage_dir("rows").unwrap();
    let mut file = HistoryFile::new("rows", Local::now());
    file.push_archive(tb_history::ArchiveRecord::new(
        Local::now(),
        vec![
            LineEntry::content(4, "later", None),
            LineEntry::content(2, "earlier", None),
        ],
        "0-5",
        "test",
    ));
    let path = write_file(dir.path(), &file);
    assert!(load_file(&path).unwrap_err().is_corrupt());
}

#[logged_test]
fn test_session_refuses_corrupt_history() {
    let dir = temp_storage_dir("refuse").unwrap();
    std::fs::write(history_path(dir.path(), "broken").unwrap(), b"\x1f\x8bjunk").unwrap();

    let result = SessionController::open(
        "broken",
        HistoryConfig::default().with_storage_path(dir.path()),
        Box::new(PlainEmulator::new()),
        Arc::new(ManualClock::new()),
    );
    assert!(result.unwrap_err().is_corrupt());
}

#[logged_tokio_test]
async fn test_merge_import_between_sessions() {
    let dir = temp_storage_dir("merge").unwrap();
    let clock = ManualClock::new();
    let config = HistoryConfig::default()
        .with_storage_path(dir.path())
        .without_auto_archive();

    let mut source = SessionController::open(
        "source",
        config.clone(),
        Box::new(PlainEmulator::new()),
        Arc::new(clock.clone()),
    )
    .unwrap();
    source.ingest_text("imported line\n");
    let source_path = source.history_path().to_path_buf();
    source.close().await.unwrap().unwrap();

    let target = SessionController::open(
        "target",
        config,
        Box::new(PlainEmulator::new()),
        Arc::new(clock.clone()),
    )
    .unwrap();
    let lines = target.import_into_session(&source_path).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert!(!target.history_path().exists());

    assert_eq!(target.merge_import(source_path).await.unwrap(), 1);
    let merged = load_file(target.history_path()).unwrap();
    assert_eq!(merged.session_id, "target");
    assert_eq!(merged.archives[0].lines[0].content, "imported line");
    assert_eq!(list_history_files(dir.path()).unwrap().len(), 2);
}
