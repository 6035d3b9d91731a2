//! Scenario: configuration is loaded from layered files on disk.
//!
//! # Invariants under test
//!
//! 1. Files merge in argument order.
//! 2. A missing file is an error naming the path.
//! 3. A misspelt key fails typed loading.

use std::fs;

use hs_config::{load_engine_config, load_layered_yaml};

#[test]
fn files_merge_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let local = dir.path().join("local.yaml");
    fs::write(&base, "durable:\n  feed_limit: 20\nmirror:\n  max_attempts: 2\n").unwrap();
    fs::write(&local, "durable:\n  feed_limit: 10\n").unwrap();

    let (cfg, loaded) =
        load_engine_config(&[base.to_str().unwrap(), local.to_str().unwrap()]).unwrap();
    assert_eq!(cfg.durable.feed_limit, 10);
    assert_eq!(cfg.mirror.max_attempts, 2);
    assert_eq!(loaded.config_hash.len(), 64);
}

#[test]
fn missing_file_names_the_path() {
    let err = load_layered_yaml(&["/nonexistent/hs/base.yaml"])
        .unwrap_err()
        .to_string();
    assert!(err.contains("/nonexistent/hs/base.yaml"), "got: {err}");
}

#[test]
fn misspelt_key_fails_typed_load() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("bad.yaml");
    fs::write(&p, "notifications:\n  enable: false\n").unwrap();
    assert!(load_engine_config(&[p.to_str().unwrap()]).is_err());
}
