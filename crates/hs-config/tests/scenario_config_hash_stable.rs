//! Scenario: the config hash identifies the effective configuration.
//!
//! # Invariants under test
//!
//! 1. Same input, same hash.
//! 2. Key order within YAML does not change the hash.
//! 3. Different values give a different hash.
//! 4. Later layers override earlier ones.

use hs_config::load_layered_yaml_from_strings;

const BASE_YAML: &str = r#"
primary:
  sentinel_key: "0"
  watch_keys: ["0"]
durable:
  feed_limit: 50
mirror:
  max_attempts: 3
  retry_backoff_ms: 250
"#;

const BASE_YAML_REORDERED: &str = r#"
mirror:
  retry_backoff_ms: 250
  max_attempts: 3
durable:
  feed_limit: 50
primary:
  watch_keys: ["0"]
  sentinel_key: "0"
"#;

const OVERLAY_YAML: &str = r#"
mirror:
  max_attempts: 5
notifications:
  enabled: false
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
}

#[test]
fn different_values_produce_different_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_takes_effect_in_typed_config() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let cfg = loaded.engine().unwrap();
    assert_eq!(cfg.mirror.max_attempts, 5);
    assert_eq!(cfg.mirror.retry_backoff_ms, 250);
    assert!(!cfg.notifications.enabled);
    assert_eq!(cfg.primary.watch_keys, vec!["0".to_string()]);
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}
