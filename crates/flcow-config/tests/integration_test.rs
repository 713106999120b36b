//! Integration tests for flcow-config
//!
//! These tests verify config file loading and policy handling against real
//! files on disk.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use flcow_config::{Config, ConfigError, LogLevel, PolicyList};
use tempfile::tempdir;

#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let flcow_dir = temp.path().join(".flcow");
    std::fs::create_dir_all(&flcow_dir).unwrap();

    let config_content = r#"
[policy]
paths = ["/srv/builds", "/home/u/src"]

[layer]
library = "/usr/local/lib/libflcow_layer.so"

[log]
level = "trace"
"#;
    let path = flcow_dir.join("config.toml");
    std::fs::write(&path, config_content).unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(
        config.policy.paths,
        vec![PathBuf::from("/srv/builds"), PathBuf::from("/home/u/src")]
    );
    assert_eq!(
        config.layer.library.as_deref(),
        Some(Path::new("/usr/local/lib/libflcow_layer.so"))
    );
    assert_eq!(config.log.level, LogLevel::Trace);
}

#[test]
fn test_partial_config_uses_defaults() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[policy]\npaths = [\"/data\"]\n").unwrap();

    let config = Config::load_from(&path).unwrap();
    assert_eq!(config.policy_list().to_env_value(), OsString::from("/data"));
    assert!(config.layer.library.is_none());
    assert_eq!(config.log.level, LogLevel::Warn);
}

#[test]
fn test_invalid_toml_reports_path() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("broken.toml");
    std::fs::write(&path, "[policy\npaths = 3").unwrap();

    match Config::load_from(&path) {
        Err(ConfigError::Toml { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected TOML error, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let temp = tempdir().unwrap();
    let err = Config::load_from(&temp.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_generated_toml_parses_back() {
    let mut config = Config::default();
    config.policy.paths.push(PathBuf::from("/srv/a"));
    config.log.level = LogLevel::Debug;

    let parsed: Config = toml::from_str(&config.to_toml()).unwrap();
    assert_eq!(parsed.policy.paths, config.policy.paths);
    assert_eq!(parsed.log.level, LogLevel::Debug);
}

#[test]
fn test_policy_env_value_matches_layer_parsing() {
    let mut list = PolicyList::default();
    list.push("/srv/a");
    list.push("/srv/b");
    let reparsed = PolicyList::parse(&list.to_env_value());
    assert_eq!(reparsed, list);
    assert!(reparsed.matches(Path::new("/srv/b/file")));
}
