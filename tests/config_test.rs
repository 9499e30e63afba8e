//! Config file persistence.

use chat_socket::config::CONFIG_FILE;
use chat_socket::ClientConfig;
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = TempDir::new().expect("tempdir");
    let config = ClientConfig::load_from(dir.path()).expect("load");
    assert_eq!(config, ClientConfig::default());
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().expect("tempdir");
    let config = ClientConfig {
        ws_url: "ws://localhost:3030".to_string(),
        api_key: "key".to_string(),
        backoff_cap_ms: 5_000,
        ..ClientConfig::default()
    };

    config.save_to(dir.path()).expect("save");
    let loaded = ClientConfig::load_from(dir.path()).expect("load");
    assert_eq!(loaded, config);
}

#[test]
fn test_save_creates_nested_dir() {
    let dir = TempDir::new().expect("tempdir");
    let nested = dir.path().join("a").join("b");
    ClientConfig::default().save_to(&nested).expect("save");
    assert!(nested.join(CONFIG_FILE).exists());
}

#[cfg(unix)]
#[test]
fn test_saved_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().expect("tempdir");
    ClientConfig::default().save_to(dir.path()).expect("save");
    let mode = std::fs::metadata(dir.path().join(CONFIG_FILE))
        .expect("metadata")
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o600);
}

#[test]
fn test_invalid_json_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join(CONFIG_FILE), "{ not json").expect("write");
    assert!(ClientConfig::load_from(dir.path()).is_err());
}
