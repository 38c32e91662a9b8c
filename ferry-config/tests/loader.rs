use std::fs;

use ferry_config::{ConfigLoadError, ConfigLoader, ConfigSource};

fn empty_env() -> [(&'static str, &'static str); 0] {
    []
}

#[test]
fn defaults_when_nothing_is_configured() {
    let root = tempfile::tempdir().unwrap();
    let load = ConfigLoader::new()
        .with_root(root.path())
        .with_env(empty_env())
        .load()
        .unwrap();

    assert_eq!(load.source, ConfigSource::Defaults);
    assert!(!load.env_file_loaded);
    assert_eq!(load.config.publisher.queue, "file_transfer");
    assert_eq!(load.config.transfer.port, 48463);
    assert_eq!(load.config.broker.port, 6379);
}

#[test]
fn finds_config_under_the_root() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir(root.path().join("config")).unwrap();
    fs::write(
        root.path().join("config/ferry.toml"),
        r#"
[broker]
port = 6380

[watch]
extensions = [".jpg", ".png"]

[transfer]
port = 50000
"#,
    )
    .unwrap();

    let load = ConfigLoader::new()
        .with_root(root.path())
        .with_env(empty_env())
        .load()
        .unwrap();

    assert_eq!(
        load.source,
        ConfigSource::File(root.path().join("config/ferry.toml"))
    );
    let config = load.config;
    assert_eq!(config.broker.port, 6380);
    assert_eq!(config.watch.extensions, vec![".jpg", ".png"]);
    assert_eq!(config.transfer.port, 50000);
    // Untouched sections keep their defaults.
    assert_eq!(config.publisher.publish_interval_ms, 500);
    assert_eq!(config.transfer.chunk_size, 4096);
}

#[test]
fn environment_overrides_file_and_env_file() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("ferry.toml"), "[publisher]\nqueue = \"from_file\"\n").unwrap();
    fs::write(
        root.path().join(".env"),
        "FERRY_QUEUE=from_env_file\nFERRY_TRANSFER_PORT=40000\n",
    )
    .unwrap();

    let load = ConfigLoader::new()
        .with_root(root.path())
        .with_env([
            ("FERRY_QUEUE", "from_process"),
            ("FERRY_WATCH_EXTENSIONS", ".jpg, .JPEG"),
            ("FERRY_RECONNECT_DELAY_MS", "250"),
        ])
        .load()
        .unwrap();

    assert!(load.env_file_loaded);
    assert_eq!(load.config.publisher.queue, "from_process");
    assert_eq!(load.config.transfer.port, 40000);
    assert_eq!(load.config.watch.extensions, vec![".jpg", ".JPEG"]);
    assert_eq!(load.config.publisher.reconnect_delay_ms, 250);
}

#[test]
fn explicit_path_must_exist() {
    let root = tempfile::tempdir().unwrap();
    let missing = root.path().join("nope.toml");
    let err = ConfigLoader::new()
        .with_root(root.path())
        .with_config_path(&missing)
        .with_env(empty_env())
        .load()
        .unwrap_err();

    assert!(matches!(err, ConfigLoadError::MissingFile { path } if path == missing));
}

#[test]
fn config_path_variable_is_honoured() {
    let root = tempfile::tempdir().unwrap();
    let elsewhere = tempfile::tempdir().unwrap();
    let path = elsewhere.path().join("node.toml");
    fs::write(&path, "[consumer]\ngroup = \"inbox-a\"\n").unwrap();

    let load = ConfigLoader::new()
        .with_root(root.path())
        .with_env([("FERRY_CONFIG_PATH", path.to_string_lossy().into_owned())])
        .load()
        .unwrap();

    assert_eq!(load.source, ConfigSource::File(path));
    assert_eq!(load.config.consumer.group, "inbox-a");
}

#[test]
fn bad_values_are_reported_with_their_key() {
    let root = tempfile::tempdir().unwrap();
    let err = ConfigLoader::new()
        .with_root(root.path())
        .with_env([("FERRY_TRANSFER_PORT", "not-a-port")])
        .load()
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigLoadError::InvalidEnv { key: "FERRY_TRANSFER_PORT", .. }
    ));

    let err = ConfigLoader::new()
        .with_root(root.path())
        .with_env([("FERRY_PUBLISH_INTERVAL_MS", "0")])
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Invalid(ref msg) if msg.contains("publish_interval_ms")));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let root = tempfile::tempdir().unwrap();
    fs::write(root.path().join("ferry.toml"), "[transfer\nport = 1").unwrap();

    let err = ConfigLoader::new()
        .with_root(root.path())
        .with_env(empty_env())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigLoadError::Parse { .. }));
}
