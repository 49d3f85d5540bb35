// Config loading and validation tests

use clusterwatch::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[node]
id = "node-a"
cache_dir = "data/cache"

[monitor]
dataset_size = 60
update_interval_secs = 30
stats_log_interval_secs = 120

[cluster]
exchange_timeout_secs = 10

[publisher]
destination = "autoscaling/cluster-a"
interval_secs = 60
initial_delay_secs = 120

[protection]
interval_secs = 45

[dump]
chunk_size = 1048576
poll_interval_ms = 500
max_wait_secs = 300
"#;

const MINIMAL_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.node.id.as_deref(), Some("node-a"));
    assert_eq!(config.monitor.dataset_size, 60);
    assert_eq!(config.monitor.update_interval_secs, 30);
    assert_eq!(config.cluster.exchange_timeout_secs, 10);
    assert_eq!(
        config.publisher.destination.as_deref(),
        Some("autoscaling/cluster-a")
    );
    assert_eq!(config.protection.interval_secs, 45);
    assert_eq!(config.dump.chunk_size, 1 << 20);
    assert_eq!(config.dump.poll_interval_ms, 500);
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let config = AppConfig::load_from_str(MINIMAL_CONFIG).expect("minimal");
    assert_eq!(config.node.id, None);
    assert_eq!(config.node.cache_dir, "data/cache");
    assert_eq!(config.monitor.dataset_size, 120);
    assert_eq!(config.monitor.update_interval_secs, 60);
    assert_eq!(config.monitor.stats_log_interval_secs, 300);
    assert_eq!(config.cluster.exchange_timeout_secs, 30);
    assert_eq!(config.publisher.destination, None);
    assert_eq!(config.publisher.interval_secs, 60);
    assert_eq!(config.publisher.initial_delay_secs, 120);
    assert_eq!(config.protection.interval_secs, 60);
    assert_eq!(config.protection.schedule, None);
    assert_eq!(config.dump.chunk_size, 1 << 30);
    assert_eq!(config.dump.poll_interval_ms, 1000);
    assert_eq!(config.dump.max_wait_secs, 600);
}

#[test]
fn test_config_dataset_size_accepts_string() {
    let s = VALID_CONFIG.replace("dataset_size = 60", "dataset_size = \" 90 \"");
    let config = AppConfig::load_from_str(&s).expect("string dataset_size");
    assert_eq!(config.monitor.dataset_size, 90);
}

#[test]
fn test_config_dataset_size_rejects_non_numeric_string() {
    let bad = VALID_CONFIG.replace("dataset_size = 60", "dataset_size = \"lots\"");
    assert!(AppConfig::load_from_str(&bad).is_err());
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_blank_node_id() {
    let bad = VALID_CONFIG.replace("id = \"node-a\"", "id = \"  \"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("node.id"));
}

#[test]
fn test_config_validation_rejects_dataset_size_zero() {
    let bad = VALID_CONFIG.replace("dataset_size = 60", "dataset_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("dataset_size"));
}

#[test]
fn test_config_validation_rejects_update_interval_zero() {
    let bad = VALID_CONFIG.replace("update_interval_secs = 30", "update_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("update_interval_secs"));
}

#[test]
fn test_config_validation_rejects_exchange_timeout_zero() {
    let bad = VALID_CONFIG.replace("exchange_timeout_secs = 10", "exchange_timeout_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("exchange_timeout_secs"));
}

#[test]
fn test_config_validation_rejects_publish_interval_zero_with_destination() {
    let bad = VALID_CONFIG.replace("interval_secs = 60\ninitial", "interval_secs = 0\ninitial");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("publisher.interval_secs"));
}

#[test]
fn test_config_protection_schedule_overrides_interval() {
    let s = VALID_CONFIG.replace(
        "interval_secs = 45",
        "interval_secs = 0\nschedule = \"0 */5 * * * *\"",
    );
    let config = AppConfig::load_from_str(&s).expect("cron schedule");
    assert_eq!(config.protection.schedule.as_deref(), Some("0 */5 * * * *"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace("interval_secs = 45", "schedule = \"every now and then\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("protection.schedule"));
}

#[test]
fn test_config_validation_rejects_chunk_size_zero() {
    let bad = VALID_CONFIG.replace("chunk_size = 1048576", "chunk_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("dump.chunk_size"));
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.node.id.as_deref(), Some("node-a"));
}
