use mc_config::{ConfigError, DEFAULT_SERVER_YAML, ServerConfig, parse_yaml, pad_secret};
use std::io::Write;

#[test]
fn default_yaml_parses_with_expected_defaults() {
    let config: ServerConfig = parse_yaml("default", DEFAULT_SERVER_YAML).expect("parse");
    assert_eq!(config.bus.bus_type, "embedded");
    assert_eq!(config.bus.queue_capacity, 1000);
    assert_eq!(config.system.jobs.sunrise_update, "0 15 1 * * *");
    assert_eq!(config.system.jobs.node_state.inactive_duration, "15m");
    assert_eq!(config.web.http.addr(), "0.0.0.0:8080");
    assert_eq!(config.gateway.labels.get("location"), Some("server"));
    assert!(config.virtual_assistant.disabled);
}

#[test]
fn empty_yaml_falls_back_to_defaults() {
    let config: ServerConfig = parse_yaml("empty", "").expect("parse");
    assert_eq!(config.logger.level.metric, "warn");
    assert!(config.database.metric_disabled());
}

#[test]
fn secret_is_validated_and_padded() {
    assert_eq!(pad_secret("abc").expect("pad").len(), 32);
    assert!(pad_secret("abc").expect("pad").starts_with("abc000"));
    assert!(matches!(pad_secret(""), Err(ConfigError::Missing(_))));
    assert!(matches!(pad_secret(&"x".repeat(33)), Err(ConfigError::Invalid(..))));
}

#[test]
fn load_applies_env_overrides_and_exports_env() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    write!(
        file,
        "secret: s1\nbus:\n  topic_prefix: from_file\ndirectories:\n  data: /tmp/mc\n"
    )
    .expect("write");

    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("MC_BUS_TOPIC_PREFIX", "from_env");
        std::env::set_var("MC_LOG_LEVEL", "debug");
    }
    let config = ServerConfig::load(file.path()).expect("load");
    assert_eq!(config.bus.topic_prefix, "from_env");
    assert_eq!(config.logger.level.core, "debug");
    assert_eq!(config.secret.len(), 32);

    let vars = config.exported_env(chrono::Utc::now());
    assert_eq!(vars["MC_DIR_DATA"], "/tmp/mc");
    assert_eq!(vars["MC_METRIC_DB_DISABLED"], "true");
    assert!(vars.contains_key("MC_RUNNING_SINCE"));
}

#[test]
fn missing_file_is_a_read_error() {
    let err = ServerConfig::load("/nonexistent/mycontroller.yaml").expect_err("missing");
    assert!(matches!(err, ConfigError::Read(..)));
}
