use codepool::config::{Config, ConfigError, InstanceStrategy};

use super::FIXTURES_PATH;

#[test]
fn test_load_valid_config() {
    let path = format!("{}/configs/valid_full.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("python"));
    assert!(config.languages.contains_key("javascript"));
    assert_eq!(config.timeout, 3.0);
    assert_eq!(config.strategy, InstanceStrategy::Pooled { size: 2 });
    assert_eq!(config.limits.memory_mb, Some(256));
    assert_eq!(config.max_output, Some(65536));
    assert!(!config.kill_on_timeout);

    let python = config.get_language("python").unwrap();
    assert_eq!(python.env.len(), 1);
    assert_eq!(python.image, "python:3.12-alpine");
}

#[test]
fn test_load_minimal_config() {
    let path = format!("{}/configs/valid_minimal.toml", FIXTURES_PATH);
    let config = Config::from_file(&path).expect("Failed to load config");

    assert!(config.languages.contains_key("test"));
    assert_eq!(config.timeout, 5.0);
    assert_eq!(config.strategy, InstanceStrategy::Shared);
    assert_eq!(config.sandbox_dir, "/sandbox");
}

#[test]
fn test_load_missing_file() {
    let path = format!("{}/configs/does_not_exist.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::ReadFile { .. })));
}

#[test]
fn test_load_invalid_empty_name() {
    let path = format!("{}/configs/invalid_empty_name.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_empty_extension() {
    let path = format!("{}/configs/invalid_empty_extension.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_empty_command() {
    let path = format!("{}/configs/invalid_empty_command.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(result.is_err());
}

#[test]
fn test_load_invalid_zero_pool_size() {
    let path = format!("{}/configs/invalid_zero_pool.toml", FIXTURES_PATH);
    let result = Config::from_file(&path);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}
