//! Integration tests for codepool
//!
//! Config loading tests run anywhere. Tests that talk to a Docker daemon are
//! marked `#[ignore]`. Run with:
//!    cargo test -p codepool --features integration-tests
//!
//! To include the Docker tests:
//!    cargo test -p codepool --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::fs;
use std::sync::Arc;

use codepool::{Config, DockerRuntime, ExecutionEngine, LanguageRegistry, SandboxPool};
use tempfile::TempDir;

mod config_loading;
mod execution;
mod sandbox_lifecycle;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

/// Helper to get fixture file content
pub(crate) fn fixture_source(name: &str) -> String {
    let path = format!("{FIXTURES_PATH}/sources/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("Failed to read fixture {path}: {e}"))
}

/// Default config reduced to python, staging into a fresh temp directory
pub(crate) fn test_config() -> (Config, TempDir) {
    let staging = tempfile::tempdir().expect("Failed to create staging dir");
    let mut config = Config::default();
    config.staging_dir = staging.path().to_path_buf();
    config
        .retain_language("python")
        .expect("python missing from default config");
    (config, staging)
}

/// Connect to Docker and build an uninitialized pool for the config
pub(crate) fn docker_pool(config: &Config) -> Arc<SandboxPool> {
    let runtime = DockerRuntime::connect_with(config.docker_socket.as_deref())
        .expect("Failed to connect to docker");
    let registry = Arc::new(LanguageRegistry::from_config(config));
    Arc::new(SandboxPool::new(Arc::new(runtime), registry, config))
}

/// Initialized pool plus an engine over it
pub(crate) async fn docker_engine(config: &Config) -> (Arc<SandboxPool>, ExecutionEngine) {
    let pool = docker_pool(config);
    pool.initialize().await.expect("Failed to initialize pool");
    let engine = ExecutionEngine::from_config(Arc::clone(&pool), config);
    (pool, engine)
}
