use std::sync::Arc;

use codepool::{
    DockerRuntime, ExecutionEngine, ExecutionRequest, ExecutionStatus, InstanceStrategy,
    SandboxState,
};

use super::{docker_pool, test_config};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_ping() {
    let runtime = DockerRuntime::connect().expect("Failed to connect to docker");
    runtime.ping().await.expect("Docker did not answer");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_pool_initialize_and_shutdown() {
    let (config, staging) = test_config();
    let pool = docker_pool(&config);

    pool.initialize().await.expect("Failed to initialize pool");

    let handle = pool.handle_for("python").expect("python handle missing");
    assert_eq!(handle.state, SandboxState::Running);
    assert!(staging.path().is_dir());

    pool.shutdown().await;
    assert!(pool.handle_for("python").is_none());

    // A second shutdown finds nothing to stop and still completes
    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_missing_image_fails_only_that_language() {
    let (mut config, _staging) = test_config();
    let mut broken = config.get_language("python").unwrap().clone();
    broken.image = "codepool.invalid/does-not-exist:never".to_owned();
    config.languages.insert("broken".to_owned(), broken);

    let pool = docker_pool(&config);
    pool.initialize().await.expect("Failed to initialize pool");

    assert_eq!(pool.state_of("broken"), Some(SandboxState::Failed));
    assert!(pool.handle_for("broken").is_none());
    assert!(pool.handle_for("python").is_some());

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_ephemeral_strategy() {
    let (mut config, _staging) = test_config();
    config.strategy = InstanceStrategy::Ephemeral;

    let pool = docker_pool(&config);
    pool.initialize().await.expect("Failed to initialize pool");
    assert!(pool.is_available("python"));
    assert!(pool.handles().is_empty());

    let engine = ExecutionEngine::from_config(Arc::clone(&pool), &config);
    let request = ExecutionRequest::new("python", "print(input())").with_stdin("fresh");
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "fresh");

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_concurrent_executions_share_instance() {
    let (config, staging) = test_config();
    let pool = docker_pool(&config);
    pool.initialize().await.expect("Failed to initialize pool");
    let engine = ExecutionEngine::from_config(Arc::clone(&pool), &config);

    let requests: Vec<ExecutionRequest> = (0..4)
        .map(|i| ExecutionRequest::new("python", "print(input())").with_stdin(format!("run {i}")))
        .collect();
    let results = futures::future::join_all(requests.iter().map(|r| engine.execute(r))).await;

    for (i, result) in results.into_iter().enumerate() {
        let result = result.expect("Execution failed");
        assert_eq!(result.stdout, format!("run {i}"));
    }
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    pool.shutdown().await;
}
