use codepool::{ExecuteError, ExecutionRequest, ExecutionStatus};

use super::{docker_engine, fixture_source, test_config};

#[tokio::test]
#[ignore = "requires docker"]
async fn test_run_hello_world() {
    let (config, staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("python", fixture_source("hello.py"));
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "Hello, World!");
    assert_eq!(result.stderr, "");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_run_with_stdin() {
    let (config, _staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("python", fixture_source("echo.py")).with_stdin("hello");
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Completed);
    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "");

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_infinite_loop_times_out() {
    let (config, staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("python", fixture_source("infinite_loop.py"));
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(
        (5000.0..5200.0).contains(&result.elapsed_millis),
        "elapsed {}ms",
        result.elapsed_millis
    );
    assert!(result.stderr.contains("timed out after 5 seconds"));
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);

    // The instance is still usable after a timeout
    let request = ExecutionRequest::new("python", fixture_source("hello.py"));
    let result = engine.execute(&request).await.expect("Execution failed");
    assert_eq!(result.status, ExecutionStatus::Completed);

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_exception_is_error() {
    let (config, _staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("python", fixture_source("divide_by_zero.py"));
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Error);
    assert!(result.stderr.contains("ZeroDivisionError"));
    assert_eq!(result.exit_code, Some(1));

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_stderr_with_zero_exit_is_error() {
    let (config, _staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("python", fixture_source("stderr_only.py"));
    let result = engine.execute(&request).await.expect("Execution failed");

    assert_eq!(result.status, ExecutionStatus::Error);
    assert_eq!(result.stderr, "warning");
    assert_eq!(result.exit_code, Some(0));

    pool.shutdown().await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_unsupported_language() {
    let (config, _staging) = test_config();
    let (pool, engine) = docker_engine(&config).await;

    let request = ExecutionRequest::new("ruby", "puts 1");
    let err = engine.execute(&request).await.unwrap_err();
    assert!(matches!(err, ExecuteError::UnsupportedLanguage(_)));

    pool.shutdown().await;
}
