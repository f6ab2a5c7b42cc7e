//! A library for running untrusted code in pooled container sandboxes.
//!
//! Codepool keeps live, resource-capped sandbox instances for every
//! configured language and runs submitted programs inside them through a
//! container runtime's management API. Each execution is bounded by a
//! wall-clock deadline and classified from its output streams.
//!
//! # Features
//!
//! - **Sandbox pool**: instances provisioned once per language, shared, pooled or ephemeral.
//! - **Docker backend**: image pull, container lifecycle and attached execs via bollard.
//! - **Per-execution staging**: unique script and input artifacts, removed on every path.
//! - **Deadlines**: timed out programs are classified `Timeout` and killed inside the instance.
//! - **TOML configuration**: languages, images, run commands and resource limits.
//!
//! ```rust,ignore
//! let config = Config::from_file("codepool.toml")?;
//! let runtime = Arc::new(DockerRuntime::connect_with(config.docker_socket.as_deref())?);
//! let registry = Arc::new(LanguageRegistry::from_config(&config));
//! let pool = Arc::new(SandboxPool::new(runtime, registry, &config));
//! pool.initialize().await?;
//!
//! let engine = ExecutionEngine::from_config(Arc::clone(&pool), &config);
//! let result = engine
//!     .execute(&ExecutionRequest::new("python", "print(input())").with_stdin("hello"))
//!     .await?;
//! assert_eq!(result.stdout, "hello");
//!
//! pool.shutdown().await;
//! ```

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, InstanceStrategy, Language};
pub use engine::{EngineSettings, ExecuteError, ExecutionEngine, timeout_notice};
pub use pool::{LanguageStatus, PoolError, SandboxHandle, SandboxLease, SandboxPool, SandboxState};
pub use registry::LanguageRegistry;
pub use runtime::{DockerRuntime, RuntimeError, SandboxRuntime};
pub use types::{BindMount, ExecutionRequest, ExecutionResult, ExecutionStatus, ResourceLimits};

pub mod config;
pub mod engine;
pub mod pool;
pub mod registry;
pub mod runtime;
pub mod types;
