use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::config::language::{FileExtension, Language, SOURCE_PLACEHOLDER};
use crate::types::{BindMount, ResourceLimits};

pub mod language;
mod loader;

/// Largest accepted execution timeout in seconds (one day)
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../codepool.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("language '{0}' not found in configuration")]
    LanguageNotFound(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How sandbox instances are provided to executions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InstanceStrategy {
    /// One long-lived instance per language, shared by concurrent executions
    #[default]
    Shared,

    /// `size` long-lived instances per language, each leased exclusively
    Pooled { size: usize },

    /// A fresh instance per execution, stopped once the execution finishes
    Ephemeral,
}

impl InstanceStrategy {
    /// Number of long-lived instances provisioned per language at startup
    pub fn instances_per_language(&self) -> usize {
        match self {
            InstanceStrategy::Shared => 1,
            InstanceStrategy::Pooled { size } => *size,
            InstanceStrategy::Ephemeral => 0,
        }
    }
}

/// Config for codepool
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Host directory where scripts and input are staged.
    ///
    /// Bind-mounted into every sandbox instance at `sandbox_dir`.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Mount point of the staging directory inside sandbox instances
    #[serde(default = "default_sandbox_dir")]
    pub sandbox_dir: String,

    /// Wall-clock deadline per execution in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Kill the program inside the instance when its deadline expires
    #[serde(default = "default_kill_on_timeout")]
    pub kill_on_timeout: bool,

    /// Maximum bytes kept per output stream (excess is discarded)
    #[serde(default)]
    pub max_output: Option<usize>,

    /// Docker socket path (uses the local defaults if not specified)
    #[serde(default)]
    pub docker_socket: Option<PathBuf>,

    /// How instances are provided to executions
    #[serde(default)]
    pub strategy: InstanceStrategy,

    /// Default resource limits applied to all instances
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Language configurations keyed by language ID
    #[serde(default)]
    pub languages: HashMap<String, Language>,
}

impl Config {
    /// Create a new config with embedded default languages
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty config with no languages
    pub fn empty() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            sandbox_dir: default_sandbox_dir(),
            timeout: default_timeout(),
            kill_on_timeout: default_kill_on_timeout(),
            max_output: None,
            docker_socket: None,
            strategy: InstanceStrategy::default(),
            limits: ResourceLimits::default(),
            languages: HashMap::new(),
        }
    }

    /// Get a language by ID
    pub fn get_language(&self, id: &str) -> Result<&Language, ConfigError> {
        self.languages
            .get(id)
            .ok_or_else(|| ConfigError::LanguageNotFound(id.to_string()))
    }

    /// Keep only the given language, dropping all others
    pub fn retain_language(&mut self, id: &str) -> Result<(), ConfigError> {
        self.get_language(id)?;
        self.languages.retain(|key, _| key == id);
        Ok(())
    }

    /// Execution deadline as a duration
    ///
    /// Saturates instead of panicking if `timeout` was set out of range
    /// after validation.
    pub fn deadline(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout.max(0.0)).unwrap_or(Duration::MAX)
    }

    /// Check a timeout in seconds and convert it to a deadline
    pub fn parse_timeout(secs: f64) -> Result<Duration, ConfigError> {
        if !(secs.is_finite() && secs > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "timeout must be positive, got {secs}"
            )));
        }
        if secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid(format!(
                "timeout must be at most {MAX_TIMEOUT_SECS} seconds, got {secs}"
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }

    /// The staging bind mount shared by every sandbox instance
    pub fn staging_mount(&self) -> BindMount {
        BindMount {
            source: self.staging_dir.to_string_lossy().into_owned(),
            target: self.sandbox_dir.clone(),
            read_only: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_staging_dir() -> PathBuf {
    std::env::temp_dir().join("codepool")
}

fn default_sandbox_dir() -> String {
    "/sandbox".to_owned()
}

fn default_timeout() -> f64 {
    5.0
}

fn default_kill_on_timeout() -> bool {
    true
}
