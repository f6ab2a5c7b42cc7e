//! Configuration file loading for codepool
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError, InstanceStrategy};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::ReadFile {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }

        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        Config::parse_timeout(self.timeout)?;
        if !self.staging_dir.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "staging_dir must be absolute, got '{}'",
                self.staging_dir.display()
            )));
        }
        if !self.sandbox_dir.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "sandbox_dir must be absolute, got '{}'",
                self.sandbox_dir
            )));
        }
        if self.max_output == Some(0) {
            return Err(ConfigError::Invalid(
                "max_output must be at least 1 byte".to_owned(),
            ));
        }
        if let InstanceStrategy::Pooled { size: 0 } = self.strategy {
            return Err(ConfigError::Invalid(
                "pooled strategy needs a size of at least 1".to_owned(),
            ));
        }

        // Validate all languages have required fields
        for (id, lang) in &self.languages {
            if lang.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty name"
                )));
            }
            if lang.image.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty image"
                )));
            }
            if lang.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty extension"
                )));
            }
            if lang.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "language '{id}' has empty run command"
                )));
            }
        }

        Ok(())
    }
}
