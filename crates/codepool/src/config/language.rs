use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholder in a run command replaced by the staged script path
pub const SOURCE_PLACEHOLDER: &str = "{source}";

/// Configuration for a programming language
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Language {
    /// Human-readable name for the language (e.g., "Python 3")
    pub name: String,

    /// Image reference the sandbox instance is created from
    pub image: String,

    /// Run command and arguments
    ///
    /// `{source}` is replaced by the in-sandbox path of the staged script.
    /// When no argument carries the placeholder, the path is appended.
    pub command: Vec<String>,

    /// File extension given to the staged script
    pub extension: FileExtension,

    /// Environment variables set on the sandbox instance
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Resource limits for this language's instances (overrides defaults)
    #[serde(default)]
    pub limits: Option<ResourceLimits>,
}

impl Language {
    /// Staged script file name for an execution with the given unique id
    pub fn script_name(&self, run_id: &str) -> String {
        format!("{run_id}.{}", self.extension)
    }

    /// Expand the run command for a staged script path
    pub fn expand_command(command: &[String], source: &str) -> Vec<String> {
        let has_placeholder = command.iter().any(|arg| arg.contains(SOURCE_PLACEHOLDER));
        let mut expanded: Vec<String> = command
            .iter()
            .map(|arg| arg.replace(SOURCE_PLACEHOLDER, source))
            .collect();
        if !has_placeholder {
            expanded.push(source.to_owned());
        }
        expanded
    }

    /// Effective limits for this language given the configured defaults
    pub fn effective_limits(&self, defaults: &ResourceLimits) -> ResourceLimits {
        match self.limits {
            Some(ref limits) => defaults.with_overrides(limits),
            None => defaults.clone(),
        }
    }
}

/// File extension without dot (e.g., "py")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
