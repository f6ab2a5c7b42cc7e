//! Language registry
//!
//! Read-only lookup from language ID to its definition, built once from
//! configuration and shared by the sandbox pool and the execution engine.

use std::collections::HashMap;

use crate::config::{Config, Language};

/// Immutable map of supported languages
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: HashMap<String, Language>,
}

impl LanguageRegistry {
    pub fn new(languages: HashMap<String, Language>) -> Self {
        Self { languages }
    }

    /// Build a registry from the languages in a configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.languages.clone())
    }

    /// Look up the definition for a language ID
    pub fn definition_for(&self, id: &str) -> Option<&Language> {
        self.languages.get(id)
    }

    /// Check whether a language ID is registered
    pub fn contains(&self, id: &str) -> bool {
        self.languages.contains_key(id)
    }

    /// Registered language IDs in sorted order
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.languages.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over registered languages
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Language)> {
        self.languages.iter().map(|(id, lang)| (id.as_str(), lang))
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}

impl From<&Config> for LanguageRegistry {
    fn from(config: &Config) -> Self {
        Self::from_config(config)
    }
}
