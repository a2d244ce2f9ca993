// Language configuration management for the execution engine
use anyhow::{Context, Result};
use arena_common::config::{LanguageConfig, LanguagesFile};
use arena_common::types::Language;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from a languages.json file
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let file: LanguagesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Self::from_file(file)
    }

    /// Load from `config_path` if it exists, otherwise use the built-in gcc/g++ setup
    pub fn load_or_builtin(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            info!("Loading language configuration from {}", config_path.display());
            Self::load(config_path)
        } else {
            warn!("{} not found, using built-in C/C++ configuration", config_path.display());
            Ok(Self::builtin())
        }
    }

    pub fn builtin() -> Self {
        let configs = Language::all()
            .into_iter()
            .map(|lang| (lang, LanguageConfig::builtin(lang)))
            .collect();
        Self { configs }
    }

    fn from_file(file: LanguagesFile) -> Result<Self> {
        let mut configs = HashMap::new();
        for lang in file.languages {
            let language = Language::from_str(&lang.name)
                .with_context(|| format!("Unknown language '{}' in language configuration", lang.name))?;
            configs.insert(language, lang);
        }

        // Anything the file leaves out keeps its built-in setup
        for language in Language::all() {
            configs
                .entry(language)
                .or_insert_with(|| LanguageConfig::builtin(language));
        }

        Ok(Self { configs })
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageConfig> {
        self.configs
            .get(language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<String> {
        self.configs.values().map(|c| c.name.clone()).collect()
    }
}
