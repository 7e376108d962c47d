//! Configuration file handling for research runs
//!
//! Reads and writes .ralph-ui/research.yaml for project-specific settings.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ResearchError;
use super::hunter::HuntMode;
use crate::utils::ralph_ui_dir;

/// Tunables for how the coordinator drives hunters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoordinatorConfig {
    /// Result cap passed to every hunter
    pub max_results: usize,
    /// Search strategy passed to every hunter
    pub mode: HuntMode,
    /// Relevance assigned to synthesized summary findings
    pub default_relevance: f64,
    /// Topic used when the caller supplied no topic queries
    pub default_topic: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_results: 10,
            mode: HuntMode::Balanced,
            default_relevance: 0.5,
            default_topic: "general".to_string(),
        }
    }
}

/// Research config file manager
pub struct ResearchConfigManager {
    config_path: PathBuf,
}

impl ResearchConfigManager {
    /// Create a new config manager for a project
    pub fn new(project_path: &Path) -> Self {
        Self {
            config_path: ralph_ui_dir(project_path).join("research.yaml"),
        }
    }

    /// Check if config file exists
    pub fn exists(&self) -> bool {
        self.config_path.exists()
    }

    /// Read config from file, returning defaults if not found
    pub fn read(&self) -> Result<CoordinatorConfig, ResearchError> {
        if !self.config_path.exists() {
            return Ok(CoordinatorConfig::default());
        }

        let content = std::fs::read_to_string(&self.config_path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Write config to file
    pub fn write(&self, config: &CoordinatorConfig) -> Result<(), ResearchError> {
        // Ensure parent directory exists
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(config)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Initialize config with defaults if it doesn't exist
    pub fn initialize(&self) -> Result<CoordinatorConfig, ResearchError> {
        if self.exists() {
            return self.read();
        }

        let config = CoordinatorConfig::default();
        self.write(&config)?;
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}
