// Hunter plugin interface and registry

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::utils::{read_lock_recover, write_lock_recover};

/// Search strategy requested from a hunter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HuntMode {
    Fast,
    Balanced,
    Thorough,
}

impl HuntMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HuntMode::Fast => "fast",
            HuntMode::Balanced => "balanced",
            HuntMode::Thorough => "thorough",
        }
    }
}

impl std::fmt::Display for HuntMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for HuntMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(HuntMode::Fast),
            "balanced" => Ok(HuntMode::Balanced),
            "thorough" => Ok(HuntMode::Thorough),
            _ => Err(format!(
                "Invalid hunt mode: '{}'. Expected 'fast', 'balanced', or 'thorough'",
                s
            )),
        }
    }
}

impl Default for HuntMode {
    fn default() -> Self {
        HuntMode::Balanced
    }
}

/// Work handed to a hunter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntRequest {
    pub queries: Vec<String>,
    pub max_results: usize,
    pub mode: HuntMode,
}

/// Aggregate counts reported by a hunter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HuntResult {
    pub sources_collected: usize,
    pub insights_created: usize,
}

/// A pluggable unit of research work.
///
/// Implementations must stop promptly once `cancel` fires and must not
/// assume shared state with other hunters running concurrently.
#[async_trait]
pub trait Hunter: Send + Sync {
    /// Name the hunter is registered under
    fn name(&self) -> &str;

    async fn hunt(&self, cancel: CancellationToken, request: HuntRequest) -> Result<HuntResult>;
}

/// Registry resolving hunters by name
pub struct HunterRegistry {
    hunters: RwLock<HashMap<String, Arc<dyn Hunter>>>,
}

impl HunterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            hunters: RwLock::new(HashMap::new()),
        }
    }

    /// Register a hunter under its own name, replacing any previous one
    pub fn register(&self, hunter: Box<dyn Hunter>) {
        let hunter: Arc<dyn Hunter> = Arc::from(hunter);
        let name = hunter.name().to_string();
        if write_lock_recover(&self.hunters)
            .insert(name.clone(), hunter)
            .is_some()
        {
            log::debug!("Replaced hunter '{}' in registry", name);
        }
    }

    /// Get a hunter by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Hunter>> {
        read_lock_recover(&self.hunters).get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<dyn Hunter>> {
        write_lock_recover(&self.hunters).remove(name)
    }

    /// Registered hunter names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock_recover(&self.hunters).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read_lock_recover(&self.hunters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HunterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
