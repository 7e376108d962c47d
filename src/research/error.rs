// Error types for the research coordination engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("Invalid research request: {0}")]
    InvalidRequest(String),

    #[error("Hunter not found: {0}")]
    HunterNotFound(String),

    #[error("Hunter '{hunter}' failed: {message}")]
    HuntFailed { hunter: String, message: String },

    #[error("Failed to access research config: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse research config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl ResearchError {
    /// Short reason string carried by `HunterError` events
    pub fn event_reason(&self) -> String {
        match self {
            ResearchError::HunterNotFound(_) => "not found".to_string(),
            ResearchError::HuntFailed { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
