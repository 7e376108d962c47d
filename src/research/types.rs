// Data model for research runs: findings, hunter statuses and update batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::RunId;

// ============================================================================
// Findings
// ============================================================================

/// One piece of gathered information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Stable identifier
    pub id: String,
    pub title: String,
    pub summary: String,
    /// Where the finding came from (hunter name, URL, ...)
    pub source: String,
    /// Kind of source (e.g. "hunter", "web", "api")
    pub source_type: String,
    /// Relevance score in [0, 1]
    pub relevance: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub collected_at: DateTime<Utc>,
}

impl Finding {
    /// Create a finding, clamping relevance into [0, 1]
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        summary: impl Into<String>,
        source: impl Into<String>,
        source_type: impl Into<String>,
        relevance: f64,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            summary: summary.into(),
            source: source.into(),
            source_type: source_type.into(),
            relevance: clamp_relevance(relevance),
            tags: Vec::new(),
            collected_at: Utc::now(),
        }
    }

    /// Attach tags to the finding
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

fn clamp_relevance(relevance: f64) -> f64 {
    if relevance.is_nan() {
        0.0
    } else {
        relevance.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Hunter Status
// ============================================================================

/// Lifecycle state of a hunter within a run.
///
/// Moves monotonically Pending -> Running -> {Complete | Error}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HunterState {
    Pending,
    Running,
    Complete,
    Error,
}

impl HunterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HunterState::Pending => "pending",
            HunterState::Running => "running",
            HunterState::Complete => "complete",
            HunterState::Error => "error",
        }
    }

    /// Complete and Error never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, HunterState::Complete | HunterState::Error)
    }

    /// Pending or Running
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for HunterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Default for HunterState {
    fn default() -> Self {
        HunterState::Pending
    }
}

/// Status of one hunter within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HunterStatus {
    pub name: String,
    pub status: HunterState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Finding count reported on completion
    pub findings: usize,
    /// Error message, only set in the Error state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HunterStatus {
    /// Create a pending status for a newly registered hunter
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: HunterState::Pending,
            started_at: None,
            finished_at: None,
            findings: 0,
            error: None,
        }
    }
}

// ============================================================================
// Updates
// ============================================================================

/// A batch of findings from one hunter, scoped to one topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Update {
    pub run_id: RunId,
    pub hunter_name: String,
    pub topic_key: String,
    pub findings: Vec<Finding>,
    /// Assigned by the run when the update is appended
    pub timestamp: DateTime<Utc>,
}

impl Update {
    /// Build an update; the timestamp is overwritten by the run on append
    pub fn new(
        run_id: RunId,
        hunter_name: impl Into<String>,
        topic_key: impl Into<String>,
        findings: Vec<Finding>,
    ) -> Self {
        Self {
            run_id,
            hunter_name: hunter_name.into(),
            topic_key: topic_key.into(),
            findings,
            timestamp: Utc::now(),
        }
    }
}
