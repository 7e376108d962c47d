//! Run identity and state
//!
//! A [`Run`] is the record of one coordinated execution: a unique ID, the
//! per-hunter status table, the append-only log of topic-scoped updates and a
//! cancellation token. All mutable state sits behind one reader/writer lock;
//! the token is independently thread-safe. Runs are shared as `Arc<Run>` so
//! tasks of a superseded run can finish writing into it after the
//! coordinator has let go.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::types::{HunterState, HunterStatus, Update};
use crate::utils::{read_lock_recover, write_lock_recover};

/// Opaque unique run identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(format!("run-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Default)]
struct RunState {
    hunters: HashMap<String, HunterStatus>,
    /// Registration order, for stable snapshots
    hunter_order: Vec<String>,
    updates: Vec<Update>,
    done_at: Option<DateTime<Utc>>,
}

/// One coordinated execution across a set of hunters
pub struct Run {
    id: RunId,
    project_id: String,
    started_at: DateTime<Utc>,
    cancel_token: CancellationToken,
    state: RwLock<RunState>,
}

impl Run {
    /// Create a run whose cancellation token is a child of `parent`
    pub fn new(parent: &CancellationToken, project_id: impl Into<String>) -> Self {
        Self {
            id: RunId::new(),
            project_id: project_id.into(),
            started_at: Utc::now(),
            cancel_token: parent.child_token(),
            state: RwLock::new(RunState::default()),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn done_at(&self) -> Option<DateTime<Utc>> {
        read_lock_recover(&self.state).done_at
    }

    /// Token handed to hunters; cancelled when the run is cancelled or superseded
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    // ------------------------------------------------------------------------
    // Hunter transitions
    // ------------------------------------------------------------------------

    /// Register a hunter as Pending. Registering twice keeps the existing entry.
    pub fn register_hunter(&self, name: &str) {
        let mut state = write_lock_recover(&self.state);
        if state.hunters.contains_key(name) {
            return;
        }
        state
            .hunters
            .insert(name.to_string(), HunterStatus::pending(name));
        state.hunter_order.push(name.to_string());
    }

    /// Pending -> Running. No-op for unknown hunters or any other state.
    pub fn start_hunter(&self, name: &str) {
        let mut state = write_lock_recover(&self.state);
        if let Some(status) = state.hunters.get_mut(name) {
            if status.status == HunterState::Pending {
                status.status = HunterState::Running;
                status.started_at = Some(Utc::now());
            }
        }
    }

    /// Terminal transition to Complete with the hunter's reported finding count
    pub fn complete_hunter(&self, name: &str, findings: usize) {
        let mut state = write_lock_recover(&self.state);
        if let Some(status) = state.hunters.get_mut(name) {
            if status.status.is_terminal() {
                return;
            }
            status.status = HunterState::Complete;
            status.findings = findings;
            status.finished_at = Some(Utc::now());
        }
    }

    /// Terminal transition to Error
    pub fn error_hunter(&self, name: &str, error: impl std::fmt::Display) {
        let mut state = write_lock_recover(&self.state);
        if let Some(status) = state.hunters.get_mut(name) {
            if status.status.is_terminal() {
                return;
            }
            status.status = HunterState::Error;
            status.error = Some(error.to_string());
            status.finished_at = Some(Utc::now());
        }
    }

    // ------------------------------------------------------------------------
    // Updates
    // ------------------------------------------------------------------------

    /// Append an update belonging to this run. Updates carrying another run's
    /// ID are dropped.
    pub fn add_update(&self, mut update: Update) {
        if update.run_id != self.id {
            log::warn!(
                "Dropping stale update from hunter '{}' (run {} != {})",
                update.hunter_name,
                update.run_id,
                self.id
            );
            return;
        }
        update.timestamp = Utc::now();
        write_lock_recover(&self.state).updates.push(update);
    }

    /// Updates for a topic, in insertion order
    pub fn updates_for_topic(&self, topic_key: &str) -> Vec<Update> {
        read_lock_recover(&self.state)
            .updates
            .iter()
            .filter(|u| u.topic_key == topic_key)
            .cloned()
            .collect()
    }

    /// All updates, in insertion order
    pub fn updates(&self) -> Vec<Update> {
        read_lock_recover(&self.state).updates.clone()
    }

    pub fn update_count(&self) -> usize {
        read_lock_recover(&self.state).updates.len()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of every hunter's status, in registration order
    pub fn hunter_statuses(&self) -> Vec<HunterStatus> {
        let state = read_lock_recover(&self.state);
        state
            .hunter_order
            .iter()
            .filter_map(|name| state.hunters.get(name).cloned())
            .collect()
    }

    pub fn hunter_status(&self, name: &str) -> Option<HunterStatus> {
        read_lock_recover(&self.state).hunters.get(name).cloned()
    }

    pub fn running_count(&self) -> usize {
        read_lock_recover(&self.state)
            .hunters
            .values()
            .filter(|s| s.status == HunterState::Running)
            .count()
    }

    /// True once at least one hunter is registered and all of them are terminal
    pub fn is_complete(&self) -> bool {
        let state = read_lock_recover(&self.state);
        !state.hunters.is_empty() && !state.hunters.values().any(|s| s.status.is_active())
    }

    /// Sum of the finding counts hunters reported on completion
    pub fn total_findings(&self) -> usize {
        read_lock_recover(&self.state)
            .hunters
            .values()
            .map(|s| s.findings)
            .sum()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Record the end time. Later calls keep the first end time.
    pub fn mark_done(&self) {
        let mut state = write_lock_recover(&self.state);
        if state.done_at.is_none() {
            state.done_at = Some(Utc::now());
        }
    }

    pub fn is_done(&self) -> bool {
        read_lock_recover(&self.state).done_at.is_some()
    }

    /// Elapsed time until `mark_done`, or until now while still running
    pub fn duration(&self) -> Duration {
        let end = self.done_at().unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Serializable snapshot of the run
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.id.clone(),
            project_id: self.project_id.clone(),
            started_at: self.started_at,
            done_at: self.done_at(),
            duration_ms: u64::try_from(self.duration().as_millis()).unwrap_or(u64::MAX),
            hunters: self.hunter_statuses(),
            update_count: self.update_count(),
            total_findings: self.total_findings(),
            complete: self.is_complete(),
            cancelled: self.is_cancelled(),
        }
    }
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("id", &self.id)
            .field("project_id", &self.project_id)
            .field("started_at", &self.started_at)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Point-in-time view of a run for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: RunId,
    pub project_id: String,
    pub started_at: DateTime<Utc>,
    pub done_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    pub hunters: Vec<HunterStatus>,
    pub update_count: usize,
    pub total_findings: usize,
    pub complete: bool,
    pub cancelled: bool,
}
