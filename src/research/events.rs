// Event protocol for research runs
// Every event carries the ID of the run it belongs to so subscribers can
// discard stale events racing in from a superseded run.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use super::run::RunId;
use super::types::Finding;

// Event name constants
pub const EVENT_RUN_STARTED: &str = "research:run_started";
pub const EVENT_HUNTER_STARTED: &str = "research:hunter_started";
pub const EVENT_HUNTER_UPDATE: &str = "research:hunter_update";
pub const EVENT_HUNTER_COMPLETED: &str = "research:hunter_completed";
pub const EVENT_HUNTER_ERROR: &str = "research:hunter_error";
pub const EVENT_RUN_COMPLETED: &str = "research:run_completed";
pub const EVENT_RUN_CANCELLED: &str = "research:run_cancelled";

/// Lifecycle and progress messages emitted by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ResearchEvent {
    RunStarted {
        run_id: RunId,
        project_id: String,
        hunters: Vec<String>,
    },
    HunterStarted {
        run_id: RunId,
        hunter_name: String,
    },
    HunterUpdate {
        run_id: RunId,
        hunter_name: String,
        topic_key: String,
        findings: Vec<Finding>,
    },
    HunterCompleted {
        run_id: RunId,
        hunter_name: String,
        finding_count: usize,
    },
    HunterError {
        run_id: RunId,
        hunter_name: String,
        error: String,
    },
    RunCompleted {
        run_id: RunId,
        total_findings: usize,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },
    RunCancelled {
        run_id: RunId,
        reason: String,
    },
}

impl ResearchEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            ResearchEvent::RunStarted { run_id, .. }
            | ResearchEvent::HunterStarted { run_id, .. }
            | ResearchEvent::HunterUpdate { run_id, .. }
            | ResearchEvent::HunterCompleted { run_id, .. }
            | ResearchEvent::HunterError { run_id, .. }
            | ResearchEvent::RunCompleted { run_id, .. }
            | ResearchEvent::RunCancelled { run_id, .. } => run_id,
        }
    }

    /// Wire name of the event (e.g. "research:run_started")
    pub fn event_name(&self) -> &'static str {
        match self {
            ResearchEvent::RunStarted { .. } => EVENT_RUN_STARTED,
            ResearchEvent::HunterStarted { .. } => EVENT_HUNTER_STARTED,
            ResearchEvent::HunterUpdate { .. } => EVENT_HUNTER_UPDATE,
            ResearchEvent::HunterCompleted { .. } => EVENT_HUNTER_COMPLETED,
            ResearchEvent::HunterError { .. } => EVENT_HUNTER_ERROR,
            ResearchEvent::RunCompleted { .. } => EVENT_RUN_COMPLETED,
            ResearchEvent::RunCancelled { .. } => EVENT_RUN_CANCELLED,
        }
    }

    /// Hunter the event is about, for the per-hunter kinds
    pub fn hunter_name(&self) -> Option<&str> {
        match self {
            ResearchEvent::HunterStarted { hunter_name, .. }
            | ResearchEvent::HunterUpdate { hunter_name, .. }
            | ResearchEvent::HunterCompleted { hunter_name, .. }
            | ResearchEvent::HunterError { hunter_name, .. } => Some(hunter_name),
            _ => None,
        }
    }

    /// RunCompleted or RunCancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchEvent::RunCompleted { .. } | ResearchEvent::RunCancelled { .. }
        )
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

// ============================================================================
// Subscribers
// ============================================================================

/// Destination for research events. Implementations must not block.
///
/// `send` is called with the coordinator lock released, so a sink may query
/// the coordinator (e.g. `is_run_active`) while handling an event.
pub trait EventSink: Send + Sync {
    fn send(&self, event: ResearchEvent);
}

impl EventSink for mpsc::UnboundedSender<ResearchEvent> {
    fn send(&self, event: ResearchEvent) {
        // Receiver dropped: nobody is listening any more
        if mpsc::UnboundedSender::send(self, event).is_err() {
            log::trace!("Research event receiver closed, dropping event");
        }
    }
}

/// Fans events out to any number of consumers (UI, logger, ...) through a
/// bounded broadcast channel. Slow consumers lag and lose the oldest events.
pub struct EventBroadcaster {
    tx: broadcast::Sender<ResearchEvent>,
}

impl EventBroadcaster {
    /// Create a new event broadcaster with a channel capacity of 1000 events
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events (returns a receiver)
    pub fn subscribe(&self) -> broadcast::Receiver<ResearchEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBroadcaster {
    fn send(&self, event: ResearchEvent) {
        // Ignore send errors (no receivers)
        let _ = self.tx.send(event);
    }
}

/// Subscriber-side filter that drops events not belonging to the most
/// recently started run.
#[derive(Debug, Default)]
pub struct StaleEventFilter {
    current: Option<RunId>,
}

impl StaleEventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the event should be processed
    pub fn accept(&mut self, event: &ResearchEvent) -> bool {
        if let ResearchEvent::RunStarted { run_id, .. } = event {
            self.current = Some(run_id.clone());
            return true;
        }
        self.current.as_ref() == Some(event.run_id())
    }

    pub fn current_run(&self) -> Option<&RunId> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(run_id: &RunId) -> ResearchEvent {
        ResearchEvent::RunStarted {
            run_id: run_id.clone(),
            project_id: "p1".to_string(),
            hunters: vec!["web".to_string()],
        }
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = ResearchEvent::HunterCompleted {
            run_id: RunId::from("run-1"),
            hunter_name: "web".to_string(),
            finding_count: 3,
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "hunter_completed");
        assert_eq!(json["runId"], "run-1");
        assert_eq!(json["hunterName"], "web");
        assert_eq!(json["findingCount"], 3);
    }

    #[test]
    fn test_run_completed_duration_in_millis() {
        let event = ResearchEvent::RunCompleted {
            run_id: RunId::from("run-1"),
            total_findings: 2,
            duration: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"duration\":1500"));

        let parsed: ResearchEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_oversized_duration_saturates() {
        let event = ResearchEvent::RunCompleted {
            run_id: RunId::from("run-1"),
            total_findings: 0,
            duration: Duration::MAX,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(&format!("\"duration\":{}", u64::MAX)));
    }

    #[test]
    fn test_accessors() {
        let run_id = RunId::from("run-1");
        let event = ResearchEvent::HunterError {
            run_id: run_id.clone(),
            hunter_name: "web".to_string(),
            error: "not found".to_string(),
        };
        assert_eq!(event.run_id(), &run_id);
        assert_eq!(event.hunter_name(), Some("web"));
        assert_eq!(event.event_name(), EVENT_HUNTER_ERROR);
        assert!(!event.is_terminal());

        let cancelled = ResearchEvent::RunCancelled {
            run_id,
            reason: "abort".to_string(),
        };
        assert!(cancelled.is_terminal());
        assert_eq!(cancelled.hunter_name(), None);
    }

    #[test]
    fn test_stale_event_filter() {
        let old_run = RunId::from("run-old");
        let new_run = RunId::from("run-new");
        let mut filter = StaleEventFilter::new();

        let orphan = ResearchEvent::HunterStarted {
            run_id: old_run.clone(),
            hunter_name: "web".to_string(),
        };
        assert!(!filter.accept(&orphan));

        assert!(filter.accept(&started(&old_run)));
        assert!(filter.accept(&orphan));

        assert!(filter.accept(&started(&new_run)));
        assert!(!filter.accept(&orphan));
        assert_eq!(filter.current_run(), Some(&new_run));
    }

    #[tokio::test]
    async fn test_unbounded_sender_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink: &dyn EventSink = &tx;
        sink.send(started(&RunId::from("run-1")));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_name(), EVENT_RUN_STARTED);

        drop(rx);
        // Sending after the receiver is gone is silently ignored
        sink.send(started(&RunId::from("run-2")));
    }

    #[tokio::test]
    async fn test_event_broadcaster_fans_out() {
        let broadcaster = EventBroadcaster::new();
        let mut ui = broadcaster.subscribe();
        let mut logger = broadcaster.subscribe();
        assert_eq!(broadcaster.receiver_count(), 2);

        broadcaster.send(started(&RunId::from("run-1")));

        assert_eq!(ui.recv().await.unwrap().run_id().as_str(), "run-1");
        assert_eq!(logger.recv().await.unwrap().run_id().as_str(), "run-1");
    }

    #[test]
    fn test_event_broadcaster_without_receivers() {
        let broadcaster = EventBroadcaster::default();
        broadcaster.send(started(&RunId::from("run-1")));
        assert_eq!(broadcaster.receiver_count(), 0);
    }
}
