//! Research run coordinator
//!
//! Owns at most one current [`Run`]. Starting a run supersedes the previous
//! one, registers the requested hunters, and spawns a dispatch task that runs
//! one tokio task per hunter and joins them before marking the run done.
//!
//! Events are queued while holding the coordinator lock, so their order
//! matches the order of state changes: a superseded run's `RunCancelled` is
//! always queued before its replacement's `RunStarted`, and events from a run
//! that is no longer current are never queued. The queue is drained by one
//! caller at a time with the lock released, so a subscriber may call back
//! into the coordinator from `send`.

use futures_util::future::join_all;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::CoordinatorConfig;
use super::error::ResearchError;
use super::events::{EventSink, ResearchEvent};
use super::hunter::{HuntRequest, HunterRegistry};
use super::run::{Run, RunId, RunSummary};
use super::topics::{synthesize_findings, QueryPlan, TopicConfig};
use super::types::{HunterStatus, Update};
use crate::utils::lock_mutex_recover;

/// Reason attached to `RunCancelled` when a run is superseded
pub const REASON_NEW_RUN_STARTED: &str = "new run started";
/// Reason attached to `RunCancelled` when the caller's parent token fired
pub const REASON_PARENT_CANCELLED: &str = "parent cancelled";

#[derive(Default)]
struct CoordinatorState {
    /// Current run. Stays set after the run finishes so its results remain
    /// queryable until superseded or cancelled.
    active_run: Option<Arc<Run>>,
    subscriber: Option<Arc<dyn EventSink>>,
    /// Events awaiting delivery, paired with the subscriber at queue time
    outbox: VecDeque<(Arc<dyn EventSink>, ResearchEvent)>,
    /// Set while some caller is draining `outbox`
    draining: bool,
}

impl CoordinatorState {
    fn is_current(&self, run_id: &RunId) -> bool {
        self.active_run
            .as_ref()
            .map_or(false, |run| run.id() == run_id)
    }

    fn enqueue(&mut self, event: ResearchEvent) {
        match &self.subscriber {
            Some(subscriber) => self.outbox.push_back((subscriber.clone(), event)),
            None => log::trace!("No research subscriber, dropping {}", event.event_name()),
        }
    }

    /// Cancel and forget the current run, finished or not
    fn cancel_current(&mut self, reason: &str) -> Option<Arc<Run>> {
        let run = self.active_run.take()?;
        run.cancel();
        log::info!("Cancelled research run {}: {}", run.id(), reason);
        self.enqueue(ResearchEvent::RunCancelled {
            run_id: run.id().clone(),
            reason: reason.to_string(),
        });
        Some(run)
    }
}

/// Clears the draining flag if a subscriber panics mid-delivery
struct DrainGuard<'a>(&'a Mutex<CoordinatorState>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock_mutex_recover(self.0).draining = false;
        }
    }
}

struct Inner {
    registry: Arc<HunterRegistry>,
    config: CoordinatorConfig,
    state: Mutex<CoordinatorState>,
}

impl Inner {
    /// Hand queued events to their subscriber with the lock released.
    ///
    /// Only one caller drains at a time; a caller that finds a drain in
    /// progress (including a subscriber re-entering from `send`) leaves its
    /// events for the active drainer, which keeps delivery in queue order.
    fn flush_events(&self) {
        {
            let mut state = lock_mutex_recover(&self.state);
            if state.draining || state.outbox.is_empty() {
                return;
            }
            state.draining = true;
        }
        let _guard = DrainGuard(&self.state);

        loop {
            let (subscriber, event) = {
                let mut state = lock_mutex_recover(&self.state);
                match state.outbox.pop_front() {
                    Some(next) => next,
                    None => {
                        // Cleared under the same lock as the empty check so a
                        // concurrent enqueue is never stranded
                        state.draining = false;
                        return;
                    }
                }
            };
            subscriber.send(event);
        }
    }

    /// Deliver an event for `run` if it is still the current run
    fn emit_for(&self, run: &Run, event: ResearchEvent) {
        {
            let mut state = lock_mutex_recover(&self.state);
            if !state.is_current(run.id()) {
                log::trace!(
                    "Dropping {} from superseded run {}",
                    event.event_name(),
                    run.id()
                );
                return;
            }
            state.enqueue(event);
        }
        self.flush_events();
    }

    async fn run_hunter(&self, run: &Run, name: &str, plan: &QueryPlan) {
        let Some(hunter) = self.registry.get(name) else {
            let err = ResearchError::HunterNotFound(name.to_string());
            log::warn!("Run {}: {}", run.id(), err);
            run.error_hunter(name, err.event_reason());
            self.emit_for(
                run,
                ResearchEvent::HunterError {
                    run_id: run.id().clone(),
                    hunter_name: name.to_string(),
                    error: err.event_reason(),
                },
            );
            return;
        };

        run.start_hunter(name);
        log::debug!("Run {}: hunter '{}' started", run.id(), name);
        self.emit_for(
            run,
            ResearchEvent::HunterStarted {
                run_id: run.id().clone(),
                hunter_name: name.to_string(),
            },
        );

        let request = HuntRequest {
            queries: plan.queries.clone(),
            max_results: self.config.max_results,
            mode: self.config.mode,
        };

        let result = match hunter.hunt(run.cancellation_token(), request).await {
            Ok(result) => result,
            Err(e) => {
                let err = ResearchError::HuntFailed {
                    hunter: name.to_string(),
                    message: e.to_string(),
                };
                log::warn!("Run {}: {}", run.id(), err);
                run.error_hunter(name, err.event_reason());
                self.emit_for(
                    run,
                    ResearchEvent::HunterError {
                        run_id: run.id().clone(),
                        hunter_name: name.to_string(),
                        error: err.event_reason(),
                    },
                );
                return;
            }
        };

        let groups = synthesize_findings(
            run.id(),
            name,
            &result,
            plan,
            &self.config.default_topic,
            self.config.default_relevance,
        );
        for group in groups {
            run.add_update(Update::new(
                run.id().clone(),
                name,
                group.topic_key.clone(),
                group.findings.clone(),
            ));
            self.emit_for(
                run,
                ResearchEvent::HunterUpdate {
                    run_id: run.id().clone(),
                    hunter_name: name.to_string(),
                    topic_key: group.topic_key,
                    findings: group.findings,
                },
            );
        }

        run.complete_hunter(name, result.sources_collected);
        log::debug!(
            "Run {}: hunter '{}' completed with {} findings",
            run.id(),
            name,
            result.sources_collected
        );
        self.emit_for(
            run,
            ResearchEvent::HunterCompleted {
                run_id: run.id().clone(),
                hunter_name: name.to_string(),
                finding_count: result.sources_collected,
            },
        );
    }

    /// Mark the run done and report its terminal event if it is still current
    fn finish_run(&self, run: &Run) {
        {
            let mut state = lock_mutex_recover(&self.state);
            run.mark_done();

            if !state.is_current(run.id()) {
                log::debug!("Superseded run {} finished", run.id());
                return;
            }

            if run.is_cancelled() {
                state.cancel_current(REASON_PARENT_CANCELLED);
            } else {
                log::info!(
                    "Research run {} completed: {} findings in {:?}",
                    run.id(),
                    run.total_findings(),
                    run.duration()
                );
                state.enqueue(ResearchEvent::RunCompleted {
                    run_id: run.id().clone(),
                    total_findings: run.total_findings(),
                    duration: run.duration(),
                });
            }
        }
        self.flush_events();
    }
}

/// Coordinates research runs across registered hunters
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator with default settings
    pub fn new(registry: Arc<HunterRegistry>) -> Self {
        Self::with_config(registry, CoordinatorConfig::default())
    }

    pub fn with_config(registry: Arc<HunterRegistry>, config: CoordinatorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                config,
                state: Mutex::new(CoordinatorState::default()),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<HunterRegistry> {
        &self.inner.registry
    }

    // ------------------------------------------------------------------------
    // Subscriber
    // ------------------------------------------------------------------------

    /// Attach the event subscriber, replacing any previous one
    pub fn set_subscriber(&self, subscriber: Arc<dyn EventSink>) {
        lock_mutex_recover(&self.inner.state).subscriber = Some(subscriber);
    }

    /// Attach a fresh channel as the subscriber and return its receiver
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ResearchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.set_subscriber(Arc::new(tx));
        rx
    }

    pub fn clear_subscriber(&self) {
        lock_mutex_recover(&self.inner.state).subscriber = None;
    }

    pub fn has_subscriber(&self) -> bool {
        lock_mutex_recover(&self.inner.state).subscriber.is_some()
    }

    // ------------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------------

    /// Start a run, superseding the current one.
    ///
    /// Returns as soon as the run is registered and `RunStarted` has been
    /// emitted; hunters execute in the background. Must be called from within
    /// a tokio runtime.
    pub fn start_run(
        &self,
        parent: &CancellationToken,
        project_id: &str,
        hunter_names: Vec<String>,
        topics: Vec<TopicConfig>,
    ) -> Result<Arc<Run>, ResearchError> {
        if project_id.trim().is_empty() {
            return Err(ResearchError::InvalidRequest(
                "project id must not be empty".to_string(),
            ));
        }

        let mut hunters: Vec<String> = Vec::with_capacity(hunter_names.len());
        for name in hunter_names {
            if !hunters.contains(&name) {
                hunters.push(name);
            }
        }

        let run = {
            let mut state = lock_mutex_recover(&self.inner.state);
            state.cancel_current(REASON_NEW_RUN_STARTED);

            let run = Arc::new(Run::new(parent, project_id));
            for name in &hunters {
                run.register_hunter(name);
            }
            state.active_run = Some(run.clone());

            log::info!(
                "Started research run {} for project '{}' with {} hunters",
                run.id(),
                project_id,
                hunters.len()
            );
            state.enqueue(ResearchEvent::RunStarted {
                run_id: run.id().clone(),
                project_id: project_id.to_string(),
                hunters: hunters.clone(),
            });
            run
        };
        self.inner.flush_events();

        self.spawn_dispatch(run.clone(), hunters, topics);
        Ok(run)
    }

    fn spawn_dispatch(&self, run: Arc<Run>, hunters: Vec<String>, topics: Vec<TopicConfig>) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            let plan = Arc::new(QueryPlan::from_topics(&topics));

            let tasks = hunters.into_iter().map(|name| {
                let inner = inner.clone();
                let run = run.clone();
                let plan = plan.clone();
                let handle = tokio::spawn({
                    let name = name.clone();
                    async move { inner.run_hunter(&run, &name, &plan).await }
                });
                async move { (name, handle.await) }
            });

            for (name, joined) in join_all(tasks).await {
                if let Err(e) = joined {
                    log::error!("Run {}: hunter '{}' task failed: {}", run.id(), name, e);
                    run.error_hunter(&name, format!("hunter task failed: {}", e));
                    inner.emit_for(
                        &run,
                        ResearchEvent::HunterError {
                            run_id: run.id().clone(),
                            hunter_name: name,
                            error: "hunter task failed".to_string(),
                        },
                    );
                }
            }

            inner.finish_run(&run);
        });
    }

    /// Cancel the current run. Does nothing when there is none.
    pub fn cancel_active_run(&self, reason: &str) {
        let cancelled = lock_mutex_recover(&self.inner.state).cancel_current(reason);
        if cancelled.is_none() {
            log::debug!("No active research run to cancel");
            return;
        }
        self.inner.flush_events();
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn active_run(&self) -> Option<Arc<Run>> {
        lock_mutex_recover(&self.inner.state).active_run.clone()
    }

    /// True only if `run_id` is the current run's ID
    pub fn is_run_active(&self, run_id: &RunId) -> bool {
        lock_mutex_recover(&self.inner.state).is_current(run_id)
    }

    pub fn updates_for_topic(&self, topic_key: &str) -> Vec<Update> {
        self.active_run()
            .map(|run| run.updates_for_topic(topic_key))
            .unwrap_or_default()
    }

    pub fn hunter_statuses(&self) -> Vec<HunterStatus> {
        self.active_run()
            .map(|run| run.hunter_statuses())
            .unwrap_or_default()
    }

    pub fn running_hunter_count(&self) -> usize {
        self.active_run().map_or(0, |run| run.running_count())
    }

    pub fn total_findings(&self) -> usize {
        self.active_run().map_or(0, |run| run.total_findings())
    }

    pub fn active_summary(&self) -> Option<RunSummary> {
        self.active_run().map(|run| run.summary())
    }

    /// True when there is no current run or the current run has finished
    pub fn is_idle(&self) -> bool {
        self.active_run().map_or(true, |run| run.is_done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::hunter::{HuntResult, Hunter};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::time::Duration;

    struct CountingHunter {
        name: String,
        sources: usize,
    }

    #[async_trait]
    impl Hunter for CountingHunter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn hunt(&self, _cancel: CancellationToken, _request: HuntRequest) -> Result<HuntResult> {
            Ok(HuntResult {
                sources_collected: self.sources,
                insights_created: 1,
            })
        }
    }

    struct FailingHunter;

    #[async_trait]
    impl Hunter for FailingHunter {
        fn name(&self) -> &str {
            "failing"
        }

        async fn hunt(&self, _cancel: CancellationToken, _request: HuntRequest) -> Result<HuntResult> {
            Err(anyhow!("upstream returned 503"))
        }
    }

    fn coordinator() -> Coordinator {
        let registry = HunterRegistry::new();
        registry.register(Box::new(CountingHunter {
            name: "web".to_string(),
            sources: 4,
        }));
        registry.register(Box::new(FailingHunter));
        Coordinator::new(Arc::new(registry))
    }

    async fn wait_idle(coordinator: &Coordinator) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !coordinator.is_idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run did not finish");
    }

    #[tokio::test]
    async fn test_empty_project_id_rejected() {
        let coordinator = coordinator();
        let result = coordinator.start_run(
            &CancellationToken::new(),
            "  ",
            vec!["web".to_string()],
            vec![],
        );
        assert!(matches!(result, Err(ResearchError::InvalidRequest(_))));
        assert!(coordinator.active_run().is_none());
    }

    #[tokio::test]
    async fn test_accessors_without_run() {
        let coordinator = coordinator();
        assert!(coordinator.active_run().is_none());
        assert!(!coordinator.is_run_active(&RunId::from("run-x")));
        assert!(coordinator.updates_for_topic("vision").is_empty());
        assert!(coordinator.hunter_statuses().is_empty());
        assert_eq!(coordinator.running_hunter_count(), 0);
        assert_eq!(coordinator.total_findings(), 0);
        assert!(coordinator.active_summary().is_none());
        assert!(coordinator.is_idle());
    }

    #[tokio::test]
    async fn test_duplicate_hunter_names_run_once() {
        let coordinator = coordinator();
        let mut rx = coordinator.subscribe();
        let run = coordinator
            .start_run(
                &CancellationToken::new(),
                "p1",
                vec!["web".to_string(), "web".to_string()],
                vec![],
            )
            .unwrap();
        wait_idle(&coordinator).await;

        assert_eq!(run.hunter_statuses().len(), 1);
        assert_eq!(run.total_findings(), 4);

        match rx.recv().await.unwrap() {
            ResearchEvent::RunStarted { hunters, .. } => assert_eq!(hunters, vec!["web"]),
            other => panic!("unexpected first event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let coordinator = coordinator();
        let run = coordinator
            .start_run(
                &CancellationToken::new(),
                "p1",
                vec!["web".to_string(), "failing".to_string(), "missing".to_string()],
                vec![TopicConfig::new("vision", vec!["market".to_string()])],
            )
            .unwrap();
        wait_idle(&coordinator).await;

        assert!(run.is_complete());
        assert_eq!(run.total_findings(), 4);

        let failing = run.hunter_status("failing").unwrap();
        assert_eq!(failing.error.as_deref(), Some("upstream returned 503"));
        assert!(failing.started_at.is_some());

        let missing = run.hunter_status("missing").unwrap();
        assert_eq!(missing.error.as_deref(), Some("not found"));
        assert!(missing.started_at.is_none());

        assert_eq!(coordinator.updates_for_topic("vision").len(), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation_reports_run_cancelled() {
        let coordinator = coordinator();
        let mut rx = coordinator.subscribe();
        let parent = CancellationToken::new();
        parent.cancel();

        let run = coordinator
            .start_run(&parent, "p1", vec!["web".to_string()], vec![])
            .unwrap();
        assert!(run.is_cancelled());

        let mut last = None;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            let terminal = event.is_terminal();
            last = Some(event);
            if terminal {
                break;
            }
        }

        match last {
            Some(ResearchEvent::RunCancelled { reason, .. }) => {
                assert_eq!(reason, REASON_PARENT_CANCELLED)
            }
            other => panic!("expected RunCancelled, got {:?}", other),
        }
        assert!(!coordinator.is_run_active(run.id()));
    }

    #[tokio::test]
    async fn test_subscriber_management() {
        let coordinator = coordinator();
        assert!(!coordinator.has_subscriber());

        let _rx = coordinator.subscribe();
        assert!(coordinator.has_subscriber());

        coordinator.clear_subscriber();
        assert!(!coordinator.has_subscriber());
    }
}
