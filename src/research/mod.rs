//! Research run coordination
//!
//! A [`Coordinator`] owns at most one active [`Run`] at a time. Starting a run
//! fans the work out to one tokio task per named [`Hunter`], aggregates their
//! topic-scoped findings into the run, and reports progress as
//! [`ResearchEvent`]s to a single registered subscriber.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod hunter;
pub mod run;
pub mod topics;
pub mod types;

pub use config::{CoordinatorConfig, ResearchConfigManager};
pub use coordinator::{Coordinator, REASON_NEW_RUN_STARTED};
pub use error::ResearchError;
pub use events::{EventBroadcaster, EventSink, ResearchEvent, StaleEventFilter};
pub use hunter::{HuntMode, HuntRequest, HuntResult, Hunter, HunterRegistry};
pub use run::{Run, RunId, RunSummary};
pub use topics::TopicConfig;
pub use types::{Finding, HunterState, HunterStatus, Update};

// Cancellation handles are part of the public contract of `start_run` and `Hunter::hunt`
pub use tokio_util::sync::CancellationToken;
