//! Lifecycle automation engine
//!
//! Events are matched against workflows (local first, then cascaded from an MSP parent),
//! each matched workflow's actions run in order, and every execution is recorded as a run.

pub mod actions;
pub mod capabilities;
pub mod cascade;
pub mod events;
pub mod executor;
pub mod filters;
pub mod matcher;
pub mod postgres;
pub mod processor;
pub mod recorder;
pub mod store;
pub mod triggers;
pub mod workflow;

pub use capabilities::{Capabilities, Feature};
pub use events::{EventSource, EventState, EventType, LifecycleEvent, NewLifecycleEvent};
pub use processor::{EventProcessor, ProcessError, ProcessingReport};
pub use recorder::{RunStatus, WorkflowRun};
pub use store::{StoreError, StoreResult, Stores};
pub use triggers::LifecycleTriggers;
