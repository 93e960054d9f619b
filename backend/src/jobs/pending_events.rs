// Pending Events Job - retries events left pending by failed or interrupted processing

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::lifecycle::processor::{EventProcessor, ProcessError};
use crate::lifecycle::store::{StoreResult, Stores};

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSweepReport {
    pub examined: usize,
    pub processed: usize,
    pub busy: usize,
    pub runs_created: usize,
    pub errors: Vec<String>,
}

pub struct PendingEventsJob {
    stores: Stores,
    processor: Arc<EventProcessor>,
    max_attempts: i32,
    concurrency: usize,
}

impl PendingEventsJob {
    pub fn new(stores: Stores, processor: Arc<EventProcessor>, max_attempts: i32, concurrency: usize) -> Self {
        Self {
            stores,
            processor,
            max_attempts,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> StoreResult<PendingSweepReport> {
        let pending = self
            .stores
            .events
            .list_pending_events(self.max_attempts, BATCH_SIZE)
            .await?;

        let mut report = PendingSweepReport {
            examined: pending.len(),
            ..Default::default()
        };

        let outcomes: Vec<_> = stream::iter(pending)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|event| async move { (event.id, self.processor.process_event(event.id).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (event_id, outcome) in outcomes {
            match outcome {
                Ok(processed) => {
                    report.processed += 1;
                    report.runs_created += processed.runs.len();
                }
                Err(ProcessError::Busy(_)) => report.busy += 1,
                Err(e) => {
                    warn!("Pending event {} still failing: {}", event_id, e);
                    report.errors.push(format!("event {}: {}", event_id, e));
                }
            }
        }

        info!(
            "Pending event sweep: {} examined, {} processed, {} busy, {} failed",
            report.examined,
            report.processed,
            report.busy,
            report.errors.len()
        );
        Ok(report)
    }
}
