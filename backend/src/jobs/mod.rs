// Background Jobs
//
// Scheduled lifecycle sweeps, run by tokio-cron-scheduler and on demand from the cron endpoints.

pub mod directory_sync;
pub mod pending_events;
pub mod scheduler;

pub use directory_sync::{DirectoryFeed, DirectorySyncJob, HttpDirectoryFeed, SyncSweepReport};
pub use pending_events::{PendingEventsJob, PendingSweepReport};
pub use scheduler::{JobError, JobResult, JobScheduler, SweepRunner};
