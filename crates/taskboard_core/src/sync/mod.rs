//! Cloud synchronization: provider contract, reconciliation, orchestration.

pub mod file_provider;
pub mod memory_provider;
pub mod orchestrator;
pub mod provider;
pub mod reconcile;
pub mod retry;

pub use file_provider::{FileCloudProvider, SYNC_FILE_NAME};
pub use memory_provider::{MemoryCloudBucket, MemoryCloudProvider};
pub use orchestrator::{
    MaintenanceReport, PushOutcome, SuspendGuard, SyncCommand, SyncHandle, SyncOrchestrator,
    SyncOutcome, SyncPhase, SyncSettings, SyncStatus, SyncTrigger,
};
pub use provider::{
    Availability, CloudSyncProvider, ProviderError, ProviderResult, SyncStage, UpdateCheck,
};
pub use reconcile::{
    ImportOptions, ImportOutcome, MergeStats, SkipReason, SyncGuards, DEFAULT_DEBOUNCE_SECS,
};
pub use retry::{Backoff, RetryPolicy, Sleeper, TokioSleeper};
