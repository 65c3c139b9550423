//! In-memory cloud provider for simulations and tests.
//!
//! Several providers (one per simulated device) share a `MemoryCloudBucket`,
//! which plays the role of the single cloud record.

use crate::clock::Clock;
use crate::identity::DeviceId;
use crate::model::{Snapshot, SyncEnvelope};
use crate::sync::provider::{
    Availability, CloudSyncProvider, ProviderError, ProviderResult, SyncStage,
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const PROVIDER_ID: &str = "memory";

#[derive(Debug, Default)]
struct BucketState {
    record: Option<String>,
    offline: bool,
    failing_loads: u32,
    saves: usize,
    loads: usize,
}

/// Shared stand-in for the cloud record.
#[derive(Debug, Clone, Default)]
pub struct MemoryCloudBucket {
    state: Arc<Mutex<BucketState>>,
}

impl MemoryCloudBucket {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// While offline every call fails with a retryable error.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Makes the next `count` loads fail with a retryable error.
    pub fn fail_next_loads(&self, count: u32) {
        self.state().failing_loads = count;
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.state().saves
    }

    /// Load attempts so far, failed ones included.
    pub fn load_count(&self) -> usize {
        self.state().loads
    }

    /// Decoded current record.
    pub fn current(&self) -> Option<SyncEnvelope> {
        let raw = self.state().record.clone()?;
        serde_json::from_str(&raw).ok()
    }

    /// Replaces the raw record, bypassing stamping.
    pub fn put_raw(&self, raw: impl Into<String>) {
        self.state().record = Some(raw.into());
    }
}

pub struct MemoryCloudProvider {
    bucket: MemoryCloudBucket,
    device_id: DeviceId,
    clock: Arc<dyn Clock>,
}

impl MemoryCloudProvider {
    pub fn new(bucket: MemoryCloudBucket, device_id: DeviceId, clock: Arc<dyn Clock>) -> Self {
        Self {
            bucket,
            device_id,
            clock,
        }
    }

    fn offline_error(stage: SyncStage) -> ProviderError {
        ProviderError::new(PROVIDER_ID, stage, "offline", "bucket is offline", true)
    }
}

#[async_trait]
impl CloudSyncProvider for MemoryCloudProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn try_save(&self, snapshot: &Snapshot) -> ProviderResult<SyncEnvelope> {
        let envelope =
            SyncEnvelope::stamp(snapshot.clone(), self.clock.now(), self.device_id.as_str());
        let raw = serde_json::to_string(&envelope).map_err(|err| {
            ProviderError::new(
                PROVIDER_ID,
                SyncStage::Push,
                "serialize_failed",
                err.to_string(),
                false,
            )
        })?;

        let mut state = self.bucket.state();
        if state.offline {
            return Err(Self::offline_error(SyncStage::Push));
        }
        state.record = Some(raw);
        state.saves += 1;
        Ok(envelope)
    }

    async fn try_load(&self) -> ProviderResult<Option<SyncEnvelope>> {
        let raw = {
            let mut state = self.bucket.state();
            state.loads += 1;
            if state.offline {
                return Err(Self::offline_error(SyncStage::Pull));
            }
            if state.failing_loads > 0 {
                state.failing_loads -= 1;
                return Err(ProviderError::new(
                    PROVIDER_ID,
                    SyncStage::Pull,
                    "transient",
                    "injected load failure",
                    true,
                ));
            }
            state.record.clone()
        };

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw).map(Some).map_err(|err| {
                ProviderError::new(
                    PROVIDER_ID,
                    SyncStage::Pull,
                    "malformed_snapshot",
                    err.to_string(),
                    false,
                )
            }),
        }
    }

    async fn check_availability(&self) -> Availability {
        if self.bucket.state().offline {
            Availability::unavailable("bucket is offline")
        } else {
            Availability::available("bucket reachable")
        }
    }
}
