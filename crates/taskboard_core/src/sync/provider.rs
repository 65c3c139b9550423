//! Cloud sync provider contract.
//!
//! # Responsibility
//! - Define the single capability interface every cloud backend satisfies.
//! - Provide never-failing convenience wrappers over the fallible primitives.
//!
//! # Invariants
//! - Providers overwrite the whole stored record; there are no partial
//!   writes.
//! - `try_save` stamps the record with `lastSync` and `deviceId` before
//!   storing it.
//! - "No data yet" is `Ok(None)`, never an error.

use crate::model::{Snapshot, SyncEnvelope};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Sync stage where a provider failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Pull,
    Push,
    Probe,
}

impl SyncStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
            Self::Probe => "probe",
        }
    }
}

/// Normalised provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    pub provider_id: String,
    pub stage: SyncStage,
    /// Stable machine-readable code, e.g. `io_failed`, `malformed_snapshot`.
    pub code: String,
    pub message: String,
    /// Whether repeating the same call may succeed.
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(
        provider_id: impl Into<String>,
        stage: SyncStage,
        code: impl Into<String>,
        message: impl Into<String>,
        retryable: bool,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            stage,
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "provider `{}` failed during {} ({}): {}",
            self.provider_id,
            self.stage.as_str(),
            self.code,
            self.message
        )
    }
}

impl Error for ProviderError {}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Result of a cheap connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub reason: String,
}

impl Availability {
    pub fn available(reason: impl Into<String>) -> Self {
        Self {
            available: true,
            reason: reason.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: reason.into(),
        }
    }
}

/// Outcome of comparing the stored record against a local sync timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCheck {
    pub has_updates: bool,
    pub data: Option<SyncEnvelope>,
    /// `lastSync` of the stored record.
    pub cloud_sync: Option<DateTime<Utc>>,
    /// Timestamp supplied by the caller.
    pub current_sync: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait CloudSyncProvider: Send + Sync {
    /// Stable lowercase identifier used in logs and errors.
    fn provider_id(&self) -> &str;

    /// Stamps and stores `snapshot`, returning the stored envelope.
    async fn try_save(&self, snapshot: &Snapshot) -> ProviderResult<SyncEnvelope>;

    /// Loads the stored record; `Ok(None)` when nothing was stored yet.
    async fn try_load(&self) -> ProviderResult<Option<SyncEnvelope>>;

    async fn check_availability(&self) -> Availability;

    /// `try_save` that reports failure as `false`.
    async fn save(&self, snapshot: &Snapshot) -> bool {
        match self.try_save(snapshot).await {
            Ok(_) => true,
            Err(err) => {
                warn!(
                    "event=provider_save module=sync status=error provider={} error_code={} error={}",
                    self.provider_id(),
                    err.code,
                    err.message
                );
                false
            }
        }
    }

    /// `try_load` that reports failure as `None`.
    async fn load(&self) -> Option<SyncEnvelope> {
        match self.try_load().await {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    "event=provider_load module=sync status=error provider={} error_code={} error={}",
                    self.provider_id(),
                    err.code,
                    err.message
                );
                None
            }
        }
    }

    /// Reports whether the stored record is newer than `current_sync`.
    async fn check_for_updates(&self, current_sync: Option<DateTime<Utc>>) -> UpdateCheck {
        let data = self.load().await;
        let cloud_sync = data.as_ref().map(|envelope| envelope.last_sync);
        let has_updates = match (cloud_sync, current_sync) {
            (Some(cloud), Some(current)) => cloud > current,
            (Some(_), None) => true,
            (None, _) => false,
        };
        UpdateCheck {
            has_updates,
            data,
            cloud_sync,
            current_sync,
        }
    }
}
