//! File-backed cloud provider.
//!
//! Stores one JSON record inside a directory that an external service
//! (iCloud Drive, Dropbox, a network share) replicates between devices.
//!
//! # Invariants
//! - The record is replaced atomically: write to a device-private temp file,
//!   then rename over the record.
//! - A missing record is `Ok(None)`; an unreadable or malformed one is an
//!   error.

use crate::clock::Clock;
use crate::identity::DeviceId;
use crate::model::{Snapshot, SyncEnvelope};
use crate::sync::provider::{
    Availability, CloudSyncProvider, ProviderError, ProviderResult, SyncStage,
};
use async_trait::async_trait;
use log::debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SYNC_FILE_NAME: &str = "taskboard-sync.json";
const PROVIDER_ID: &str = "file";

pub struct FileCloudProvider {
    root: PathBuf,
    device_id: DeviceId,
    clock: Arc<dyn Clock>,
}

impl FileCloudProvider {
    pub fn new(root: impl Into<PathBuf>, device_id: DeviceId, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            device_id,
            clock,
        }
    }

    pub fn record_path(&self) -> PathBuf {
        self.root.join(SYNC_FILE_NAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(format!(".{SYNC_FILE_NAME}.{}.tmp", self.device_id))
    }

    fn io_error(stage: SyncStage, path: &Path, err: std::io::Error) -> ProviderError {
        let retryable = !matches!(
            err.kind(),
            ErrorKind::PermissionDenied | ErrorKind::InvalidInput
        );
        ProviderError::new(
            PROVIDER_ID,
            stage,
            "io_failed",
            format!("{}: {err}", path.display()),
            retryable,
        )
    }
}

#[async_trait]
impl CloudSyncProvider for FileCloudProvider {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    async fn try_save(&self, snapshot: &Snapshot) -> ProviderResult<SyncEnvelope> {
        let envelope =
            SyncEnvelope::stamp(snapshot.clone(), self.clock.now(), self.device_id.as_str());
        let payload = serde_json::to_vec(&envelope).map_err(|err| {
            ProviderError::new(
                PROVIDER_ID,
                SyncStage::Push,
                "serialize_failed",
                err.to_string(),
                false,
            )
        })?;

        let temp = self.temp_path();
        let target = self.record_path();
        tokio::fs::write(&temp, &payload)
            .await
            .map_err(|err| Self::io_error(SyncStage::Push, &temp, err))?;
        tokio::fs::rename(&temp, &target)
            .await
            .map_err(|err| Self::io_error(SyncStage::Push, &target, err))?;

        debug!(
            "event=provider_save module=sync status=ok provider={PROVIDER_ID} bytes={}",
            payload.len()
        );
        Ok(envelope)
    }

    async fn try_load(&self) -> ProviderResult<Option<SyncEnvelope>> {
        let path = self.record_path();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(Self::io_error(SyncStage::Pull, &path, err)),
        };
        let envelope = serde_json::from_slice::<SyncEnvelope>(&raw).map_err(|err| {
            // A half-replicated file may parse on the next attempt.
            ProviderError::new(
                PROVIDER_ID,
                SyncStage::Pull,
                "malformed_snapshot",
                err.to_string(),
                true,
            )
        })?;
        Ok(Some(envelope))
    }

    async fn check_availability(&self) -> Availability {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Availability::available("sync directory reachable"),
            Ok(_) => Availability::unavailable(format!(
                "{} is not a directory",
                self.root.display()
            )),
            Err(err) => Availability::unavailable(format!("{}: {err}", self.root.display())),
        }
    }
}
