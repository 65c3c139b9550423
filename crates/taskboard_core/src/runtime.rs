//! Process bootstrap: builds every service once and hands out handles.
//!
//! # Responsibility
//! - Start logging, open local storage, resolve the device id, load the
//!   store, and choose the cloud provider from configuration.
//!
//! # Invariants
//! - Nothing here is global; callers own the returned runtime.
//! - A missing or disabled cloud provider yields a local-only runtime, never
//!   an error.

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, CoreConfig};
use crate::identity::{resolve_device_id, DeviceId};
use crate::logging::{init_logging, LoggingError};
use crate::persistence::{KeyValueStore, PersistenceError, SqliteKeyValueStore};
use crate::store::{LocalStore, SharedStore, StoreError};
use crate::sync::{CloudSyncProvider, FileCloudProvider, SyncOrchestrator, SyncSettings};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Logging(LoggingError),
    DataDir { path: PathBuf, source: std::io::Error },
    Persistence(PersistenceError),
    Store(StoreError),
}

impl Display for RuntimeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::DataDir { path, source } => write!(
                f,
                "failed to prepare data directory `{}`: {source}",
                path.display()
            ),
            Self::Persistence(err) => write!(f, "{err}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Logging(err) => Some(err),
            Self::DataDir { source, .. } => Some(source),
            Self::Persistence(err) => Some(err),
            Self::Store(err) => Some(err),
        }
    }
}

impl From<ConfigError> for RuntimeError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<LoggingError> for RuntimeError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<PersistenceError> for RuntimeError {
    fn from(value: PersistenceError) -> Self {
        Self::Persistence(value)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

pub struct TaskboardRuntime {
    config: CoreConfig,
    device_id: DeviceId,
    store: SharedStore,
    orchestrator: Arc<SyncOrchestrator>,
}

impl TaskboardRuntime {
    /// Builds the runtime from configuration with the system clock and the
    /// SQLite key-value store under `storage.data_dir`.
    ///
    /// `platform_device_id` seeds the device id on first launch only.
    pub fn bootstrap(
        config: CoreConfig,
        platform_device_id: Option<&str>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        if let Some(log_dir) = &config.logging.log_dir {
            init_logging(config.logging.effective_level(), log_dir)?;
        }

        let data_dir = &config.storage.data_dir;
        std::fs::create_dir_all(data_dir).map_err(|source| RuntimeError::DataDir {
            path: data_dir.clone(),
            source,
        })?;
        let kv: Arc<dyn KeyValueStore> =
            Arc::new(SqliteKeyValueStore::open(config.storage.db_path())?);

        Self::assemble(config, kv, Arc::new(SystemClock), platform_device_id, None)
    }

    /// Builds the runtime over caller-supplied parts. `provider` overrides
    /// the configured one when given.
    pub fn assemble(
        config: CoreConfig,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        platform_device_id: Option<&str>,
        provider: Option<Arc<dyn CloudSyncProvider>>,
    ) -> Result<Self, RuntimeError> {
        let device_id = resolve_device_id(kv.as_ref(), platform_device_id)?;
        let store = LocalStore::open(kv, clock.clone())?;
        store.install_device(device_id.clone());
        let store = SharedStore::new(store);

        let provider = match provider {
            Some(provider) => Some(provider),
            None => configured_provider(&config, &device_id, &clock)?,
        };
        let settings = SyncSettings::from(&config.sync);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            provider,
            clock,
            settings,
        ));

        let counts = store.lock().counts();
        info!(
            "event=runtime_bootstrap module=runtime status=ok device_id={device_id} tasks={} notes={} subtasks={} sync_enabled={}",
            counts.tasks,
            counts.notes,
            counts.subtasks,
            orchestrator.has_provider()
        );

        Ok(Self {
            config,
            device_id,
            store,
            orchestrator,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }
}

fn configured_provider(
    config: &CoreConfig,
    device_id: &DeviceId,
    clock: &Arc<dyn Clock>,
) -> Result<Option<Arc<dyn CloudSyncProvider>>, RuntimeError> {
    if !config.sync.enabled {
        info!("event=runtime_bootstrap module=runtime status=ok sync=disabled");
        return Ok(None);
    }
    let Some(cloud_dir) = &config.sync.cloud_dir else {
        warn!("event=runtime_bootstrap module=runtime status=ok sync=no_cloud_dir");
        return Ok(None);
    };
    std::fs::create_dir_all(cloud_dir).map_err(|source| RuntimeError::DataDir {
        path: cloud_dir.clone(),
        source,
    })?;
    Ok(Some(Arc::new(FileCloudProvider::new(
        cloud_dir.clone(),
        device_id.clone(),
        clock.clone(),
    ))))
}
