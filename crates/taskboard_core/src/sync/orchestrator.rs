//! Sync orchestrator: pull/push scheduling around the local store.
//!
//! # Responsibility
//! - Pull the cloud record, decide whether it is newer, and import it
//!   through the store's guards.
//! - Push the local snapshot after edits, coalescing bursts into at most
//!   one trailing push.
//! - Run startup sync under a timeout and drive the periodic/trigger loop.
//!
//! # Invariants
//! - At most one pull and one push are in flight per orchestrator.
//! - The store lock is never held across an `.await`.
//! - Failures are logged and recorded in `status()`; they never panic and
//!   never block local edits.

use crate::clock::Clock;
use crate::identity::DeviceId;
use crate::integrity::{check_integrity, IntegrityReport};
use crate::model::SyncEnvelope;
use crate::retention::{RetentionSweeper, DEFAULT_RETENTION_DAYS};
use crate::store::{EntityCounts, LocalStore, SharedStore, StoreResult};
use crate::sync::provider::CloudSyncProvider;
use crate::sync::reconcile::{
    ImportOptions, ImportOutcome, MergeStats, SkipReason, SyncGuards, DEFAULT_DEBOUNCE_SECS,
};
use crate::sync::retry::{retry, RetryPolicy, Sleeper, TokioSleeper};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const TRIGGER_CHANNEL_CAPACITY: usize = 16;
const MIN_TIMER_PERIOD: Duration = Duration::from_millis(1);
const MAX_TIMER_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Runtime knobs for the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub debounce_window: chrono::Duration,
    pub retry: RetryPolicy,
    pub startup_timeout: Duration,
    pub retention: chrono::Duration,
    pub maintenance_interval: Duration,
    /// Schedule a push after every successful local edit.
    pub auto_push: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            debounce_window: chrono::Duration::seconds(DEFAULT_DEBOUNCE_SECS),
            retry: RetryPolicy::default(),
            startup_timeout: Duration::from_secs(5),
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
            maintenance_interval: Duration::from_secs(24 * 60 * 60),
            auto_push: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Startup,
    Manual,
    Periodic,
    NetworkOnline,
    Foreground,
}

impl SyncTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Manual => "manual",
            Self::Periodic => "periodic",
            Self::NetworkOnline => "network_online",
            Self::Foreground => "foreground",
        }
    }
}

impl Display for SyncTrigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages accepted by the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Sync(SyncTrigger),
    Push,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    NoProvider,
    /// Another pull was in flight; it will run once more afterwards.
    Coalesced,
    NoRemoteData,
    UpToDate,
    Imported(MergeStats),
    Skipped(SkipReason),
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    NoProvider,
    Pushed,
    /// Another push was in flight; a trailing push was scheduled.
    Coalesced,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Disabled,
    Idle,
    Syncing,
}

/// Lightweight status for a UI indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub push_pending: bool,
    pub last_remote_sync: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub purged: EntityCounts,
    pub integrity: IntegrityReport,
}

/// `lastSync` and writer of the newest record seen or written.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteMark {
    last_sync: DateTime<Utc>,
    device_id: String,
}

#[derive(Debug, Default)]
struct OrchestratorState {
    syncing: bool,
    sync_requested: bool,
    pushing: bool,
    push_requested: bool,
    suspend_depth: u32,
    last_local_change: Option<DateTime<Utc>>,
    last_known: Option<RemoteMark>,
    last_success_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

#[derive(Clone, Copy)]
enum Flight {
    Sync,
    Push,
}

/// Clears an in-flight flag if the owning future is dropped mid-way.
struct InFlight<'a> {
    state: &'a Mutex<OrchestratorState>,
    flight: Flight,
    armed: bool,
}

impl<'a> InFlight<'a> {
    fn new(state: &'a Mutex<OrchestratorState>, flight: Flight) -> Self {
        Self {
            state,
            flight,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match self.flight {
            Flight::Sync => state.syncing = false,
            Flight::Push => state.pushing = false,
        }
    }
}

/// Keeps imports suspended while alive. Guards nest.
pub struct SuspendGuard<'a> {
    state: &'a Mutex<OrchestratorState>,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.suspend_depth = state.suspend_depth.saturating_sub(1);
    }
}

/// Sender half of the run loop's trigger channel.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Queues a pull. A full queue already holds pending work, so the
    /// request is dropped.
    pub fn request_sync(&self, trigger: SyncTrigger) -> bool {
        self.send(SyncCommand::Sync(trigger))
    }

    pub fn request_push(&self) -> bool {
        self.send(SyncCommand::Push)
    }

    /// Stops the run loop after its current step.
    pub async fn shutdown(&self) {
        if self.tx.send(SyncCommand::Shutdown).await.is_err() {
            debug!("event=sync_shutdown module=sync status=already_stopped");
        }
    }

    fn send(&self, command: SyncCommand) -> bool {
        match self.tx.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("event=sync_trigger module=sync status=coalesced command={command:?}");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("event=sync_trigger module=sync status=closed command={command:?}");
                false
            }
        }
    }
}

pub struct SyncOrchestrator {
    store: SharedStore,
    provider: Option<Arc<dyn CloudSyncProvider>>,
    device_id: DeviceId,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sweeper: RetentionSweeper,
    settings: SyncSettings,
    state: Mutex<OrchestratorState>,
}

impl SyncOrchestrator {
    /// `provider == None` runs local-only: every sync call is a no-op.
    pub fn new(
        store: SharedStore,
        provider: Option<Arc<dyn CloudSyncProvider>>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        let device_id = store.lock().device_id().clone();
        let sweeper = RetentionSweeper::new(settings.retention, clock.clone());
        Self {
            store,
            provider,
            device_id,
            clock,
            sleeper: Arc::new(TokioSleeper),
            sweeper,
            settings,
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    /// Replaces the retry delay source.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- local edits -----------------------------------------------------

    /// Suspends imports until the returned guard is dropped.
    pub fn suspend_sync(&self) -> SuspendGuard<'_> {
        self.state().suspend_depth += 1;
        SuspendGuard { state: &self.state }
    }

    /// Runs a store mutation with imports suspended, records the change
    /// time, and schedules a push when the mutation succeeded.
    pub fn edit<T>(
        self: &Arc<Self>,
        mutation: impl FnOnce(&mut LocalStore) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let result = {
            let _suspended = self.suspend_sync();
            let mut store = self.store.lock();
            mutation(&mut store)
        };
        // In-memory state may have changed even when persisting failed.
        self.state().last_local_change = Some(self.clock.now());
        if result.is_ok() && self.settings.auto_push {
            self.request_push();
        }
        result
    }

    /// Current import guards.
    pub fn guards(&self) -> SyncGuards {
        let state = self.state();
        SyncGuards {
            suspended: state.suspend_depth > 0,
            last_local_change: state.last_local_change,
            debounce_window: self.settings.debounce_window,
        }
    }

    // ---- push ------------------------------------------------------------

    /// Spawns a push on the current tokio runtime.
    ///
    /// Without a runtime the request is parked; the run loop flushes it
    /// when it starts and on every poll tick.
    pub fn request_push(self: &Arc<Self>) {
        if self.provider.is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let this = Arc::clone(self);
                handle.spawn(async move {
                    this.push_now().await;
                });
            }
            Err(_) => {
                warn!("event=sync_push module=sync status=deferred reason=no_runtime");
                self.state().push_requested = true;
            }
        }
    }

    async fn flush_deferred_push(&self) {
        let deferred = {
            let state = self.state();
            state.push_requested && !state.pushing
        };
        if deferred {
            debug!("event=sync_push module=sync status=start reason=deferred");
            self.push_now().await;
        }
    }

    /// Pushes the current snapshot. Requests arriving while a push is in
    /// flight collapse into exactly one trailing push.
    pub async fn push_now(&self) -> PushOutcome {
        let Some(provider) = self.provider.clone() else {
            return PushOutcome::NoProvider;
        };
        {
            let mut state = self.state();
            if state.pushing {
                state.push_requested = true;
                debug!("event=sync_push module=sync status=coalesced");
                return PushOutcome::Coalesced;
            }
            state.pushing = true;
            state.push_requested = false;
        }
        let mut in_flight = InFlight::new(&self.state, Flight::Push);

        loop {
            let snapshot = self.store.lock().export_snapshot();
            let outcome = match provider.try_save(&snapshot).await {
                Ok(envelope) => {
                    info!(
                        "event=sync_push module=sync status=ok provider={} tasks={} notes={} subtasks={}",
                        provider.provider_id(),
                        envelope.snapshot.tasks.len(),
                        envelope.snapshot.notes.len(),
                        envelope.snapshot.subtasks.len()
                    );
                    self.record_remote(&envelope);
                    self.record_success();
                    PushOutcome::Pushed
                }
                Err(err) => {
                    warn!(
                        "event=sync_push module=sync status=error provider={} error_code={} error={}",
                        err.provider_id, err.code, err.message
                    );
                    self.record_error(err.to_string());
                    PushOutcome::Failed(err.to_string())
                }
            };

            let again = {
                let mut state = self.state();
                if state.push_requested {
                    state.push_requested = false;
                    true
                } else {
                    state.pushing = false;
                    false
                }
            };
            if !again {
                in_flight.disarm();
                return outcome;
            }
            debug!("event=sync_push module=sync status=trailing");
        }
    }

    // ---- pull ------------------------------------------------------------

    /// Pulls and imports the cloud record. Calls arriving while a pull is
    /// in flight collapse into one follow-up pull.
    pub async fn sync_now(&self, trigger: SyncTrigger) -> SyncOutcome {
        let Some(provider) = self.provider.clone() else {
            debug!("event=sync_pull module=sync status=skipped reason=no_provider trigger={trigger}");
            return SyncOutcome::NoProvider;
        };
        {
            let mut state = self.state();
            if state.syncing {
                state.sync_requested = true;
                debug!("event=sync_pull module=sync status=coalesced trigger={trigger}");
                return SyncOutcome::Coalesced;
            }
            state.syncing = true;
            state.sync_requested = false;
        }
        let mut in_flight = InFlight::new(&self.state, Flight::Sync);
        debug!("event=sync_pull module=sync status=start trigger={trigger}");

        loop {
            let outcome = self.pull_once(provider.as_ref()).await;
            let again = {
                let mut state = self.state();
                if state.sync_requested {
                    state.sync_requested = false;
                    true
                } else {
                    state.syncing = false;
                    false
                }
            };
            if !again {
                in_flight.disarm();
                return outcome;
            }
        }
    }

    async fn pull_once(&self, provider: &dyn CloudSyncProvider) -> SyncOutcome {
        let loaded = retry(&self.settings.retry, self.sleeper.as_ref(), |_| {
            provider.try_load()
        })
        .await;
        let envelope = match loaded {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                debug!("event=sync_pull module=sync status=empty provider={}", provider.provider_id());
                self.record_success();
                return SyncOutcome::NoRemoteData;
            }
            Err(err) => {
                warn!(
                    "event=sync_pull module=sync status=error provider={} error_code={} retryable={} error={}",
                    err.provider_id, err.code, err.retryable, err.message
                );
                self.record_error(err.to_string());
                return SyncOutcome::Failed(err.to_string());
            }
        };

        if !self.is_newer(&envelope) {
            debug!(
                "event=sync_pull module=sync status=up_to_date last_sync={}",
                envelope.last_sync.to_rfc3339()
            );
            self.record_success();
            return SyncOutcome::UpToDate;
        }

        let SyncEnvelope {
            snapshot,
            last_sync,
            device_id,
        } = envelope;
        let guards = self.guards();
        let imported = self
            .store
            .lock()
            .import_snapshot(snapshot, ImportOptions::default(), &guards);

        match imported {
            Ok(ImportOutcome::Applied(stats)) => {
                info!(
                    "event=sync_pull module=sync status=imported source_device={device_id} adopted={} replaced={} kept_local={}",
                    stats.adopted, stats.replaced, stats.kept_local
                );
                self.state().last_known = Some(RemoteMark {
                    last_sync,
                    device_id,
                });
                self.record_success();
                SyncOutcome::Imported(stats)
            }
            // The mark stays put so the next pull retries this record.
            Ok(ImportOutcome::Skipped(reason)) => SyncOutcome::Skipped(reason),
            Err(err) => {
                error!("event=sync_pull module=sync status=error stage=import error={err}");
                self.record_error(err.to_string());
                SyncOutcome::Failed(err.to_string())
            }
        }
    }

    /// Newer means a later `lastSync`, or the same instant written by a
    /// different device.
    fn is_newer(&self, envelope: &SyncEnvelope) -> bool {
        match &self.state().last_known {
            None => true,
            Some(mark) => {
                envelope.last_sync > mark.last_sync
                    || (envelope.last_sync == mark.last_sync && envelope.device_id != mark.device_id)
            }
        }
    }

    fn record_remote(&self, envelope: &SyncEnvelope) {
        self.state().last_known = Some(RemoteMark {
            last_sync: envelope.last_sync,
            device_id: envelope.device_id.clone(),
        });
    }

    fn record_success(&self) {
        let now = self.clock.now();
        let mut state = self.state();
        state.last_success_at = Some(now);
        state.last_error = None;
    }

    fn record_error(&self, message: String) {
        self.state().last_error = Some(message);
    }

    // ---- lifecycle -------------------------------------------------------

    /// Retention sweep followed by the integrity check.
    pub fn run_maintenance(&self) -> StoreResult<MaintenanceReport> {
        let mut store = self.store.lock();
        let purged = self.sweeper.sweep(&mut store)?;
        let integrity = check_integrity(&mut store)?;
        Ok(MaintenanceReport { purged, integrity })
    }

    /// Maintenance, then one pull bounded by `startup_timeout`. On timeout
    /// the pull keeps running in the background and the app proceeds
    /// local-only.
    pub async fn startup(self: &Arc<Self>) -> SyncOutcome {
        if let Err(err) = self.run_maintenance() {
            error!("event=sync_startup module=sync status=error stage=maintenance error={err}");
        }
        if self.provider.is_none() {
            info!("event=sync_startup module=sync status=local_only device_id={}", self.device_id);
            return SyncOutcome::NoProvider;
        }

        let this = Arc::clone(self);
        let pull = tokio::spawn(async move { this.sync_now(SyncTrigger::Startup).await });
        match tokio::time::timeout(self.settings.startup_timeout, pull).await {
            Ok(Ok(outcome)) => {
                info!("event=sync_startup module=sync status=ok outcome={outcome:?}");
                outcome
            }
            Ok(Err(join_err)) => {
                error!("event=sync_startup module=sync status=error error={join_err}");
                self.record_error(join_err.to_string());
                SyncOutcome::Failed(join_err.to_string())
            }
            Err(_) => {
                warn!(
                    "event=sync_startup module=sync status=timed_out timeout_ms={}",
                    self.settings.startup_timeout.as_millis()
                );
                SyncOutcome::TimedOut
            }
        }
    }

    /// Spawns the run loop and returns its trigger handle.
    pub fn spawn(self: &Arc<Self>) -> (SyncHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(TRIGGER_CHANNEL_CAPACITY);
        let this = Arc::clone(self);
        let task = tokio::spawn(this.run(rx));
        (SyncHandle { tx }, task)
    }

    /// Periodic pulls, daily maintenance, and external triggers until
    /// `Shutdown` arrives or every sender is dropped.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<SyncCommand>) {
        let poll = self.settings.poll_interval;
        let mut poll_timer = periodic(poll);
        let mut maintenance_timer = periodic(self.settings.maintenance_interval);

        info!(
            "event=sync_loop module=sync status=started poll_secs={} provider={}",
            poll.as_secs(),
            self.provider
                .as_ref()
                .map(|provider| provider.provider_id().to_owned())
                .unwrap_or_else(|| "none".to_owned())
        );
        self.flush_deferred_push().await;

        loop {
            tokio::select! {
                _ = poll_timer.tick() => {
                    self.sync_now(SyncTrigger::Periodic).await;
                    self.flush_deferred_push().await;
                }
                _ = maintenance_timer.tick() => {
                    if let Err(err) = self.run_maintenance() {
                        error!("event=sync_maintenance module=sync status=error error={err}");
                    }
                }
                command = commands.recv() => match command {
                    Some(SyncCommand::Sync(trigger)) => {
                        self.sync_now(trigger).await;
                    }
                    Some(SyncCommand::Push) => {
                        self.push_now().await;
                    }
                    Some(SyncCommand::Shutdown) | None => break,
                },
            }
        }

        info!("event=sync_loop module=sync status=stopped");
    }

    pub fn status(&self) -> SyncStatus {
        let state = self.state();
        let phase = if self.provider.is_none() {
            SyncPhase::Disabled
        } else if state.syncing || state.pushing {
            SyncPhase::Syncing
        } else {
            SyncPhase::Idle
        };
        SyncStatus {
            phase,
            push_pending: state.push_requested,
            last_remote_sync: state.last_known.as_ref().map(|mark| mark.last_sync),
            last_success_at: state.last_success_at,
            last_error: state.last_error.clone(),
        }
    }
}

/// First tick one period from now. The period is clamped so that neither
/// a zero nor an absurdly large setting can panic the timer.
fn periodic(period: Duration) -> Interval {
    let period = period.clamp(MIN_TIMER_PERIOD, MAX_TIMER_PERIOD);
    let start = Instant::now()
        .checked_add(period)
        .unwrap_or_else(Instant::now);
    let mut timer = interval_at(start, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
