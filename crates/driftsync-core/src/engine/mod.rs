// ── Sync engine ──
//
// Lifecycle of one offline-first engine instance: one-time hook
// installation, startup reconciliation (bootstrap + error requeue), the
// periodic dispatcher, and the write intake. All shared state hangs off
// an `Arc<EngineInner>`, so the handle is cheap to clone into tasks.

mod bootstrap;
mod dispatch;
mod intake;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::SyncDateProvider;
use crate::command::{Command, CommandFactory};
use crate::config::EngineConfig;
use crate::error::SyncError;
use crate::event::EngineEvent;
use crate::model::{Resource, ResourceId};
use crate::online::{AlwaysOnline, OnlineChecker, ReachabilityProbe};
use crate::queue::{Consolidation, StateStore, SyncQueue};
use crate::storage::StorageBackend;
use crate::store::{ListenerRegistry, ResourceListener, ResourceStore};
use crate::stream::ResourceStream;

const EVENT_CHANNEL_SIZE: usize = 256;

// ── Public types ─────────────────────────────────────────────────

/// Collaborators installed once by [`SyncEngine::initialize`].
pub struct SyncHooks {
    pub factory: Arc<dyn CommandFactory>,
    pub cloud_clock: Arc<dyn SyncDateProvider>,
    pub storage: Arc<dyn StorageBackend>,
    /// ReadAll commands run when the local watermark is stale.
    pub bootstrap: Vec<Command>,
}

/// Whether a write is applied to the local store before confirmation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ApplyMode {
    #[default]
    Optimistic,
    /// The store only changes once the remote side confirms.
    ConfirmBeforeApply,
}

/// What `add_command` did with a command.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Reads resolve immediately.
    Read(Vec<Resource>),
    /// The write entered the queue.
    Queued(Consolidation),
    /// The write changed nothing and was discarded.
    Dropped,
}

/// Point-in-time view of the engine, as logged on every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub running: bool,
    pub online: bool,
    pub in_progress: usize,
    pub max_concurrent: usize,
    pub waiting: usize,
    pub completed: u64,
    pub errors: usize,
    pub sync_date: Option<DateTime<Utc>>,
}

// ── SyncEngine ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Construct with [`new`](Self::new), install hooks with
/// [`initialize`](Self::initialize), then [`start_sync`](Self::start_sync).
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    runtime: OnceLock<Runtime>,
    init: Mutex<()>,
    queue: Mutex<SyncQueue>,
    /// Serializes `add_command` end to end.
    intake: Mutex<()>,
    registry: Arc<ListenerRegistry>,
    online_checker: RwLock<Arc<dyn OnlineChecker>>,
    online: watch::Sender<bool>,
    period: watch::Sender<Duration>,
    events: broadcast::Sender<EngineEvent>,
    /// Serializes `start_sync` while it bootstraps.
    starting: Mutex<()>,
    /// Token of the running timer; `None` while stopped.
    cancel: Mutex<Option<CancellationToken>>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    in_flight: TaskTracker,
}

/// State that only exists once hooks are installed.
struct Runtime {
    factory: Arc<dyn CommandFactory>,
    cloud_clock: Arc<dyn SyncDateProvider>,
    store: ResourceStore,
    state: StateStore,
    bootstrap: Vec<Command>,
}

impl SyncEngine {
    /// Create an engine. Does nothing until initialized and started.
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let (online, _) = watch::channel(true);
        let (period, _) = watch::channel(config.sync_period());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let online_checker = default_checker(&config);

        Self {
            inner: Arc::new(EngineInner {
                config,
                runtime: OnceLock::new(),
                init: Mutex::new(()),
                queue: Mutex::new(SyncQueue::new()),
                intake: Mutex::new(()),
                registry: Arc::new(ListenerRegistry::new()),
                online_checker: RwLock::new(online_checker),
                online,
                period,
                events,
                starting: Mutex::new(()),
                cancel: Mutex::new(None),
                task_handles: Mutex::new(Vec::new()),
                in_flight: TaskTracker::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Install collaborators and load both persisted documents.
    ///
    /// Commands the factory cannot rebuild are logged and dropped. Fails
    /// with [`SyncError::AlreadyInitialized`] on a second call.
    pub async fn initialize(&self, hooks: SyncHooks) -> Result<(), SyncError> {
        let _init = self.inner.init.lock().await;
        if self.inner.runtime.get().is_some() {
            return Err(SyncError::AlreadyInitialized);
        }

        let prefix = &self.inner.config.storage_prefix;
        let store = ResourceStore::with_registry(
            prefix,
            Arc::clone(&hooks.storage),
            Arc::clone(&self.inner.registry),
        );
        let state = StateStore::new(prefix, hooks.storage);

        let resources = store.load().await?;
        let persisted = state.load().await?;
        {
            let mut queue = self.inner.queue.lock().await;
            if let Some(doc) = persisted {
                let dropped = queue.restore(hooks.factory.as_ref(), doc);
                if dropped > 0 {
                    warn!(dropped, "persisted commands could not be rebuilt");
                }
            }
            info!(
                resources,
                pending = queue.pending().len(),
                errors = queue.errors().len(),
                "sync engine initialized"
            );
        }

        let runtime = Runtime {
            factory: hooks.factory,
            cloud_clock: hooks.cloud_clock,
            store,
            state,
            bootstrap: hooks.bootstrap,
        };
        self.inner
            .runtime
            .set(runtime)
            .map_err(|_| SyncError::AlreadyInitialized)
    }

    /// Reconcile with the remote side and start the dispatcher timer.
    ///
    /// No-op while already running. Bootstraps when the local watermark
    /// is behind the cloud one, requeues failed commands newer than the
    /// watermark, persists, and notifies every listener once. The engine
    /// only reports running once the timer is installed.
    pub async fn start_sync(&self) -> Result<(), SyncError> {
        let rt = self.runtime()?;
        let _starting = self.inner.starting.lock().await;
        if self.is_running().await {
            debug!("sync already running");
            return Ok(());
        }

        self.bootstrap(rt).await;

        {
            let mut queue = self.inner.queue.lock().await;
            let requeue = queue.requeue_errors();
            queue.prune_deleted_ids();
            if requeue.requeued > 0 || requeue.dropped > 0 {
                info!(
                    requeued = requeue.requeued,
                    dropped = requeue.dropped,
                    "error queue reconciled against watermark"
                );
            }
        }
        self.save_state(rt).await?;
        rt.store.notify_all().await;

        let token = CancellationToken::new();
        let engine = self.clone();
        let child = token.clone();
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(dispatch::sync_task(engine, child)));
        *self.inner.cancel.lock().await = Some(token);

        info!(
            period_secs = self.inner.period.borrow().as_secs(),
            "sync started"
        );
        Ok(())
    }

    /// Stop scheduling ticks. In-flight commands still complete.
    pub async fn stop_sync(&self) {
        let Some(token) = self.inner.cancel.lock().await.take() else {
            return;
        };
        token.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "sync task ended abnormally");
            }
        }
        info!("sync stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.inner.cancel.lock().await.is_some()
    }

    /// Wait until every dispatched command has completed.
    pub async fn wait_idle(&self) {
        self.inner.in_flight.close();
        self.inner.in_flight.wait().await;
        self.inner.in_flight.reopen();
    }

    // ── Tuning ───────────────────────────────────────────────────

    pub async fn set_online_checker(&self, checker: Arc<dyn OnlineChecker>) {
        *self.inner.online_checker.write().await = checker;
    }

    /// Change the dispatcher period without restarting (at least 1 s).
    pub fn set_sync_interval(&self, seconds: u64) {
        let period = Duration::from_secs(seconds.max(1));
        self.inner.period.send_replace(period);
        debug!(seconds = period.as_secs(), "sync interval changed");
    }

    // ── Observation ──────────────────────────────────────────────

    /// Register the listener for a resource type, replacing any previous one.
    pub fn set_resource_listener(
        &self,
        resource_type: impl Into<String>,
        listener: ResourceListener,
    ) {
        self.inner.registry.set_listener(resource_type, listener);
    }

    /// Subscribe to snapshots of one resource type.
    pub async fn subscribe(&self, resource_type: &str) -> ResourceStream {
        match self.inner.runtime.get() {
            Some(rt) => rt.store.subscribe(resource_type).await,
            None => self.inner.registry.subscribe(resource_type, Vec::new),
        }
    }

    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn online(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }

    pub async fn status(&self) -> SyncStatus {
        let running = self.is_running().await;
        let queue = self.inner.queue.lock().await;
        SyncStatus {
            running,
            online: *self.inner.online.borrow(),
            in_progress: queue.in_progress().len(),
            max_concurrent: self.inner.config.max_concurrent_requests,
            waiting: queue.pending().len(),
            completed: queue.completed(),
            errors: queue.errors().len(),
            sync_date: queue.sync_date(),
        }
    }

    /// Commands that failed this session, for diagnostics.
    pub async fn error_queue(&self) -> Vec<Command> {
        self.inner.queue.lock().await.errors().to_vec()
    }

    /// Commands not yet confirmed (waiting and in flight), oldest first.
    pub async fn pending_commands(&self) -> Vec<Command> {
        let queue = self.inner.queue.lock().await;
        let mut commands: Vec<Command> = queue
            .in_progress()
            .iter()
            .chain(queue.pending())
            .cloned()
            .collect();
        commands.sort_by_key(|cmd| cmd.created_at);
        commands
    }

    pub async fn sync_date(&self) -> Option<DateTime<Utc>> {
        self.inner.queue.lock().await.sync_date()
    }

    /// Local copy of one resource.
    pub async fn get_resource(
        &self,
        resource_type: &str,
        resource_id: &ResourceId,
    ) -> Result<Option<Resource>, SyncError> {
        let rt = self.runtime()?;
        Ok(rt.store.get(resource_type, resource_id).await)
    }

    /// Every local resource of one type.
    pub async fn resources(&self, resource_type: &str) -> Result<Vec<Resource>, SyncError> {
        let rt = self.runtime()?;
        Ok(rt.store.all(resource_type).await)
    }

    // ── Internal helpers ─────────────────────────────────────────

    fn runtime(&self) -> Result<&Runtime, SyncError> {
        self.inner.runtime.get().ok_or(SyncError::NotInitialized)
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.inner.events.send(event);
    }

    /// Persist the queue snapshot, surfacing failures as events.
    async fn save_state(&self, rt: &Runtime) -> Result<(), SyncError> {
        let result = rt.state.save(&self.inner.queue).await;
        if let Err(e) = &result {
            self.emit(EngineEvent::StorageFailed {
                key: rt.state.key().to_owned(),
                reason: e.to_string(),
            });
        }
        result
    }

    fn storage_failed(&self, rt: &Runtime, error: &SyncError) {
        self.emit(EngineEvent::StorageFailed {
            key: rt.store.key().to_owned(),
            reason: error.to_string(),
        });
    }
}

fn default_checker(config: &EngineConfig) -> Arc<dyn OnlineChecker> {
    let Some(url) = config.probe_url.clone() else {
        return Arc::new(AlwaysOnline);
    };
    match ReachabilityProbe::new(url, config.probe_timeout) {
        Ok(probe) => {
            debug!(url = %probe.url(), "reachability probe enabled");
            Arc::new(probe)
        }
        Err(e) => {
            warn!(error = %e, "reachability probe unavailable, assuming online");
            Arc::new(AlwaysOnline)
        }
    }
}
