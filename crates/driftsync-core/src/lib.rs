//! Offline-first synchronization engine.
//!
//! Callers hold local copies of remote-owned resources, mutate them
//! optimistically, and let the engine reconcile with the remote store
//! whenever connectivity allows:
//!
//! - **[`SyncEngine`]**: Central facade. [`initialize()`](SyncEngine::initialize)
//!   installs the command factory, cloud clock, storage, and bootstrap reads;
//!   [`start_sync()`](SyncEngine::start_sync) bootstraps when the local
//!   watermark is stale, requeues recent failures, and starts the periodic
//!   dispatcher. [`add_command()`](SyncEngine::add_command) is the single
//!   entry point for reads and writes.
//!
//! - **[`Command`]**: One tagged type for Create / Update / Delete / Read /
//!   ReadAll, carrying a [`CommandExecutor`] that performs the network side.
//!   The [`algebra`](command::algebra) cancels and merges queued writes.
//!
//! - **[`SyncQueue`]**: Pending, in-flight, and failed commands plus the
//!   global watermark, persisted as one state document.
//!
//! - **[`ResourceStore`]**: Local cache persisted as one data document,
//!   with per-type listeners and [`ResourceStream`] subscriptions.
//!
//! - **[`resolver`]**: Last-write-wins between local and cloud copies.

pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod online;
pub mod queue;
pub mod resolver;
pub mod storage;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{FixedSyncDate, SyncDateProvider};
pub use command::{
    CloudCopies, Command, CommandExecutor, CommandFactory, CommandName, CommandRecord,
    ExecutorRegistry, SyncResponse,
};
pub use config::EngineConfig;
pub use engine::{ApplyMode, CommandOutcome, SyncEngine, SyncHooks, SyncStatus};
pub use error::{ExecutionError, StorageError, SyncError};
pub use event::EngineEvent;
pub use model::{CommandId, Payload, Resource, ResourceId};
pub use online::{AlwaysOnline, OnlineChecker, ReachabilityProbe};
pub use queue::{Consolidation, StateDocument, SyncQueue};
pub use resolver::Winner;
pub use storage::{MemoryStorage, StorageBackend};
pub use store::{ResourceListener, ResourceStore};
pub use stream::{ResourceSnapshot, ResourceStream};
