// ── Command API ──
//
// Every intent flows through one `Command` type discriminated by
// `CommandName`. The network side lives behind `CommandExecutor`, which
// the application implements per resource type; the engine only ever
// calls `sync()` for writes and `get_cloud_copies()` for reads.

pub mod algebra;
pub mod factory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, SyncError};
use crate::model::{CommandId, Payload, Resource, ResourceId};

pub use factory::{CommandFactory, ExecutorRegistry};

// ── CommandName ─────────────────────────────────────────────────────

/// Discriminator of a command.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum CommandName {
    Create,
    Update,
    Delete,
    Read,
    ReadAll,
}

impl CommandName {
    /// Writes go through the queue; reads never do.
    pub fn is_write(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }

    /// Create and Update carry a payload that is applied to the store.
    pub fn carries_payload(self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

// ── Executor capability ─────────────────────────────────────────────

/// Outcome of a write or delete reaching the remote side.
///
/// `new_sync_date == None` means the remote did not confirm the write;
/// the engine treats that exactly like an error.
#[derive(Debug, Clone, Default)]
pub struct SyncResponse {
    pub new_sync_date: Option<DateTime<Utc>>,
    pub new_resource: Option<Resource>,
}

impl SyncResponse {
    pub fn confirmed(sync_date: DateTime<Utc>) -> Self {
        Self {
            new_sync_date: Some(sync_date),
            new_resource: None,
        }
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.new_resource = Some(resource);
        self
    }
}

/// Records returned by a Read or ReadAll.
#[derive(Debug, Clone, Default)]
pub struct CloudCopies {
    pub success: bool,
    pub records: Vec<Resource>,
}

impl CloudCopies {
    pub fn found(records: Vec<Resource>) -> Self {
        Self {
            success: true,
            records,
        }
    }

    pub fn failed() -> Self {
        Self::default()
    }
}

/// Network capability of a command, implemented by the application.
///
/// Request shaping, auth, transport and retry policy all live here.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Push a Create, Update or Delete to the remote store.
    async fn sync(&self, command: &Command) -> Result<SyncResponse, ExecutionError> {
        Err(unsupported(command, "sync"))
    }

    /// Fetch remote copies for a Read or ReadAll.
    async fn get_cloud_copies(&self, command: &Command) -> Result<CloudCopies, ExecutionError> {
        Err(unsupported(command, "get_cloud_copies"))
    }
}

fn unsupported(command: &Command, capability: &str) -> ExecutionError {
    Box::new(SyncError::Unsupported {
        command_name: command.name,
        reason: format!(
            "executor for '{}' does not implement {capability}",
            command.resource_type
        ),
    })
}

// ── Command ─────────────────────────────────────────────────────────

/// A unit of intent over one resource.
#[derive(Clone)]
pub struct Command {
    pub id: CommandId,
    pub resource_type: String,
    pub resource_id: ResourceId,
    pub name: CommandName,
    pub created_at: DateTime<Utc>,
    pub payload: Payload,
    executor: Arc<dyn CommandExecutor>,
}

impl Command {
    /// Build a command with a fresh id, stamped with the current time.
    pub fn new(
        resource_type: impl Into<String>,
        name: CommandName,
        resource_id: impl Into<ResourceId>,
        payload: Payload,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            id: CommandId::new(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            name,
            created_at: Utc::now(),
            payload,
            executor,
        }
    }

    /// Replace identity and creation date, e.g. when rehydrating from a
    /// snapshot or when a synthesized command inherits an older one.
    pub fn with_identity(mut self, id: CommandId, created_at: DateTime<Utc>) -> Self {
        self.id = id;
        self.created_at = created_at;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// `true` when both commands address the same resource.
    pub fn targets_same_resource(&self, other: &Command) -> bool {
        self.resource_type == other.resource_type && self.resource_id == other.resource_id
    }

    pub async fn sync(&self) -> Result<SyncResponse, ExecutionError> {
        self.executor.sync(self).await
    }

    pub async fn get_cloud_copies(&self) -> Result<CloudCopies, ExecutionError> {
        self.executor.get_cloud_copies(self).await
    }

    /// Serializable shape of this command.
    pub fn record(&self) -> CommandRecord {
        CommandRecord {
            command_id: self.id,
            resource_type: self.resource_type.clone(),
            resource_id: self.resource_id.clone(),
            command_name: self.name,
            command_creation_date: self.created_at,
            payload: self.payload.clone(),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("resource_type", &self.resource_type)
            .field("resource_id", &self.resource_id)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// Persisted form of a queued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub command_id: CommandId,
    pub resource_type: String,
    pub resource_id: ResourceId,
    pub command_name: CommandName,
    pub command_creation_date: DateTime<Utc>,
    #[serde(default)]
    pub payload: Payload,
}
