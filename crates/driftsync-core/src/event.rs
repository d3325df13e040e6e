// ── Engine events ──
//
// Broadcast to any number of observers. Lagging receivers lose the
// oldest events; the engine never waits on them.

use chrono::{DateTime, Utc};

use crate::command::CommandName;
use crate::model::{CommandId, ResourceId};

/// Something an operator may want to see without polling.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Connectivity edge observed by the dispatcher.
    OnlineChanged { online: bool },
    /// A command left the queue for the network.
    Dispatched {
        command_id: CommandId,
        command_name: CommandName,
        resource_id: ResourceId,
    },
    /// The remote side confirmed a command.
    Confirmed {
        command_id: CommandId,
        sync_date: DateTime<Utc>,
    },
    /// A command failed and now sits in the error queue.
    Failed { command_id: CommandId, reason: String },
    /// A storage hook rejected a write.
    StorageFailed { key: String, reason: String },
    /// Bootstrap finished and moved the local watermark.
    Bootstrapped { sync_date: DateTime<Utc>, resources: usize },
}
