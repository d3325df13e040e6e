// ── Command algebra ──
//
// Pure consolidation rules applied when a write enters the queue.
// A Delete on a never-confirmed Create annihilates both; an Update folds
// into a pending Create or Update for the same resource.

use super::{Command, CommandFactory, CommandName};
use crate::error::SyncError;
use crate::model::payload;

/// `true` when `incoming` (a Delete) cancels `existing` (a pending Create).
pub fn can_cancel_out(existing: &Command, incoming: &Command) -> bool {
    existing.targets_same_resource(incoming)
        && existing.name == CommandName::Create
        && incoming.name == CommandName::Delete
}

/// `true` when `incoming` (an Update) can fold into `existing`.
pub fn can_merge(existing: &Command, incoming: &Command) -> bool {
    existing.targets_same_resource(incoming)
        && incoming.name == CommandName::Update
        && matches!(existing.name, CommandName::Create | CommandName::Update)
}

/// Fold two commands into one.
///
/// The result keeps the earlier command's identity, creation date and
/// name; payload fields of the later command win. The command is built
/// through the factory, so a miss here is a hard error.
pub fn merge(
    factory: &dyn CommandFactory,
    existing: &Command,
    incoming: &Command,
) -> Result<Command, SyncError> {
    let (earlier, later) = if incoming.created_at < existing.created_at {
        (incoming, existing)
    } else {
        (existing, incoming)
    };

    let merged_payload = payload::union(&earlier.payload, &later.payload);

    factory
        .build(
            &earlier.resource_type,
            earlier.name,
            &earlier.resource_id,
            merged_payload,
        )
        .map(|cmd| cmd.with_identity(earlier.id, earlier.created_at))
        .ok_or_else(|| SyncError::FactoryMiss {
            resource_type: earlier.resource_type.clone(),
            command_name: earlier.name,
        })
}
