// ── Sync queue ──
//
// Pending, in-progress and failed writes plus the global watermark and
// the ids whose local delete is not yet confirmed. A command id lives in
// exactly one collection at a time. `pending` stays sorted by creation
// date; in-progress commands are persisted as pending so a crash never
// loses them.

mod state;

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

pub use state::{StateDocument, StateStore};

use crate::command::algebra;
use crate::command::{Command, CommandFactory, CommandName, CommandRecord};
use crate::error::SyncError;
use crate::model::{CommandId, ResourceId};

/// What happened to a write entering the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    /// Annihilated a pending Create; nothing remains for the resource.
    Cancelled,
    /// Folded into the pending command with this id.
    Merged(CommandId),
    /// Added as a new pending command.
    Appended,
}

/// Result of moving failed commands back into the queue at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requeue {
    pub requeued: usize,
    pub dropped: usize,
}

enum Step {
    Cancel(usize),
    Merge(usize, Command),
    Append,
}

#[derive(Debug, Default)]
pub struct SyncQueue {
    pending: Vec<Command>,
    in_progress: Vec<Command>,
    errors: Vec<Command>,
    sync_date: Option<DateTime<Utc>>,
    deleted_ids: BTreeSet<ResourceId>,
    completed: u64,
}

impl SyncQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consolidate a write against the pending commands of its resource.
    ///
    /// Only the newest pending command for the resource is considered, so
    /// an Update never jumps ahead of a queued Delete. On error the queue
    /// is left untouched.
    pub fn enqueue(
        &mut self,
        factory: &dyn CommandFactory,
        command: Command,
    ) -> Result<Consolidation, SyncError> {
        match self.plan(factory, &command)? {
            Step::Cancel(pos) => {
                let cancelled = self.pending.remove(pos);
                debug!(
                    resource_id = %cancelled.resource_id,
                    command_id = %cancelled.id,
                    "delete cancelled pending create"
                );
                Ok(Consolidation::Cancelled)
            }
            Step::Merge(pos, merged) => {
                let id = merged.id;
                self.pending[pos] = merged;
                self.sort();
                debug!(resource_id = %command.resource_id, command_id = %id, "merged update");
                Ok(Consolidation::Merged(id))
            }
            Step::Append => {
                if command.name == CommandName::Delete {
                    self.deleted_ids.insert(command.resource_id.clone());
                }
                self.pending.push(command);
                self.sort();
                Ok(Consolidation::Appended)
            }
        }
    }

    /// Fail exactly when [`enqueue`](Self::enqueue) would, without
    /// changing the queue.
    pub fn check(&self, factory: &dyn CommandFactory, command: &Command) -> Result<(), SyncError> {
        self.plan(factory, command).map(|_| ())
    }

    /// Move up to `max_concurrent - |in_progress|` eligible commands into
    /// `in_progress` and return them, oldest first.
    ///
    /// A command is eligible once it is at least `min_age` old and no
    /// other command for its resource is in flight or ahead of it.
    pub fn take_dispatchable(
        &mut self,
        max_concurrent: usize,
        min_age: Duration,
        now: DateTime<Utc>,
    ) -> Vec<Command> {
        let slots = max_concurrent.saturating_sub(self.in_progress.len());
        let cutoff = now
            .checked_sub_signed(min_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut blocked: HashSet<ResourceId> = self
            .in_progress
            .iter()
            .map(|cmd| cmd.resource_id.clone())
            .collect();

        let mut taken = Vec::new();
        let mut index = 0;
        while index < self.pending.len() && taken.len() < slots {
            let candidate = &self.pending[index];
            let eligible = candidate.created_at <= cutoff
                && !blocked.contains(&candidate.resource_id)
                && !self.in_progress.iter().any(|cmd| cmd.id == candidate.id);
            blocked.insert(candidate.resource_id.clone());
            if eligible {
                taken.push(self.pending.remove(index));
            } else {
                index += 1;
            }
        }

        self.in_progress.extend(taken.iter().cloned());
        taken
    }

    /// Settle an in-flight command as confirmed at `sync_date`.
    pub fn confirm(&mut self, command_id: CommandId, sync_date: DateTime<Utc>) -> Option<Command> {
        let command = self.remove_active(command_id)?;
        self.advance_sync_date(sync_date);
        if command.name == CommandName::Delete {
            self.deleted_ids.remove(&command.resource_id);
        }
        self.completed += 1;
        Some(command)
    }

    /// Settle an in-flight command as failed, parking it in the error queue.
    pub fn fail(&mut self, command_id: CommandId) -> Option<Command> {
        let command = self.remove_active(command_id)?;
        self.errors.push(command.clone());
        Some(command)
    }

    /// Move the watermark forward; it never moves back.
    pub fn advance_sync_date(&mut self, sync_date: DateTime<Utc>) {
        if self.sync_date.is_none_or(|current| sync_date > current) {
            self.sync_date = Some(sync_date);
        }
    }

    /// Return failed commands newer than the watermark to the queue.
    /// Older ones are already reflected remotely and are dropped.
    pub fn requeue_errors(&mut self) -> Requeue {
        let mut outcome = Requeue::default();
        for command in std::mem::take(&mut self.errors) {
            let obsolete = self
                .sync_date
                .is_some_and(|watermark| command.created_at <= watermark);
            if obsolete {
                debug!(command_id = %command.id, "dropping failed command older than watermark");
                outcome.dropped += 1;
            } else {
                self.pending.push(command);
                outcome.requeued += 1;
            }
        }
        self.sort();
        outcome
    }

    /// Keep only deleted ids that still have a Delete waiting.
    pub fn prune_deleted_ids(&mut self) {
        let waiting: HashSet<&ResourceId> = self
            .pending
            .iter()
            .chain(&self.in_progress)
            .chain(&self.errors)
            .filter(|cmd| cmd.name == CommandName::Delete)
            .map(|cmd| &cmd.resource_id)
            .collect();
        self.deleted_ids.retain(|id| waiting.contains(id));
    }

    pub fn snapshot(&self) -> StateDocument {
        let mut queue: Vec<&Command> = self.in_progress.iter().chain(&self.pending).collect();
        queue.sort_by_key(|cmd| cmd.created_at);
        StateDocument {
            queue: queue.into_iter().map(Command::record).collect(),
            error_queue: self.errors.iter().map(Command::record).collect(),
            sync_date: self.sync_date,
            deleted_ids: self.deleted_ids.iter().cloned().collect(),
        }
    }

    /// Replace the queue with a persisted snapshot, rehydrating every
    /// command through the factory. Returns how many were dropped.
    pub fn restore(&mut self, factory: &dyn CommandFactory, doc: StateDocument) -> usize {
        let mut dropped = 0;
        let mut rehydrate = |records: Vec<CommandRecord>| -> Vec<Command> {
            records
                .into_iter()
                .filter_map(|record| {
                    let resource_type = record.resource_type.clone();
                    let name = record.command_name;
                    let command = factory.rehydrate(record);
                    if command.is_none() {
                        warn!(%resource_type, command_name = %name, "factory miss while loading queue");
                        dropped += 1;
                    }
                    command
                })
                .collect()
        };
        self.pending = rehydrate(doc.queue);
        self.errors = rehydrate(doc.error_queue);
        self.in_progress.clear();
        self.sync_date = doc.sync_date;
        self.deleted_ids = doc.deleted_ids.into_iter().collect();
        self.sort();
        dropped
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn pending(&self) -> &[Command] {
        &self.pending
    }

    pub fn in_progress(&self) -> &[Command] {
        &self.in_progress
    }

    pub fn errors(&self) -> &[Command] {
        &self.errors
    }

    pub fn sync_date(&self) -> Option<DateTime<Utc>> {
        self.sync_date
    }

    pub fn deleted_ids(&self) -> &BTreeSet<ResourceId> {
        &self.deleted_ids
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn plan(&self, factory: &dyn CommandFactory, command: &Command) -> Result<Step, SyncError> {
        let last = self
            .pending
            .iter()
            .rposition(|existing| existing.targets_same_resource(command));
        let Some(pos) = last else {
            return Ok(Step::Append);
        };
        let existing = &self.pending[pos];
        if algebra::can_cancel_out(existing, command) {
            Ok(Step::Cancel(pos))
        } else if algebra::can_merge(existing, command) {
            algebra::merge(factory, existing, command).map(|merged| Step::Merge(pos, merged))
        } else {
            Ok(Step::Append)
        }
    }

    fn sort(&mut self) {
        self.pending.sort_by_key(|cmd| cmd.created_at);
    }

    fn remove_active(&mut self, command_id: CommandId) -> Option<Command> {
        let pos = self.in_progress.iter().position(|cmd| cmd.id == command_id)?;
        let command = self.in_progress.remove(pos);
        self.pending.retain(|cmd| cmd.id != command_id);
        Some(command)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};

    use super::*;
    use crate::command::{CommandExecutor, ExecutorRegistry};

    struct Noop;
    impl CommandExecutor for Noop {}

    fn registry() -> ExecutorRegistry {
        ExecutorRegistry::new().register("folder", Arc::new(Noop))
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn cmd(name: CommandName, id: &str, fields: Value, secs: i64) -> Command {
        Command::new(
            "folder",
            name,
            id,
            fields.as_object().cloned().unwrap_or_default(),
            Arc::new(Noop),
        )
        .with_created_at(base() + Duration::seconds(secs))
    }

    #[test]
    fn create_then_delete_leaves_nothing() {
        let mut queue = SyncQueue::new();
        let factory = registry();

        queue
            .enqueue(&factory, cmd(CommandName::Create, "a", json!({ "n": 1 }), 0))
            .unwrap();
        let outcome = queue
            .enqueue(&factory, cmd(CommandName::Delete, "a", json!({}), 1))
            .unwrap();

        assert_eq!(outcome, Consolidation::Cancelled);
        assert!(queue.pending().is_empty());
        assert!(queue.deleted_ids().is_empty());
    }

    #[test]
    fn update_merges_into_create_keeping_its_date() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        let create = cmd(CommandName::Create, "a", json!({ "n": 1, "c": "red" }), 0);
        let create_id = create.id;

        queue.enqueue(&factory, create).unwrap();
        let outcome = queue
            .enqueue(&factory, cmd(CommandName::Update, "a", json!({ "n": 2 }), 3))
            .unwrap();

        assert_eq!(outcome, Consolidation::Merged(create_id));
        assert_eq!(queue.pending().len(), 1);
        let merged = &queue.pending()[0];
        assert_eq!(merged.id, create_id);
        assert_eq!(merged.created_at, base());
        assert_eq!(Value::Object(merged.payload.clone()), json!({ "n": 2, "c": "red" }));
    }

    #[test]
    fn failed_merge_leaves_queue_untouched() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        let create = cmd(CommandName::Create, "a", json!({ "n": 1 }), 0);
        let update = cmd(CommandName::Update, "a", json!({ "n": 2 }), 1);
        queue.enqueue(&factory, create).unwrap();

        let empty = ExecutorRegistry::new();
        assert!(matches!(
            queue.check(&empty, &update),
            Err(SyncError::FactoryMiss { .. })
        ));
        assert!(matches!(
            queue.enqueue(&empty, update),
            Err(SyncError::FactoryMiss { .. })
        ));

        assert_eq!(queue.pending().len(), 1);
        assert_eq!(Value::Object(queue.pending()[0].payload.clone()), json!({ "n": 1 }));
    }

    #[test]
    fn update_after_queued_delete_is_appended() {
        let mut queue = SyncQueue::new();
        let factory = registry();

        queue
            .enqueue(&factory, cmd(CommandName::Update, "a", json!({ "n": 1 }), 0))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Delete, "a", json!({}), 1))
            .unwrap();
        let outcome = queue
            .enqueue(&factory, cmd(CommandName::Update, "a", json!({ "n": 2 }), 2))
            .unwrap();

        assert_eq!(outcome, Consolidation::Appended);
        let names: Vec<_> = queue.pending().iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![CommandName::Update, CommandName::Delete, CommandName::Update]
        );
        assert!(queue.deleted_ids().contains(&ResourceId::from("a")));
    }

    #[test]
    fn pending_stays_sorted_by_creation_date() {
        let mut queue = SyncQueue::new();
        let factory = registry();

        queue
            .enqueue(&factory, cmd(CommandName::Create, "b", json!({}), 5))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Create, "a", json!({}), 1))
            .unwrap();

        let ids: Vec<_> = queue.pending().iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn dispatch_respects_slots_age_and_resource_exclusivity() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        for (name, id, secs) in [
            (CommandName::Create, "a", 0),
            (CommandName::Update, "b", 1),
            (CommandName::Create, "c", 2),
            (CommandName::Create, "d", 30),
        ] {
            queue.enqueue(&factory, cmd(name, id, json!({}), secs)).unwrap();
        }
        queue
            .enqueue(&factory, cmd(CommandName::Delete, "b", json!({}), 3))
            .unwrap();

        let now = base() + Duration::seconds(20);
        let first = queue.take_dispatchable(2, Duration::seconds(5), now);
        let ids: Vec<_> = first.iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let second = queue.take_dispatchable(3, Duration::seconds(5), now);
        let ids: Vec<_> = second.iter().map(|c| c.resource_id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        assert_eq!(queue.in_progress().len(), 3);
        assert_eq!(queue.pending().len(), 2);

        // the Delete for "b" waits behind its in-flight Update, "d" is too young
        assert!(queue.take_dispatchable(10, Duration::seconds(5), now).is_empty());
    }

    #[test]
    fn confirm_and_fail_settle_in_flight_commands() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        queue
            .enqueue(&factory, cmd(CommandName::Update, "a", json!({ "x": 1 }), 0))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Delete, "b", json!({}), 0))
            .unwrap();
        let taken = queue.take_dispatchable(5, Duration::zero(), base());
        assert_eq!(taken.len(), 2);

        let later = base() + Duration::hours(1);
        let earlier = base() + Duration::minutes(1);
        queue.confirm(taken[1].id, later).unwrap();
        queue.fail(taken[0].id).unwrap();
        queue.advance_sync_date(earlier);

        assert_eq!(queue.sync_date(), Some(later));
        assert!(queue.deleted_ids().is_empty());
        assert_eq!(queue.errors().len(), 1);
        assert_eq!(queue.completed(), 1);
        assert!(queue.is_idle());
        assert!(queue.confirm(taken[0].id, later).is_none());
    }

    #[test]
    fn requeue_drops_errors_older_than_watermark() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        queue
            .enqueue(&factory, cmd(CommandName::Update, "old", json!({ "x": 1 }), 0))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Update, "new", json!({ "x": 1 }), 20))
            .unwrap();
        let taken = queue.take_dispatchable(5, Duration::zero(), base() + Duration::seconds(30));
        for command in &taken {
            queue.fail(command.id);
        }
        queue.advance_sync_date(base() + Duration::seconds(10));

        let outcome = queue.requeue_errors();

        assert_eq!(outcome, Requeue { requeued: 1, dropped: 1 });
        assert_eq!(queue.pending()[0].resource_id.as_str(), "new");
        assert!(queue.errors().is_empty());
    }

    #[test]
    fn snapshot_round_trips_through_factory() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        queue
            .enqueue(&factory, cmd(CommandName::Create, "a", json!({ "n": 1 }), 0))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Update, "b", json!({ "n": 2 }), 1))
            .unwrap();
        queue
            .enqueue(&factory, cmd(CommandName::Delete, "c", json!({}), 2))
            .unwrap();
        queue.take_dispatchable(1, Duration::zero(), base() + Duration::seconds(5));
        queue.advance_sync_date(base());

        let doc = queue.snapshot();
        let raw = serde_json::to_string(&doc).unwrap();
        let (parsed, skipped) = StateDocument::parse(&raw).unwrap();
        let mut restored = SyncQueue::new();
        let dropped = restored.restore(&factory, parsed);

        assert_eq!((skipped, dropped), (0, 0));
        assert_eq!(restored.snapshot(), doc);
        assert_eq!(restored.pending().len(), 3);
        assert!(restored.in_progress().is_empty());
    }

    #[test]
    fn restore_drops_factory_misses() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        queue
            .enqueue(&factory, cmd(CommandName::Create, "a", json!({}), 0))
            .unwrap();
        let doc = queue.snapshot();

        let mut restored = SyncQueue::new();
        let dropped = restored.restore(&ExecutorRegistry::new(), doc);

        assert_eq!(dropped, 1);
        assert!(restored.pending().is_empty());
    }

    #[test]
    fn prune_keeps_ids_with_waiting_deletes() {
        let mut queue = SyncQueue::new();
        let factory = registry();
        queue
            .enqueue(&factory, cmd(CommandName::Delete, "a", json!({}), 0))
            .unwrap();
        let mut doc = queue.snapshot();
        doc.deleted_ids.push("stale".into());
        queue.restore(&factory, doc);

        queue.prune_deleted_ids();

        let ids: Vec<_> = queue.deleted_ids().iter().map(ResourceId::as_str).collect();
        assert_eq!(ids, vec!["a"]);
    }
}
