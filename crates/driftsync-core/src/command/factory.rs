// ── Command factory ──
//
// Used identically for queue rehydration and for algebra-driven
// synthesis (merge, create→update rewrite). A `None` is a factory miss.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Command, CommandExecutor, CommandName, CommandRecord};
use crate::model::{Payload, ResourceId};

/// Builds concrete commands from `(resource_type, name, resource_id, payload)`.
pub trait CommandFactory: Send + Sync {
    fn build(
        &self,
        resource_type: &str,
        name: CommandName,
        resource_id: &ResourceId,
        payload: Payload,
    ) -> Option<Command>;

    /// Rebuild a persisted command, keeping its identity and creation date.
    fn rehydrate(&self, record: CommandRecord) -> Option<Command> {
        self.build(
            &record.resource_type,
            record.command_name,
            &record.resource_id,
            record.payload,
        )
        .map(|cmd| cmd.with_identity(record.command_id, record.command_creation_date))
    }
}

impl<F> CommandFactory for F
where
    F: Fn(&str, CommandName, &ResourceId, Payload) -> Option<Command> + Send + Sync,
{
    fn build(
        &self,
        resource_type: &str,
        name: CommandName,
        resource_id: &ResourceId,
        payload: Payload,
    ) -> Option<Command> {
        self(resource_type, name, resource_id, payload)
    }
}

/// Factory that maps each resource type to one executor.
///
/// Covers the common case where a single executor handles every command
/// name of a type. Unregistered types are factory misses.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn CommandExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(
        mut self,
        resource_type: impl Into<String>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        self.executors.insert(resource_type.into(), executor);
        self
    }
}

impl CommandFactory for ExecutorRegistry {
    fn build(
        &self,
        resource_type: &str,
        name: CommandName,
        resource_id: &ResourceId,
        payload: Payload,
    ) -> Option<Command> {
        let executor = self.executors.get(resource_type)?;
        Some(Command::new(
            resource_type,
            name,
            resource_id.clone(),
            payload,
            Arc::clone(executor),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::CommandId;
    use chrono::{TimeZone, Utc};

    struct Noop;
    impl CommandExecutor for Noop {}

    #[test]
    fn registry_misses_unknown_types() {
        let registry = ExecutorRegistry::new().register("folder", Arc::new(Noop));

        assert!(
            registry
                .build("video", CommandName::Create, &"v-1".into(), Payload::new())
                .is_none()
        );
        assert!(
            registry
                .build("folder", CommandName::Create, &"f-1".into(), Payload::new())
                .is_some()
        );
    }

    #[test]
    fn rehydrate_keeps_identity_and_creation_date() {
        let registry = ExecutorRegistry::new().register("folder", Arc::new(Noop));
        let record = CommandRecord {
            command_id: CommandId::new(),
            resource_type: "folder".into(),
            resource_id: "f-1".into(),
            command_name: CommandName::Update,
            command_creation_date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            payload: Payload::new(),
        };

        let cmd = registry.rehydrate(record.clone()).unwrap();

        assert_eq!(cmd.record(), record);
    }

    #[test]
    fn closures_are_factories() {
        let factory =
            |_: &str, _: CommandName, _: &ResourceId, _: Payload| -> Option<Command> { None };
        assert!(
            factory
                .build("any", CommandName::Read, &"x".into(), Payload::new())
                .is_none()
        );
    }
}
