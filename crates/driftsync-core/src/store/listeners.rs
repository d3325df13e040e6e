// ── Listener registry ──
//
// Per-type callbacks and watch channels. Owned by the engine from
// construction, so listeners and subscriptions may be registered before
// the store itself exists.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use crate::model::Resource;
use crate::stream::{ResourceSnapshot, ResourceStream};

/// Callback invoked with the full current set of one resource type.
pub type ResourceListener = Arc<dyn Fn(&[Resource]) + Send + Sync>;

#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<String, ResourceListener>,
    channels: DashMap<String, watch::Sender<ResourceSnapshot>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listener for a type, replacing any previous one.
    pub fn set_listener(&self, resource_type: impl Into<String>, listener: ResourceListener) {
        self.listeners.insert(resource_type.into(), listener);
    }

    pub fn remove_listener(&self, resource_type: &str) -> bool {
        self.listeners.remove(resource_type).is_some()
    }

    /// Subscribe to a type; a new channel starts from `seed`.
    pub fn subscribe(
        &self,
        resource_type: &str,
        seed: impl FnOnce() -> Vec<Resource>,
    ) -> ResourceStream {
        let receiver = self
            .channels
            .entry(resource_type.to_owned())
            .or_insert_with(|| watch::channel(Arc::new(seed())).0)
            .subscribe();
        ResourceStream::new(receiver)
    }

    pub fn has_channel(&self, resource_type: &str) -> bool {
        self.channels.contains_key(resource_type)
    }

    /// Every type with a listener or a channel.
    pub fn registered_types(&self) -> Vec<String> {
        self.listeners
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.channels.iter().map(|entry| entry.key().clone()))
            .collect()
    }

    /// Hand the current set of a type to its listener and subscribers.
    pub fn publish(&self, resource_type: &str, resources: Vec<Resource>) {
        let listener = self
            .listeners
            .get(resource_type)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(listener) = listener {
            listener(&resources);
        }
        if let Some(sender) = self.channels.get(resource_type) {
            sender.send_replace(Arc::new(resources));
        }
    }
}
