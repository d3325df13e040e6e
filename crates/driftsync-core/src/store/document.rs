// ── Data document ──
//
// In-memory and persisted layout of the resource cache:
// resourceType → resourceId → Resource.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{Resource, ResourceId, payload};

/// The whole local cache, serialized as one JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataDocument {
    types: BTreeMap<String, BTreeMap<ResourceId, Resource>>,
}

impl DataDocument {
    /// Merge resources in, returning the set of touched types.
    ///
    /// An existing entry keeps fields the incoming data does not mention;
    /// its watermark becomes the incoming one.
    pub fn merge(&mut self, resources: Vec<Resource>) -> BTreeSet<String> {
        let mut touched = BTreeSet::new();
        for resource in resources {
            touched.insert(resource.resource_type.clone());
            let bucket = self.types.entry(resource.resource_type.clone()).or_default();
            match bucket.get_mut(&resource.resource_id) {
                Some(existing) => {
                    existing.data = payload::union(&existing.data, &resource.data);
                    existing.updated_at = resource.updated_at;
                }
                None => {
                    bucket.insert(resource.resource_id.clone(), resource);
                }
            }
        }
        touched
    }

    pub fn remove(&mut self, resource_type: &str, resource_id: &ResourceId) -> Option<Resource> {
        let bucket = self.types.get_mut(resource_type)?;
        let removed = bucket.remove(resource_id);
        if bucket.is_empty() {
            self.types.remove(resource_type);
        }
        removed
    }

    pub fn get(&self, resource_type: &str, resource_id: &ResourceId) -> Option<&Resource> {
        self.types.get(resource_type)?.get(resource_id)
    }

    /// Every resource of a type, ordered by id.
    pub fn all(&self, resource_type: &str) -> Vec<Resource> {
        self.types
            .get(resource_type)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
