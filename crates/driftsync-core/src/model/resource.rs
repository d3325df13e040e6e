// ── Resource ──
//
// A typed, identified blob of application data plus the watermark of
// its last modification. Pure data: the store owns every mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ResourceId;
use super::payload::Payload;

/// One locally cached copy of a remote-owned record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,
    pub resource_id: ResourceId,
    #[serde(default)]
    pub data: Payload,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn new(
        resource_type: impl Into<String>,
        resource_id: impl Into<ResourceId>,
        data: Payload,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            data,
            updated_at,
        }
    }
}
