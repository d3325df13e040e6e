// ── Data model ──
//
// Identity types, the Resource record, and payload helpers shared by
// commands, the store, and the sync queue.

pub mod ids;
pub mod payload;
pub mod resource;

// ── Re-exports ──────────────────────────────────────────────────────

pub use ids::{CommandId, ResourceId};
pub use payload::Payload;
pub use resource::Resource;
