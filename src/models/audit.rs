use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entry in the audit trail. Emission is fire-and-forget: a failed
/// write is logged, never surfaced to the operation that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub actor: String,
    pub details: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            entity: entity.into(),
            entity_id: entity_id.into(),
            actor: actor.into(),
            details,
            occurred_at: Utc::now(),
        }
    }
}
