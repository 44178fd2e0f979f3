//! Audit activity records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One audit trail entry ("job X is running", "job X finished").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub actor: String,
    pub object_id: Uuid,
    pub description: String,
    pub created: chrono::DateTime<chrono::Utc>,
}

impl Activity {
    pub fn new(actor: impl Into<String>, object_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor: actor.into(),
            object_id,
            description: description.into(),
            created: chrono::Utc::now(),
        }
    }
}
