use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use billforge_core::{ObjectType, TagDefinition};

/// A tag definition attached to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub object_id: Uuid,
    pub object_type: ObjectType,
    pub definition: TagDefinition,
    pub created_at: DateTime<Utc>,
}

impl Tag {
    pub fn new(
        object_id: Uuid,
        object_type: ObjectType,
        definition: TagDefinition,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            object_id,
            object_type,
            definition,
            created_at,
        }
    }

    pub fn is_control_tag(&self) -> bool {
        self.definition.is_control_tag
    }
}
