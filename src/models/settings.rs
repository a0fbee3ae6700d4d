use serde::{Deserialize, Serialize};

/// Per-user assistant settings persisted in the journal database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantSettings {
    pub id: i32,
    pub simplified_mode: bool,
    pub simplified_forced_at: Option<i64>, // Set when the builder forced the mode on
    pub updated_at: i64,
}
