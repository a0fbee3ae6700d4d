use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::ai_chat::storage::PreferenceStore;
use crate::api::AssistantError;
use crate::db::Database;
use crate::models::AssistantSettings;

/// Simplified-mode preference stored in the `assistant_settings` row.
pub struct SqlitePreferenceStore {
    db: Arc<Database>,
}

impl SqlitePreferenceStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn settings(&self) -> Result<Option<AssistantSettings>, AssistantError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| AssistantError::StorageUnavailable(e.to_string()))?;

        let settings = conn
            .query_row(
                "SELECT id, simplified_mode, simplified_forced_at, updated_at FROM assistant_settings WHERE id = 1",
                [],
                |row| {
                    Ok(AssistantSettings {
                        id: row.get(0)?,
                        simplified_mode: row.get::<_, i32>(1)? == 1,
                        simplified_forced_at: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        Ok(settings)
    }
}

impl PreferenceStore for SqlitePreferenceStore {
    fn simplified_mode(&self) -> Result<bool, AssistantError> {
        Ok(self.settings()?.is_some_and(|s| s.simplified_mode))
    }

    fn set_simplified_mode(&self, enabled: bool, forced: bool) -> Result<(), AssistantError> {
        let conn = self
            .db
            .conn
            .lock()
            .map_err(|e| AssistantError::StorageUnavailable(e.to_string()))?;

        let now = Utc::now().timestamp();
        let forced_at = (enabled && forced).then_some(now);

        conn.execute(
            "INSERT INTO assistant_settings (id, simplified_mode, simplified_forced_at, updated_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                simplified_mode = excluded.simplified_mode,
                simplified_forced_at = excluded.simplified_forced_at,
                updated_at = excluded.updated_at",
            params![enabled as i32, forced_at, now],
        )?;

        log::info!("Simplified mode set to {} (forced: {})", enabled, forced);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqlitePreferenceStore {
        SqlitePreferenceStore::new(Arc::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn test_defaults_to_normal_mode() {
        let prefs = store();
        assert!(!prefs.simplified_mode().unwrap());
        let settings = prefs.settings().unwrap().unwrap();
        assert_eq!(settings.id, 1);
        assert!(settings.simplified_forced_at.is_none());
    }

    #[test]
    fn test_forced_switch_is_recorded() {
        let prefs = store();
        prefs.set_simplified_mode(true, true).unwrap();

        let settings = prefs.settings().unwrap().unwrap();
        assert!(settings.simplified_mode);
        assert!(settings.simplified_forced_at.is_some());
    }

    #[test]
    fn test_user_toggle_clears_forced_marker() {
        let prefs = store();
        prefs.set_simplified_mode(true, true).unwrap();
        prefs.set_simplified_mode(false, false).unwrap();

        let settings = prefs.settings().unwrap().unwrap();
        assert!(!settings.simplified_mode);
        assert!(settings.simplified_forced_at.is_none());
    }

    #[test]
    fn test_recreates_missing_row() {
        let prefs = store();
        {
            let conn = prefs.db.conn.lock().unwrap();
            conn.execute("DELETE FROM assistant_settings", []).unwrap();
        }
        assert!(!prefs.simplified_mode().unwrap());

        prefs.set_simplified_mode(true, false).unwrap();
        assert!(prefs.simplified_mode().unwrap());
    }
}
