pub mod ai_chat;
pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod sync;

#[cfg(test)]
mod test_support;

use std::path::Path;
use std::sync::Arc;

use tokio::sync::broadcast;

use ai_chat::{ChatService, DataMutation};
use api::{
    AssistantError, CredentialStore, EncryptedFileCredentialStore, KeyringCredentialStore,
    ModelProvider, OpenAiCompatClient,
};
use config::{AssistantConfig, CredentialBackend};
use db::{Database, SqlitePreferenceStore, SqliteTradeStore};
use sync::MutationListener;

pub const DATABASE_FILE: &str = "trading_journal.db";

const EXTERNAL_MUTATION_CAPACITY: usize = 64;

/// The journal database and the assistant wired together.
pub struct Assistant {
    pub service: Arc<ChatService>,
    pub trades: Arc<SqliteTradeStore>,
    pub listener: MutationListener,
    external_mutations: broadcast::Sender<DataMutation>,
}

impl Assistant {
    /// Open (or create) the journal in `app_dir` and wire the assistant
    /// with the configured credential store and the HTTP model client.
    pub async fn open(app_dir: &Path, config: AssistantConfig) -> Result<Self, AssistantError> {
        let credentials: Arc<dyn CredentialStore> = match config.credential_backend {
            CredentialBackend::Keychain => Arc::new(KeyringCredentialStore::new()),
            CredentialBackend::EncryptedFile => Arc::new(EncryptedFileCredentialStore::new(app_dir)?),
        };
        let model = Arc::new(OpenAiCompatClient::new(&config.provider));

        Self::open_with(app_dir, config, credentials, model).await
    }

    pub async fn open_with(
        app_dir: &Path,
        config: AssistantConfig,
        credentials: Arc<dyn CredentialStore>,
        model: Arc<dyn ModelProvider>,
    ) -> Result<Self, AssistantError> {
        std::fs::create_dir_all(app_dir).map_err(|e| {
            AssistantError::StorageUnavailable(format!("Failed to create app data directory: {}", e))
        })?;

        let db_path = app_dir.join(DATABASE_FILE);
        log::info!("Database path: {:?}", db_path);

        let database = Database::new(&db_path.to_string_lossy()).map_err(|e| {
            log::error!("❌ Database initialization failed: {}", e);
            log::error!("This might be due to a failed migration or database corruption.");
            log::error!("Your database backups are located at: {:?}", app_dir.join("backups"));
            AssistantError::from(e)
        })?;
        let database = Arc::new(database);

        let trades = Arc::new(SqliteTradeStore::new(Arc::clone(&database)));
        let preferences = Arc::new(SqlitePreferenceStore::new(database));

        let service = Arc::new(ChatService::new(
            &config,
            trades.clone(),
            preferences,
            credentials,
            model,
        ));

        // Writes through `trades` invalidate synchronously. The listener
        // only hears writers outside this process handle.
        trades.add_observer(service.mutation_observer());
        let (external_mutations, events) = broadcast::channel(EXTERNAL_MUTATION_CAPACITY);
        let listener = MutationListener::new(service.cache());
        listener.listen(events).await;

        Ok(Self {
            service,
            trades,
            listener,
            external_mutations,
        })
    }

    /// Sender for journal writes that bypass `trades`, such as an import
    /// running on another connection.
    pub fn external_mutations(&self) -> broadcast::Sender<DataMutation> {
        self.external_mutations.clone()
    }

    pub async fn shutdown(&self) {
        self.listener.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_logging, trade_input, FakeModel, MemoryCredentialStore, TEST_API_KEY};

    async fn open(dir: &Path, model: Arc<FakeModel>) -> Assistant {
        Assistant::open_with(
            dir,
            AssistantConfig::default(),
            Arc::new(MemoryCredentialStore::with_key(TEST_API_KEY)),
            model,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_end_to_end_chat_sees_new_trades() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let model = Arc::new(FakeModel::replying("Here is your summary."));
        let assistant = open(dir.path(), model.clone()).await;

        let reply = assistant.service.chat("How did I do?").await;
        assert!(reply.text.contains("Add a few trades"));

        for (i, pnl) in [100.0, -50.0, 25.0].iter().enumerate() {
            assistant.trades.create_trade(trade_input(i as i64, *pnl)).unwrap();
        }

        let reply = assistant.service.chat("How did I do?").await;
        assert_eq!(reply.text, "Here is your summary.");
        let request = model.last_request().unwrap();
        assert!(request.system.contains("Account statistics (all 3 trades)"));
        assert!(request.system.contains("Win rate: 66.67%"));

        assistant.shutdown().await;
        assert!(dir.path().join(DATABASE_FILE).exists());
    }

    #[tokio::test]
    async fn test_store_write_invalidates_once() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = open(dir.path(), Arc::new(FakeModel::replying("ok"))).await;
        let cache = assistant.service.cache();

        let before = cache.epoch();
        assistant.trades.create_trade(trade_input(0, 10.0)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(cache.epoch(), before + 1);

        assistant.shutdown().await;
    }

    #[tokio::test]
    async fn test_external_mutation_reaches_cache() {
        let dir = tempfile::tempdir().unwrap();
        let assistant = open(dir.path(), Arc::new(FakeModel::replying("ok"))).await;
        let cache = assistant.service.cache();

        let before = cache.epoch();
        assistant
            .external_mutations()
            .send(DataMutation::TradeDeleted("TRADE-external".to_string()))
            .unwrap();
        for _ in 0..50 {
            if cache.epoch() > before {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(cache.epoch(), before + 1);

        assistant.shutdown().await;
    }

    #[tokio::test]
    async fn test_simplified_mode_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let assistant = open(dir.path(), Arc::new(FakeModel::replying("ok"))).await;
            assistant.service.set_simplified_mode(true).unwrap();
            assistant.shutdown().await;
        }

        let assistant = open(dir.path(), Arc::new(FakeModel::replying("ok"))).await;
        assert!(assistant.service.simplified_mode().unwrap());
        assistant.shutdown().await;
    }
}
