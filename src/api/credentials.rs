use keyring::Entry;

use super::error::AssistantError;

const SERVICE_NAME: &str = "trading-journal-macos";
const ACCOUNT_NAME: &str = "ai-assistant-api-key";

/// Shortest string accepted as a provider API key
pub const MIN_CREDENTIAL_LEN: usize = 20;

/// Where the model provider API key lives.
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when no key has been saved.
    fn get_credential(&self) -> Result<Option<String>, AssistantError>;

    /// Save `value`. Returns false without touching the store when the
    /// value cannot be an API key.
    fn set_credential(&self, value: &str) -> Result<bool, AssistantError>;

    fn clear_credential(&self) -> Result<(), AssistantError>;
}

/// Trimmed key, or None when it is too short to be real.
pub fn validate_credential(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    (trimmed.chars().count() >= MIN_CREDENTIAL_LEN).then_some(trimmed)
}

/// API key in the system keychain
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service
pub struct KeyringCredentialStore {
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_account(ACCOUNT_NAME)
    }

    pub fn with_account(account: &str) -> Self {
        Self {
            account: account.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry, AssistantError> {
        Entry::new(SERVICE_NAME, &self.account).map_err(|e| {
            AssistantError::CredentialStorage(format!("Failed to create keyring entry: {}", e))
        })
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn get_credential(&self) -> Result<Option<String>, AssistantError> {
        match self.entry()?.get_password() {
            Ok(key) => Ok(Some(key)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(AssistantError::CredentialStorage(format!(
                "Failed to retrieve API key: {}",
                e
            ))),
        }
    }

    fn set_credential(&self, value: &str) -> Result<bool, AssistantError> {
        let Some(key) = validate_credential(value) else {
            log::warn!("Rejected API key shorter than {} characters", MIN_CREDENTIAL_LEN);
            return Ok(false);
        };

        self.entry()?.set_password(key).map_err(|e| {
            AssistantError::CredentialStorage(format!("Failed to store API key: {}", e))
        })?;

        log::info!("AI assistant API key saved to keychain");
        Ok(true)
    }

    fn clear_credential(&self) -> Result<(), AssistantError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AssistantError::CredentialStorage(format!(
                "Failed to delete API key: {}",
                e
            ))),
        }
    }
}
