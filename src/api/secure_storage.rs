use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::password_hash::rand_core::RngCore;
use argon2::Argon2;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::credentials::{validate_credential, CredentialStore, MIN_CREDENTIAL_LEN};
use super::error::AssistantError;

const ENCRYPTION_VERSION: u8 = 1;
const STORE_FILE: &str = "assistant-credentials.enc";
const API_KEY_ENTRY: &str = "openai-api-key";

#[derive(Serialize, Deserialize, Clone)]
struct EncryptedCredential {
    nonce: String,      // Base64 encoded nonce
    ciphertext: String, // Base64 encoded encrypted data
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u8,
    salt: String, // Base64 encoded salt for key derivation
    credentials: HashMap<String, EncryptedCredential>,
}

/// API key encrypted with AES-256-GCM in a JSON file under the app data
/// directory. The key is derived with Argon2id from a machine identifier
/// and a salt persisted alongside the ciphertext.
pub struct EncryptedFileCredentialStore {
    store_path: PathBuf,
    master_key: Vec<u8>,
}

impl EncryptedFileCredentialStore {
    pub fn new(app_data_dir: &Path) -> Result<Self, AssistantError> {
        Self::with_machine_id(app_data_dir, &Self::get_machine_id())
    }

    pub fn with_machine_id(app_data_dir: &Path, machine_id: &str) -> Result<Self, AssistantError> {
        let store_path = app_data_dir.join(STORE_FILE);

        let store = Self::load_or_create_store(&store_path)?;
        if !store_path.exists() {
            // Persist the fresh salt so the derived key survives restarts
            Self::write_store(&store_path, &store)?;
        }

        let master_key = Self::derive_key(machine_id, &store.salt)?;

        Ok(Self {
            store_path,
            master_key,
        })
    }

    fn load_or_create_store(store_path: &Path) -> Result<StoreFile, AssistantError> {
        if store_path.exists() {
            let data = fs::read(store_path).map_err(|e| {
                AssistantError::CredentialStorage(format!("Failed to read store: {}", e))
            })?;

            serde_json::from_slice(&data).map_err(|e| {
                AssistantError::CredentialStorage(format!("Failed to parse store: {}", e))
            })
        } else {
            let mut salt_bytes = vec![0u8; 16];
            OsRng.fill_bytes(&mut salt_bytes);

            Ok(StoreFile {
                version: ENCRYPTION_VERSION,
                salt: BASE64.encode(&salt_bytes),
                credentials: HashMap::new(),
            })
        }
    }

    /// Machine-specific identifier for key derivation
    fn get_machine_id() -> String {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());

        let username = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown-user".to_string());

        format!("trading-journal-{}-{}", hostname, username)
    }

    fn derive_key(machine_id: &str, salt_b64: &str) -> Result<Vec<u8>, AssistantError> {
        use argon2::{Algorithm, Params, Version};

        let salt_bytes = BASE64
            .decode(salt_b64)
            .map_err(|e| AssistantError::CredentialStorage(format!("Invalid salt: {}", e)))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, Params::default());

        let mut output_key = [0u8; 32]; // 32 bytes for AES-256
        argon2
            .hash_password_into(machine_id.as_bytes(), &salt_bytes, &mut output_key)
            .map_err(|e| AssistantError::CredentialStorage(format!("Key derivation failed: {}", e)))?;

        Ok(output_key.to_vec())
    }

    fn cipher(&self) -> Result<Aes256Gcm, AssistantError> {
        Aes256Gcm::new_from_slice(&self.master_key)
            .map_err(|e| AssistantError::CredentialStorage(format!("Failed to create cipher: {}", e)))
    }

    fn write_store(store_path: &Path, store: &StoreFile) -> Result<(), AssistantError> {
        let data = serde_json::to_vec_pretty(store).map_err(|e| {
            AssistantError::CredentialStorage(format!("Failed to serialize store: {}", e))
        })?;

        if let Some(parent) = store_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AssistantError::CredentialStorage(format!("Failed to create directory: {}", e))
            })?;
        }

        fs::write(store_path, data)
            .map_err(|e| AssistantError::CredentialStorage(format!("Failed to write store: {}", e)))
    }

    fn encrypt(&self, value: &str) -> Result<EncryptedCredential, AssistantError> {
        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.cipher()?.encrypt(nonce, value.as_bytes())?;

        Ok(EncryptedCredential {
            nonce: BASE64.encode(nonce_bytes),
            ciphertext: BASE64.encode(&ciphertext),
        })
    }

    fn decrypt(&self, encrypted: &EncryptedCredential) -> Result<String, AssistantError> {
        let nonce_bytes = BASE64
            .decode(&encrypted.nonce)
            .map_err(|e| AssistantError::CredentialStorage(format!("Invalid nonce: {}", e)))?;
        if nonce_bytes.len() != 12 {
            return Err(AssistantError::CredentialStorage("Invalid nonce length".to_string()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&encrypted.ciphertext)
            .map_err(|e| AssistantError::CredentialStorage(format!("Invalid ciphertext: {}", e)))?;

        let plaintext = self.cipher()?.decrypt(nonce, ciphertext.as_ref())?;

        String::from_utf8(plaintext)
            .map_err(|e| AssistantError::CredentialStorage(format!("Invalid UTF-8: {}", e)))
    }
}

impl CredentialStore for EncryptedFileCredentialStore {
    fn get_credential(&self) -> Result<Option<String>, AssistantError> {
        let store = Self::load_or_create_store(&self.store_path)?;
        store
            .credentials
            .get(API_KEY_ENTRY)
            .map(|encrypted| self.decrypt(encrypted))
            .transpose()
    }

    fn set_credential(&self, value: &str) -> Result<bool, AssistantError> {
        let Some(key) = validate_credential(value) else {
            log::warn!("Rejected API key shorter than {} characters", MIN_CREDENTIAL_LEN);
            return Ok(false);
        };

        let encrypted = self.encrypt(key)?;
        let mut store = Self::load_or_create_store(&self.store_path)?;
        store.credentials.insert(API_KEY_ENTRY.to_string(), encrypted);
        Self::write_store(&self.store_path, &store)?;

        log::info!("AI assistant API key stored and encrypted");
        Ok(true)
    }

    fn clear_credential(&self) -> Result<(), AssistantError> {
        let mut store = Self::load_or_create_store(&self.store_path)?;
        if store.credentials.remove(API_KEY_ENTRY).is_some() {
            Self::write_store(&self.store_path, &store)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "sk-test-0123456789abcdefghij";

    fn storage(dir: &Path) -> EncryptedFileCredentialStore {
        EncryptedFileCredentialStore::with_machine_id(dir, "test-machine").unwrap()
    }

    #[test]
    fn test_store_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());

        assert_eq!(store.get_credential().unwrap(), None);
        assert!(store.set_credential(KEY).unwrap());
        assert_eq!(store.get_credential().unwrap().as_deref(), Some(KEY));
    }

    #[test]
    fn test_ciphertext_does_not_contain_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        store.set_credential(KEY).unwrap();

        let raw = fs::read_to_string(dir.path().join(STORE_FILE)).unwrap();
        assert!(!raw.contains(KEY));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        storage(dir.path()).set_credential(KEY).unwrap();

        let reopened = storage(dir.path());
        assert_eq!(reopened.get_credential().unwrap().as_deref(), Some(KEY));
    }

    #[test]
    fn test_other_machine_cannot_decrypt() {
        let dir = tempfile::tempdir().unwrap();
        storage(dir.path()).set_credential(KEY).unwrap();

        let elsewhere =
            EncryptedFileCredentialStore::with_machine_id(dir.path(), "other-machine").unwrap();
        assert!(matches!(
            elsewhere.get_credential(),
            Err(AssistantError::CredentialStorage(_))
        ));
    }

    #[test]
    fn test_short_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());

        assert!(!store.set_credential("sk-short").unwrap());
        assert_eq!(store.get_credential().unwrap(), None);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path());
        store.set_credential(KEY).unwrap();

        store.clear_credential().unwrap();
        assert_eq!(store.get_credential().unwrap(), None);
        store.clear_credential().unwrap();
    }
}
