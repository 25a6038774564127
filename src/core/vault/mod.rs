use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use anyhow::Result;
use base64::Engine;
use hmac::Mac;
use sha2::Sha256;
use std::collections::HashMap;

use crate::core::credentials::Platform;
use crate::core::storage::Storage;

type HmacSha256 = hmac::Hmac<Sha256>;

/// Encrypted store for per-user, per-platform credential field maps.
/// Field maps are serialized to JSON, encrypted with AES-256-GCM and kept in
/// the `user_credentials` table; plaintext never touches the database.
#[derive(Clone)]
pub struct CredentialVault {
    storage: Storage,
    cipher: Aes256Gcm,
}

/// Derive a 256-bit encryption key from machine-specific identifiers.
/// Uses HMAC-SHA256(hostname + username, "flowdeck-vault-v1") so the key is
/// stable across restarts but tied to the local machine/user.
fn derive_key() -> [u8; 32] {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let username = whoami::username();
    let input = format!("{}{}", hostname, username);

    let mut mac = <HmacSha256 as Mac>::new_from_slice(b"flowdeck-vault-v1")
        .expect("HMAC can take key of any size");
    mac.update(input.as_bytes());
    let result = mac.finalize();
    let bytes = result.into_bytes();

    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    key
}

impl CredentialVault {
    pub fn new(storage: Storage) -> Self {
        let key = derive_key();
        let cipher = Aes256Gcm::new_from_slice(&key).expect("32-byte key is valid for AES-256");
        Self { storage, cipher }
    }

    /// Encrypt a plaintext value. Returns base64(nonce || ciphertext).
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; 12] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        let mut combined = Vec::with_capacity(12 + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt a base64(nonce || ciphertext) value. Returns plaintext.
    fn decrypt(&self, encoded: &str) -> Result<String> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| anyhow::anyhow!("Base64 decode failed: {}", e))?;

        if combined.len() < 13 {
            return Err(anyhow::anyhow!("Encrypted value too short"));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("Decryption failed: {}", e))?;

        String::from_utf8(plaintext).map_err(|e| anyhow::anyhow!("UTF-8 decode failed: {}", e))
    }

    /// Store the full field set for a platform. A new submission always
    /// replaces the previous record wholesale; there is no partial merge.
    pub async fn store_fields(
        &self,
        user_id: &str,
        platform: Platform,
        fields: &HashMap<String, String>,
    ) -> Result<()> {
        let plaintext = serde_json::to_string(fields)?;
        let ciphertext = self.encrypt(&plaintext)?;
        self.storage
            .put_credential_blob(user_id, platform.id(), &ciphertext)
            .await
    }

    pub async fn load_fields(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<HashMap<String, String>>> {
        match self
            .storage
            .get_credential_blob(user_id, platform.id())
            .await?
        {
            Some(ciphertext) => {
                let plaintext = self.decrypt(&ciphertext)?;
                Ok(Some(serde_json::from_str(&plaintext)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_platforms(&self, user_id: &str) -> Result<Vec<String>> {
        self.storage.list_credential_platforms(user_id).await
    }

    pub async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool> {
        self.storage.delete_credential(user_id, platform.id()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(Storage::open_in_memory().expect("in-memory db"))
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let vault = test_vault();
        let plaintext = r#"{"api_key":"sk-12345"}"#;
        let encrypted = vault.encrypt(plaintext).unwrap();
        assert_ne!(encrypted, plaintext);
        assert_eq!(vault.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn encrypt_produces_different_ciphertext_each_time() {
        let vault = test_vault();
        let a = vault.encrypt("same-input").unwrap();
        let b = vault.encrypt("same-input").unwrap();
        assert_ne!(a, b, "random nonce should produce different ciphertext");
    }

    #[test]
    fn decrypt_rejects_short_input() {
        let vault = test_vault();
        let short = base64::engine::general_purpose::STANDARD.encode(b"short");
        assert!(vault.decrypt(&short).is_err());
    }

    #[test]
    fn decrypt_rejects_invalid_base64() {
        let vault = test_vault();
        assert!(vault.decrypt("not-valid-base64!!!").is_err());
    }

    #[tokio::test]
    async fn store_and_load_field_map() {
        let vault = test_vault();
        let mut fields = HashMap::new();
        fields.insert("client_id".to_string(), "cid-1".to_string());
        fields.insert("client_secret".to_string(), "cs-1".to_string());

        vault
            .store_fields("u1", Platform::TwitterOauth2App, &fields)
            .await
            .unwrap();

        let loaded = vault
            .load_fields("u1", Platform::TwitterOauth2App)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, fields);
    }

    #[tokio::test]
    async fn resubmission_replaces_full_field_set() {
        let vault = test_vault();
        let mut first = HashMap::new();
        first.insert("client_id".to_string(), "old-id".to_string());
        first.insert("client_secret".to_string(), "old-secret".to_string());
        vault
            .store_fields("u1", Platform::TwitterOauth2App, &first)
            .await
            .unwrap();

        let mut second = HashMap::new();
        second.insert("client_id".to_string(), "new-id".to_string());
        vault
            .store_fields("u1", Platform::TwitterOauth2App, &second)
            .await
            .unwrap();

        let loaded = vault
            .load_fields("u1", Platform::TwitterOauth2App)
            .await
            .unwrap()
            .unwrap();
        // old-secret must not survive the replacement
        assert_eq!(loaded, second);
    }

    #[tokio::test]
    async fn stored_blob_is_not_plaintext() {
        let storage = Storage::open_in_memory().unwrap();
        let vault = CredentialVault::new(storage.clone());
        let mut fields = HashMap::new();
        fields.insert("api_key".to_string(), "sk-very-secret".to_string());
        vault
            .store_fields("u1", Platform::OpenAi, &fields)
            .await
            .unwrap();

        let blob = storage
            .get_credential_blob("u1", "openai")
            .await
            .unwrap()
            .unwrap();
        assert!(!blob.contains("sk-very-secret"));
    }

    #[tokio::test]
    async fn missing_record_loads_none() {
        let vault = test_vault();
        assert!(
            vault
                .load_fields("ghost", Platform::OpenAi)
                .await
                .unwrap()
                .is_none()
        );
    }
}
