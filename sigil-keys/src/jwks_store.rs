//! Encrypted JSON Web Key Set storage
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{KeyError, KeyResult};
use crate::key_types::{Algorithm, JsonWebKeySet, Jwk, KeyUse};
use crate::keygen::{KeyGenerator, PRIVATE_KEY_ID_PREFIX, PUBLIC_KEY_ID_PREFIX};
use crate::kms::KmsResolver;
use crate::records::{JwksRecord, PageRequest, RecordList};
use crate::store::RecordStore;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Request to create a key set
#[derive(Debug, Clone)]
pub struct NewJwks {
    /// Record id; a UUID when absent
    pub id: Option<String>,
    /// Base key id; a UUID when absent
    pub kid: Option<String>,
    pub alg: Algorithm,
    pub key_use: KeyUse,
    /// Key size overriding the generator default
    pub bits: Option<usize>,
    pub description: Option<String>,
}

impl NewJwks {
    pub fn new(alg: Algorithm, key_use: KeyUse) -> Self {
        Self {
            id: None,
            kid: None,
            alg,
            key_use,
            bits: None,
            description: None,
        }
    }
}

/// A stored key set together with its decrypted keys
#[derive(Debug, Clone)]
pub struct DecryptedJwks {
    pub record: JwksRecord,
    pub keys: JsonWebKeySet,
}

impl DecryptedJwks {
    /// Public half of an asymmetric key set
    pub fn public_key(&self) -> Option<&Jwk> {
        self.keys.keys.iter().find(|k| k.is_public())
    }

    /// Private half of an asymmetric key set
    pub fn private_key(&self) -> Option<&Jwk> {
        self.keys.keys.iter().find(|k| k.is_private())
    }

    /// The single key of a symmetric key set
    pub fn secret_key(&self) -> Option<&Jwk> {
        self.keys.keys.iter().find(|k| k.is_symmetric())
    }
}

/// Creates key sets and keeps them encrypted under a KMS key
pub struct JwksStore {
    store: Arc<dyn RecordStore>,
    kms: Arc<KmsResolver>,
    generator: KeyGenerator,
}

impl JwksStore {
    pub fn new(store: Arc<dyn RecordStore>, kms: Arc<KmsResolver>, generator: KeyGenerator) -> Self {
        Self {
            store,
            kms,
            generator,
        }
    }

    /// Generate, encrypt and persist a new key set
    pub async fn create(&self, request: NewJwks) -> KeyResult<JwksRecord> {
        let id = non_empty(request.id).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let kid = non_empty(request.kid).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        // cheap checks before paying for key generation
        if self.store.get_jwks(&id).await?.is_some() {
            return Err(KeyError::AlreadyExists(format!("JWKS {}", id)));
        }
        if self.store.get_jwks_by_kid_use(&kid, request.key_use).await?.is_some() {
            return Err(KeyError::AlreadyExists(format!(
                "JWKS kid={} use={}",
                kid, request.key_use
            )));
        }

        let generator = match request.bits {
            Some(bits) => self.generator.with_bits(bits),
            None => self.generator,
        };
        let (alg, key_use) = (request.alg, request.key_use);
        let base_kid = kid.clone();
        let keys = tokio::task::spawn_blocking(move || generator.generate(Some(&base_kid), alg, key_use))
            .await
            .map_err(|e| KeyError::Crypto(format!("key generation task failed: {}", e)))??;

        let (cipher, kms_key_uri) = self.kms.new_cipher(&id)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(&keys)?);
        let encrypted_jwks = cipher.encrypt(&plaintext, &[]).await?;

        let record = JwksRecord {
            id,
            created_at: chrono::Utc::now(),
            kid,
            alg,
            key_use,
            kms_key_uri,
            encrypted_jwks,
            description: request.description.filter(|d| !d.is_empty()),
        };
        self.store.create_jwks(&record).await?;

        info!(jwks_id = %record.id, kid = %record.kid, alg = %alg, "Created JWKS");
        Ok(record)
    }

    /// Stored record without decrypting it
    pub async fn record(&self, id: &str) -> KeyResult<JwksRecord> {
        self.store
            .get_jwks(id)
            .await?
            .ok_or_else(|| KeyError::NotFound(format!("JWKS {}", id)))
    }

    pub async fn get(&self, id: &str) -> KeyResult<DecryptedJwks> {
        let record = self.record(id).await?;
        self.decrypt(record).await
    }

    pub async fn get_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<DecryptedJwks> {
        let record = self
            .store
            .get_jwks_by_kid_use(kid, key_use)
            .await?
            .ok_or_else(|| KeyError::NotFound(format!("JWKS kid={} use={}", kid, key_use)))?;
        self.decrypt(record).await
    }

    /// Remove the record; the KMS key is left alone
    pub async fn delete(&self, id: &str) -> KeyResult<()> {
        info!(jwks_id = %id, "Deleting JWKS");
        self.store.delete_jwks(id).await
    }

    pub async fn delete_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<()> {
        info!(kid = %kid, key_use = %key_use, "Deleting JWKS");
        self.store.delete_jwks_by_kid_use(kid, key_use).await
    }

    pub async fn list(&self, page: PageRequest) -> KeyResult<RecordList<JwksRecord>> {
        self.store.list_jwks(page).await
    }

    async fn decrypt(&self, record: JwksRecord) -> KeyResult<DecryptedJwks> {
        let cipher = self.kms.resolve(&record.kms_key_uri)?;
        let plaintext = Zeroizing::new(cipher.decrypt(&record.encrypted_jwks, &[]).await?);
        let keys: JsonWebKeySet = serde_json::from_slice(&plaintext)?;
        check_shape(&record, &keys)?;
        debug!(jwks_id = %record.id, "Decrypted JWKS");
        Ok(DecryptedJwks { record, keys })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Symmetric sets hold one key; asymmetric sets one public and one private
/// key whose kids share the record's base kid
fn check_shape(record: &JwksRecord, keys: &JsonWebKeySet) -> KeyResult<()> {
    let valid = if record.alg.is_symmetric() {
        keys.len() == 1 && keys.keys[0].is_symmetric()
    } else {
        let public: Vec<_> = keys.keys.iter().filter(|k| k.is_public()).collect();
        let private: Vec<_> = keys.keys.iter().filter(|k| k.is_private()).collect();
        keys.len() == 2
            && public.len() == 1
            && private.len() == 1
            && public[0].kid.strip_prefix(PUBLIC_KEY_ID_PREFIX) == Some(record.kid.as_str())
            && private[0].kid.strip_prefix(PRIVATE_KEY_ID_PREFIX) == Some(record.kid.as_str())
    };
    if !valid {
        return Err(KeyError::InvariantViolation(format!(
            "JWKS {} has an unexpected key layout ({} keys for {})",
            record.id,
            keys.len(),
            record.alg
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::{DbKms, KmsBackend};
    use crate::master_key::MasterKeyManager;
    use crate::memory_store::MemoryStore;

    async fn jwks_store() -> (JwksStore, Arc<dyn RecordStore>) {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        let master = MasterKeyManager::new(store.clone())
            .create(None, "secret", None, None)
            .await
            .unwrap();
        let kms = DbKms::new(store.clone(), "local", "secret").with_keyset_id(&master.id);
        let resolver = Arc::new(KmsResolver::new(KmsBackend::Database(kms)));
        (JwksStore::new(store.clone(), resolver, KeyGenerator::new()), store)
    }

    #[tokio::test]
    async fn test_create_and_get_asymmetric() {
        let (jwks, store) = jwks_store().await;
        let mut request = NewJwks::new(Algorithm::Es256, KeyUse::Sig);
        request.kid = Some("signing".to_string());
        let record = jwks.create(request).await.unwrap();

        assert!(record.kms_key_uri.starts_with("db://local?kms-keyset-id="));
        assert!(!String::from_utf8_lossy(&record.encrypted_jwks).contains("signing"));
        assert!(store.get_jwks(&record.id).await.unwrap().is_some());

        let decrypted = jwks.get(&record.id).await.unwrap();
        let public = decrypted.public_key().unwrap();
        assert_eq!(public.kid, format!("{}signing", PUBLIC_KEY_ID_PREFIX));
        assert!(public.d.is_none());
        assert_eq!(
            decrypted.private_key().unwrap().kid,
            format!("{}signing", PRIVATE_KEY_ID_PREFIX)
        );

        let by_kid = jwks.get_by_kid_use("signing", KeyUse::Sig).await.unwrap();
        assert_eq!(by_kid.record.id, record.id);
    }

    #[tokio::test]
    async fn test_create_symmetric() {
        let (jwks, _) = jwks_store().await;
        let record = jwks.create(NewJwks::new(Algorithm::Hs384, KeyUse::Sig)).await.unwrap();
        let decrypted = jwks.get(&record.id).await.unwrap();
        assert_eq!(decrypted.keys.len(), 1);
        assert!(decrypted.secret_key().is_some());
        assert!(decrypted.public_key().is_none());
        assert_eq!(decrypted.keys.keys[0].kid, record.kid);
    }

    #[tokio::test]
    async fn test_duplicates_rejected() {
        let (jwks, _) = jwks_store().await;
        let mut request = NewJwks::new(Algorithm::EdDsa, KeyUse::Sig);
        request.id = Some("jwks-1".to_string());
        request.kid = Some("k".to_string());
        jwks.create(request.clone()).await.unwrap();

        let err = jwks.create(request.clone()).await.unwrap_err();
        assert!(matches!(err, KeyError::AlreadyExists(_)));

        request.id = Some("jwks-2".to_string());
        let err = jwks.create(request).await.unwrap_err();
        assert!(matches!(err, KeyError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_use_mismatch_rejected() {
        let (jwks, store) = jwks_store().await;
        let err = jwks
            .create(NewJwks::new(Algorithm::Es256, KeyUse::Enc))
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedAlgorithm(_)));
        assert_eq!(store.list_jwks(PageRequest::default()).await.unwrap().page.total, 0);
    }

    #[tokio::test]
    async fn test_bad_shape_is_invariant_violation() {
        let (jwks, store) = jwks_store().await;
        let record = jwks.create(NewJwks::new(Algorithm::Es256, KeyUse::Sig)).await.unwrap();

        // replace the payload with a set holding only the public key
        let decrypted = jwks.get(&record.id).await.unwrap();
        let truncated = JsonWebKeySet {
            keys: vec![decrypted.public_key().unwrap().clone()],
        };
        let cipher = jwks.kms.resolve(&record.kms_key_uri).unwrap();
        let mut tampered = record.clone();
        tampered.id = "tampered".to_string();
        tampered.kid = "tampered".to_string();
        tampered.encrypted_jwks = cipher
            .encrypt(&serde_json::to_vec(&truncated).unwrap(), &[])
            .await
            .unwrap();
        store.create_jwks(&tampered).await.unwrap();

        let err = jwks.get("tampered").await.unwrap_err();
        assert!(matches!(err, KeyError::InvariantViolation(_)));
    }

    #[test]
    fn test_shape_requires_matching_kids() {
        let keys = KeyGenerator::new()
            .generate(Some("pair"), Algorithm::Es256, KeyUse::Sig)
            .unwrap();
        let record = JwksRecord {
            id: "jwks".to_string(),
            created_at: chrono::Utc::now(),
            kid: "pair".to_string(),
            alg: Algorithm::Es256,
            key_use: KeyUse::Sig,
            kms_key_uri: "db://local?kms-keyset-id=x".to_string(),
            encrypted_jwks: Vec::new(),
            description: None,
        };
        check_shape(&record, &keys).unwrap();

        let mut mismatched = keys.clone();
        for key in mismatched.keys.iter_mut().filter(|k| k.is_private()) {
            key.kid = format!("{}other", PRIVATE_KEY_ID_PREFIX);
        }
        assert!(matches!(
            check_shape(&record, &mismatched),
            Err(KeyError::InvariantViolation(_))
        ));

        let mut unprefixed = keys;
        for key in unprefixed.keys.iter_mut().filter(|k| k.is_public()) {
            key.kid = "pair".to_string();
        }
        assert!(matches!(
            check_shape(&record, &unprefixed),
            Err(KeyError::InvariantViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let (jwks, _) = jwks_store().await;
        let record = jwks.create(NewJwks::new(Algorithm::Hs256, KeyUse::Sig)).await.unwrap();
        jwks.delete_by_kid_use(&record.kid, KeyUse::Sig).await.unwrap();
        assert!(matches!(jwks.get(&record.id).await, Err(KeyError::NotFound(_))));
        assert!(matches!(
            jwks.get_by_kid_use(&record.kid, KeyUse::Sig).await,
            Err(KeyError::NotFound(_))
        ));
    }
}
