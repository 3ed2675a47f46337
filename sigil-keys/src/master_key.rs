//! Master keysets protected by an operator secret
//!
//! A master keyset is a small set of AES-256-GCM keys. At rest it is
//! envelope-encrypted: a fresh data key encrypts the serialized keyset and a
//! key-encryption key derived from the operator secret (SHA-256) encrypts
//! the data key. The keyset itself never leaves this crate; callers only get
//! cipher operations through the KMS layer.
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
use crate::records::{MasterKeysetRecord, PageRequest, RecordList};
use crate::store::RecordStore;
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

const KEYSET_MAGIC: &[u8; 4] = b"SGKS";
const KEYSET_VERSION: u8 = 1;

/// Leading byte of every keyset ciphertext, followed by the key id
const CIPHERTEXT_VERSION: u8 = 0x01;
const CIPHERTEXT_PREFIX_LEN: usize = 5;

pub const DEFAULT_KEYSET_NAME: &str = "default";

#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub(crate) struct KeysetKey {
    key_id: u32,
    value: [u8; KEY_LEN],
}

/// AES-256-GCM keys addressed by id; new ciphertexts use the primary key
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct Keyset {
    primary_key_id: u32,
    keys: Vec<KeysetKey>,
}

impl Keyset {
    fn generate() -> KeyResult<Self> {
        let mut key_id = 0u32;
        while key_id == 0 {
            key_id = OsRng.next_u32();
        }
        let mut value = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut value)
            .map_err(|e| KeyError::RandomSource(e.to_string()))?;
        let key = KeysetKey { key_id, value };
        value.zeroize();
        Ok(Self {
            primary_key_id: key_id,
            keys: vec![key],
        })
    }

    fn key(&self, key_id: u32) -> Option<&KeysetKey> {
        self.keys.iter().find(|k| k.key_id == key_id)
    }

    fn primary(&self) -> KeyResult<&KeysetKey> {
        self.key(self.primary_key_id).ok_or_else(|| {
            KeyError::InvariantViolation(format!(
                "keyset primary key {} is missing",
                self.primary_key_id
            ))
        })
    }

    /// `magic | version | primary id | count | (id | len | bytes)*`, integers big-endian
    fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(13 + self.keys.len() * (8 + KEY_LEN)));
        out.extend_from_slice(KEYSET_MAGIC);
        out.push(KEYSET_VERSION);
        out.extend_from_slice(&self.primary_key_id.to_be_bytes());
        out.extend_from_slice(&(self.keys.len() as u32).to_be_bytes());
        for key in &self.keys {
            out.extend_from_slice(&key.key_id.to_be_bytes());
            out.extend_from_slice(&(KEY_LEN as u32).to_be_bytes());
            out.extend_from_slice(&key.value);
        }
        out
    }

    fn from_bytes(bytes: &[u8]) -> KeyResult<Self> {
        let mut reader = Reader { bytes, pos: 0 };
        if reader.take(4)? != KEYSET_MAGIC {
            return Err(KeyError::Crypto("not a serialized keyset".to_string()));
        }
        let version = reader.take(1)?[0];
        if version != KEYSET_VERSION {
            return Err(KeyError::Crypto(format!("unsupported keyset version {}", version)));
        }
        let primary_key_id = reader.u32()?;
        let count = reader.u32()? as usize;
        let mut keys = Vec::with_capacity(count.min(16));
        for _ in 0..count {
            let key_id = reader.u32()?;
            let len = reader.u32()? as usize;
            if len != KEY_LEN {
                return Err(KeyError::Crypto(format!("keyset key {} has length {}", key_id, len)));
            }
            let mut value = [0u8; KEY_LEN];
            value.copy_from_slice(reader.take(KEY_LEN)?);
            keys.push(KeysetKey { key_id, value });
        }
        if reader.pos != bytes.len() {
            return Err(KeyError::Crypto("trailing bytes after keyset".to_string()));
        }
        let keyset = Self { primary_key_id, keys };
        keyset.primary()?;
        Ok(keyset)
    }

    /// Encrypt with the primary key; output is `0x01 | key id | nonce | ciphertext`
    pub(crate) fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        let primary = self.primary()?;
        let sealed = seal(&primary.value, plaintext, associated_data)?;
        let mut out = Vec::with_capacity(CIPHERTEXT_PREFIX_LEN + sealed.len());
        out.push(CIPHERTEXT_VERSION);
        out.extend_from_slice(&primary.key_id.to_be_bytes());
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub(crate) fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        if ciphertext.len() < CIPHERTEXT_PREFIX_LEN || ciphertext[0] != CIPHERTEXT_VERSION {
            return Err(KeyError::Crypto("ciphertext has no keyset prefix".to_string()));
        }
        let mut id = [0u8; 4];
        id.copy_from_slice(&ciphertext[1..CIPHERTEXT_PREFIX_LEN]);
        let key_id = u32::from_be_bytes(id);
        let key = self
            .key(key_id)
            .ok_or_else(|| KeyError::Crypto(format!("no key {} in keyset", key_id)))?;
        open(&key.value, &ciphertext[CIPHERTEXT_PREFIX_LEN..], associated_data)
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> KeyResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| KeyError::Crypto("truncated keyset".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u32(&mut self) -> KeyResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(buf))
    }
}

/// AES-256-GCM with a random nonce; output is `nonce | ciphertext+tag`
fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> KeyResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, Payload { msg: plaintext, aad })
        .map_err(|e| KeyError::Crypto(format!("encryption failed: {}", e)))?;

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn open(key: &[u8; KEY_LEN], sealed: &[u8], aad: &[u8]) -> KeyResult<Vec<u8>> {
    if sealed.len() < NONCE_LEN {
        return Err(KeyError::Crypto("encrypted data too short".to_string()));
    }
    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), Payload { msg: ciphertext, aad })
        .map_err(|_| KeyError::Crypto("decryption failed: authentication tag mismatch".to_string()))
}

fn derive_kek(secret: &[u8]) -> KeyResult<Zeroizing<[u8; KEY_LEN]>> {
    if secret.is_empty() {
        return Err(KeyError::IllegalArgument("master secret is empty".to_string()));
    }
    Ok(Zeroizing::new(Sha256::digest(secret).into()))
}

/// `len(wrapped data key) | wrapped data key | payload`
fn envelope_encrypt(kek: &[u8; KEY_LEN], plaintext: &[u8]) -> KeyResult<Vec<u8>> {
    let mut dek = Zeroizing::new([0u8; KEY_LEN]);
    OsRng
        .try_fill_bytes(dek.as_mut_slice())
        .map_err(|e| KeyError::RandomSource(e.to_string()))?;

    let payload = seal(&dek, plaintext, &[])?;
    let wrapped = seal(kek, dek.as_slice(), &[])?;

    let mut out = Vec::with_capacity(4 + wrapped.len() + payload.len());
    out.extend_from_slice(&(wrapped.len() as u32).to_be_bytes());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&payload);
    Ok(out)
}

fn envelope_decrypt(kek: &[u8; KEY_LEN], data: &[u8]) -> KeyResult<Zeroizing<Vec<u8>>> {
    if data.len() < 4 {
        return Err(KeyError::Crypto("envelope too short".to_string()));
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&data[..4]);
    let wrapped_len = u32::from_be_bytes(len) as usize;
    let rest = &data[4..];
    if rest.len() < wrapped_len {
        return Err(KeyError::Crypto("envelope data key truncated".to_string()));
    }
    let (wrapped, payload) = rest.split_at(wrapped_len);

    let dek = Zeroizing::new(open(kek, wrapped, &[])?);
    let dek: &[u8; KEY_LEN] = dek
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Crypto("envelope data key has wrong length".to_string()))?;
    Ok(Zeroizing::new(open(dek, payload, &[])?))
}

/// Master key-encryption keyset
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKeyset {
    keyset: Keyset,
}

impl fmt::Debug for MasterKeyset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyset")
            .field("primary_key_id", &self.keyset.primary_key_id)
            .field("keys", &self.keyset.keys.len())
            .finish()
    }
}

impl MasterKeyset {
    /// Generate a new keyset; `secret` must be the one it will be encrypted with
    pub fn create(secret: &[u8]) -> KeyResult<Self> {
        derive_kek(secret)?;
        Ok(Self {
            keyset: Keyset::generate()?,
        })
    }

    /// Envelope-encrypt the keyset under `secret`
    pub fn encrypt(&self, secret: &[u8]) -> KeyResult<Vec<u8>> {
        let kek = derive_kek(secret)?;
        envelope_encrypt(&kek, &self.keyset.to_bytes())
    }

    /// Decrypt a keyset produced by [`MasterKeyset::encrypt`]
    ///
    /// Fails with [`KeyError::Crypto`] when `secret` is not the one used to encrypt.
    pub fn decrypt(encrypted: &[u8], secret: &[u8]) -> KeyResult<Self> {
        let kek = derive_kek(secret)?;
        let plaintext = envelope_decrypt(&kek, encrypted)?;
        Ok(Self {
            keyset: Keyset::from_bytes(&plaintext)?,
        })
    }

    pub fn primary_key_id(&self) -> u32 {
        self.keyset.primary_key_id
    }

    pub(crate) fn keyset(&self) -> &Keyset {
        &self.keyset
    }
}

/// Persistent master keysets
pub struct MasterKeyManager {
    store: Arc<dyn RecordStore>,
}

impl MasterKeyManager {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Create, encrypt and persist a new master keyset
    pub async fn create(
        &self,
        name: Option<&str>,
        secret: &str,
        next_id: Option<&str>,
        description: Option<&str>,
    ) -> KeyResult<MasterKeysetRecord> {
        let master = MasterKeyset::create(secret.as_bytes())?;
        let encrypted_keyset = master.encrypt(secret.as_bytes())?;

        let record = MasterKeysetRecord {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            name: name
                .filter(|n| !n.is_empty())
                .unwrap_or(DEFAULT_KEYSET_NAME)
                .to_string(),
            next_id: next_id.filter(|n| !n.is_empty()).map(str::to_string),
            encrypted_keyset,
            description: description.map(str::to_string).unwrap_or_else(|| {
                format!("Master keyset KeyId {}", master.primary_key_id())
            }),
        };
        self.store.create_master_keyset(&record).await?;

        info!(keyset_id = %record.id, name = %record.name, "Created master keyset");
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> KeyResult<MasterKeysetRecord> {
        self.store
            .get_master_keyset(id)
            .await?
            .ok_or_else(|| KeyError::NotFound(format!("master keyset {}", id)))
    }

    /// Load and decrypt a stored master keyset
    pub async fn decrypt(&self, id: &str, secret: &str) -> KeyResult<MasterKeyset> {
        let record = self.get(id).await?;
        MasterKeyset::decrypt(&record.encrypted_keyset, secret.as_bytes())
    }

    pub async fn delete(&self, id: &str) -> KeyResult<()> {
        info!(keyset_id = %id, "Deleting master keyset");
        self.store.delete_master_keyset(id).await
    }

    pub async fn list(&self, page: PageRequest) -> KeyResult<RecordList<MasterKeysetRecord>> {
        self.store.list_master_keysets(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip() {
        let master = MasterKeyset::create(b"correct horse").unwrap();
        let encrypted = master.encrypt(b"correct horse").unwrap();
        let decrypted = MasterKeyset::decrypt(&encrypted, b"correct horse").unwrap();
        assert_eq!(decrypted, master);
        assert_eq!(decrypted.primary_key_id(), master.primary_key_id());
    }

    #[test]
    fn test_encryption_is_randomized() {
        let master = MasterKeyset::create(b"secret").unwrap();
        assert_ne!(master.encrypt(b"secret").unwrap(), master.encrypt(b"secret").unwrap());
    }

    #[test]
    fn test_wrong_secret_fails() {
        let master = MasterKeyset::create(b"secret-1").unwrap();
        let encrypted = master.encrypt(b"secret-1").unwrap();
        let err = MasterKeyset::decrypt(&encrypted, b"secret-2").unwrap_err();
        assert!(matches!(err, KeyError::Crypto(_)));
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert!(matches!(MasterKeyset::create(b""), Err(KeyError::IllegalArgument(_))));
        let master = MasterKeyset::create(b"s").unwrap();
        assert!(matches!(master.encrypt(b""), Err(KeyError::IllegalArgument(_))));
        let encrypted = master.encrypt(b"s").unwrap();
        assert!(matches!(
            MasterKeyset::decrypt(&encrypted, b""),
            Err(KeyError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_tampered_envelope_fails() {
        let master = MasterKeyset::create(b"secret").unwrap();
        let mut encrypted = master.encrypt(b"secret").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(
            MasterKeyset::decrypt(&encrypted, b"secret"),
            Err(KeyError::Crypto(_))
        ));
        assert!(matches!(
            MasterKeyset::decrypt(&encrypted[..3], b"secret"),
            Err(KeyError::Crypto(_))
        ));
    }

    #[test]
    fn test_keyset_serialization_rejects_garbage() {
        let keyset = Keyset::generate().unwrap();
        let bytes = keyset.to_bytes();
        assert!(Keyset::from_bytes(&bytes).unwrap() == keyset);
        assert!(Keyset::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Keyset::from_bytes(b"nope").is_err());
    }

    #[test]
    fn test_keyset_aead_binds_associated_data() {
        let keyset = Keyset::generate().unwrap();
        let ciphertext = keyset.encrypt(b"payload", b"jwks-1").unwrap();
        assert_eq!(keyset.decrypt(&ciphertext, b"jwks-1").unwrap(), b"payload");
        assert!(keyset.decrypt(&ciphertext, b"jwks-2").is_err());

        let other = Keyset::generate().unwrap();
        assert!(other.decrypt(&ciphertext, b"jwks-1").is_err());
    }

    #[test]
    fn test_decrypted_keyset_decrypts_old_ciphertexts() {
        let master = MasterKeyset::create(b"secret").unwrap();
        let ciphertext = master.keyset().encrypt(b"jwks", &[]).unwrap();
        let restored = MasterKeyset::decrypt(&master.encrypt(b"secret").unwrap(), b"secret").unwrap();
        assert_eq!(restored.keyset().decrypt(&ciphertext, &[]).unwrap(), b"jwks");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_only_the_encrypting_secret_decrypts(
            s1 in proptest::collection::vec(any::<u8>(), 1..48),
            s2 in proptest::collection::vec(any::<u8>(), 1..48),
        ) {
            let master = MasterKeyset::create(&s1).unwrap();
            let encrypted = master.encrypt(&s1).unwrap();
            prop_assert_eq!(MasterKeyset::decrypt(&encrypted, &s1).unwrap(), master);
            if s1 != s2 {
                prop_assert!(MasterKeyset::decrypt(&encrypted, &s2).is_err());
            }
        }
    }

    #[tokio::test]
    async fn test_manager_persists_and_decrypts() {
        let manager = MasterKeyManager::new(Arc::new(MemoryStore::new()));
        let record = manager.create(None, "operator", None, None).await.unwrap();
        assert_eq!(record.name, DEFAULT_KEYSET_NAME);
        assert!(record.description.starts_with("Master keyset KeyId "));

        let master = manager.decrypt(&record.id, "operator").await.unwrap();
        assert!(record.description.ends_with(&master.primary_key_id().to_string()));
        assert!(manager.decrypt(&record.id, "intruder").await.is_err());

        manager.delete(&record.id).await.unwrap();
        assert!(matches!(
            manager.get(&record.id).await,
            Err(KeyError::NotFound(_))
        ));
    }
}
