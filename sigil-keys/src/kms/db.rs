//! Master keyset backend
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


use super::{strip_scheme, Aead};
use crate::error::{KeyError, KeyResult};
use crate::master_key::MasterKeyset;
use crate::store::RecordStore;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

const SCHEME: &str = "db";
const KEYSET_ID_PARAM: &str = "kms-keyset-id";

/// KMS backed by master keysets in the record store
///
/// Key URIs look like `db://<provider>?kms-keyset-id=<id>`.
#[derive(Clone)]
pub struct DbKms {
    store: Arc<dyn RecordStore>,
    provider: String,
    secret: Zeroizing<String>,
    /// Master keyset protecting new key sets
    keyset_id: Option<String>,
}

impl fmt::Debug for DbKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbKms")
            .field("provider", &self.provider)
            .field("secret", &"<redacted>")
            .field("keyset_id", &self.keyset_id)
            .finish()
    }
}

impl DbKms {
    pub fn new(store: Arc<dyn RecordStore>, provider: &str, secret: &str) -> Self {
        Self {
            store,
            provider: provider.to_string(),
            secret: Zeroizing::new(secret.to_string()),
            keyset_id: None,
        }
    }

    pub fn with_keyset_id(mut self, keyset_id: &str) -> Self {
        self.keyset_id = Some(keyset_id.to_string());
        self
    }

    pub fn key_uri(&self, keyset_id: &str) -> String {
        format!("{}://{}?{}={}", SCHEME, self.provider, KEYSET_ID_PARAM, keyset_id)
    }

    /// `db://<provider>` followed by the end of the URI, a query or a path
    pub(crate) fn supports(&self, key_uri: &str) -> bool {
        strip_scheme(key_uri, SCHEME)
            .and_then(|rest| rest.strip_prefix(self.provider.as_str()))
            .map_or(false, |tail| {
                tail.is_empty() || tail.starts_with('?') || tail.starts_with('/')
            })
    }

    pub(crate) fn cipher(&self, key_uri: &str) -> KeyResult<Arc<dyn Aead>> {
        if !self.supports(key_uri) {
            return Err(KeyError::UnsupportedProvider(format!(
                "key URI {} does not belong to db://{}",
                key_uri, self.provider
            )));
        }
        let keyset_id = keyset_id_param(key_uri).ok_or_else(|| {
            KeyError::IllegalArgument(format!("key URI {} has no {}", key_uri, KEYSET_ID_PARAM))
        })?;
        Ok(self.cipher_for(keyset_id))
    }

    pub(crate) fn new_cipher(&self) -> KeyResult<(Arc<dyn Aead>, String)> {
        let keyset_id = self.keyset_id.as_deref().ok_or_else(|| {
            KeyError::Configuration("no master keyset configured for new key sets".to_string())
        })?;
        Ok((self.cipher_for(keyset_id.to_string()), self.key_uri(keyset_id)))
    }

    fn cipher_for(&self, keyset_id: String) -> Arc<dyn Aead> {
        Arc::new(DbCipher {
            store: self.store.clone(),
            secret: self.secret.clone(),
            keyset_id,
        })
    }
}

fn keyset_id_param(key_uri: &str) -> Option<String> {
    let (_, query) = key_uri.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == KEYSET_ID_PARAM)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Cipher over one stored master keyset
///
/// The keyset is loaded and decrypted on every call, so a replaced or
/// deleted keyset takes effect immediately.
struct DbCipher {
    store: Arc<dyn RecordStore>,
    secret: Zeroizing<String>,
    keyset_id: String,
}

impl DbCipher {
    async fn load(&self) -> KeyResult<MasterKeyset> {
        let record = self
            .store
            .get_master_keyset(&self.keyset_id)
            .await?
            .ok_or_else(|| KeyError::NotFound(format!("master keyset {}", self.keyset_id)))?;
        MasterKeyset::decrypt(&record.encrypted_keyset, self.secret.as_bytes())
    }
}

#[async_trait]
impl Aead for DbCipher {
    async fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        self.load().await?.keyset().encrypt(plaintext, associated_data)
    }

    async fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        self.load().await?.keyset().decrypt(ciphertext, associated_data)
    }
}
