//! KMS (Key Management Service) backends
//!
//! A stored JWKS names the key that protects it with an opaque key URI.
//! [`KmsResolver`] turns such a URI back into an [`Aead`] handle, and mints
//! URIs for new key sets from its primary backend:
//! - `db://<provider>?kms-keyset-id=<id>`: master keyset kept in the record store
//! - `hcvault://vault/transit/keys/<name>`: HashiCorp Vault transit engine
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


pub mod db;
pub mod transit;

pub use db::DbKms;
pub use transit::{TransitClient, TransitKms, VaultTransitClient};

use crate::error::{KeyError, KeyResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Authenticated encryption with associated data
#[async_trait]
pub trait Aead: Send + Sync {
    async fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>>;

    async fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>>;
}

/// Configured KMS backend
#[derive(Debug, Clone)]
pub enum KmsBackend {
    Database(DbKms),
    Transit(TransitKms),
}

impl KmsBackend {
    fn name(&self) -> &'static str {
        match self {
            KmsBackend::Database(_) => "db",
            KmsBackend::Transit(_) => "vault",
        }
    }

    fn supports(&self, key_uri: &str) -> bool {
        match self {
            KmsBackend::Database(kms) => kms.supports(key_uri),
            KmsBackend::Transit(kms) => kms.supports(key_uri),
        }
    }

    fn cipher(&self, key_uri: &str) -> KeyResult<Arc<dyn Aead>> {
        match self {
            KmsBackend::Database(kms) => kms.cipher(key_uri),
            KmsBackend::Transit(kms) => kms.cipher(key_uri),
        }
    }

    fn new_cipher(&self, jwks_id: &str) -> KeyResult<(Arc<dyn Aead>, String)> {
        match self {
            KmsBackend::Database(kms) => kms.new_cipher(),
            KmsBackend::Transit(kms) => kms.new_cipher(jwks_id),
        }
    }
}

/// Maps key URIs to ciphers
///
/// The first backend is the primary one and protects newly created key sets.
/// Further backends only resolve existing URIs.
#[derive(Debug, Clone)]
pub struct KmsResolver {
    backends: Vec<KmsBackend>,
}

impl KmsResolver {
    pub fn new(primary: KmsBackend) -> Self {
        Self {
            backends: vec![primary],
        }
    }

    pub fn with_backend(mut self, backend: KmsBackend) -> Self {
        self.backends.push(backend);
        self
    }

    /// Cipher for an existing key URI
    pub fn resolve(&self, key_uri: &str) -> KeyResult<Arc<dyn Aead>> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.supports(key_uri))
            .ok_or_else(|| {
                KeyError::UnsupportedProvider(format!("no KMS backend for key URI {}", key_uri))
            })?;
        debug!(backend = backend.name(), "Resolved key URI");
        backend.cipher(key_uri)
    }

    /// Cipher and reference URI for a new JWKS
    pub fn new_cipher(&self, jwks_id: &str) -> KeyResult<(Arc<dyn Aead>, String)> {
        // never empty: built from a primary
        let primary = &self.backends[0];
        primary.new_cipher(jwks_id)
    }
}

/// Case-insensitive scheme match; returns the part after `scheme://`
pub(crate) fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Option<&'a str> {
    let (uri_scheme, rest) = uri.split_once("://")?;
    uri_scheme.eq_ignore_ascii_case(scheme).then_some(rest)
}
