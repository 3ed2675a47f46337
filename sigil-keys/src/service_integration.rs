//! Service integration helpers for wiring the key services together
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
use crate::jwks_store::JwksStore;
use crate::keygen::KeyGenerator;
use crate::kms::{DbKms, KmsBackend, KmsResolver, TransitKms};
use crate::local_store::LocalStore;
use crate::master_key::MasterKeyManager;
use crate::memory_store::MemoryStore;
use crate::oidc::OidcRotation;
use crate::store::RecordStore;
use sigil_config::{AppConfig, KmsConfig, KmsProvider, StoreConfig, StoreKind};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a caller needs to manage keys
pub struct KeyServices {
    pub store: Arc<dyn RecordStore>,
    pub kms: Arc<KmsResolver>,
    pub master_keys: Arc<MasterKeyManager>,
    pub jwks: Arc<JwksStore>,
    pub oidc: Arc<OidcRotation>,
}

/// Initialize the record store
pub async fn init_record_store(config: &StoreConfig) -> KeyResult<Arc<dyn RecordStore>> {
    match config.kind {
        StoreKind::Memory => {
            warn!("Using in-memory record store; records are lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::Local => {
            info!(path = %config.path.display(), "Initializing local record store");
            Ok(Arc::new(LocalStore::new(&config.path).await?))
        }
    }
}

/// Build the KMS resolver
///
/// The configured provider protects new key sets. The other provider is
/// added for lookups when it is configured, so key sets created under it
/// stay readable.
pub fn init_kms(config: &KmsConfig, store: Arc<dyn RecordStore>) -> KeyResult<KmsResolver> {
    let db = match &config.master_secret {
        Some(secret) => {
            let kms = DbKms::new(store, &config.db_provider, secret);
            Some(match &config.keyset_id {
                Some(keyset_id) => kms.with_keyset_id(keyset_id),
                None => kms,
            })
        }
        None => None,
    };
    let transit = config.vault.as_ref().map(TransitKms::from_config).transpose()?;

    let resolver = match config.provider {
        KmsProvider::Db => {
            let db = db.ok_or_else(|| {
                KeyError::Configuration(
                    "SIGIL_KMS_MASTER_SECRET is required for the db KMS provider".to_string(),
                )
            })?;
            let resolver = KmsResolver::new(KmsBackend::Database(db));
            match transit {
                Some(transit) => resolver.with_backend(KmsBackend::Transit(transit)),
                None => resolver,
            }
        }
        KmsProvider::Vault => {
            let transit = transit.ok_or_else(|| {
                KeyError::Configuration(
                    "Vault settings are required for the vault KMS provider".to_string(),
                )
            })?;
            let resolver = KmsResolver::new(KmsBackend::Transit(transit));
            match db {
                Some(db) => resolver.with_backend(KmsBackend::Database(db)),
                None => resolver,
            }
        }
    };

    info!(provider = ?config.provider, "Initialized KMS resolver");
    Ok(resolver)
}

/// Initialize all key services from application configuration
pub async fn init_key_services(config: &AppConfig) -> KeyResult<KeyServices> {
    let store = init_record_store(&config.store).await?;
    let kms = Arc::new(init_kms(&config.kms, store.clone())?);

    let generator = match config.rsa_bits {
        Some(bits) => KeyGenerator::new().with_rsa_default(bits),
        None => KeyGenerator::new(),
    };

    let jwks = Arc::new(JwksStore::new(store.clone(), kms.clone(), generator));
    let oidc = Arc::new(OidcRotation::new(store.clone(), jwks.clone()));
    let master_keys = Arc::new(MasterKeyManager::new(store.clone()));

    Ok(KeyServices {
        store,
        kms,
        master_keys,
        jwks,
        oidc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigil_config::{LogFormat, VaultConfig, VaultTlsConfig};
    use std::path::PathBuf;

    fn config(provider: KmsProvider) -> AppConfig {
        AppConfig {
            store: StoreConfig {
                kind: StoreKind::Memory,
                path: PathBuf::from("unused"),
            },
            kms: KmsConfig {
                provider,
                db_provider: "local".to_string(),
                keyset_id: None,
                master_secret: None,
                vault: None,
            },
            rsa_bits: None,
            log_level: None,
            log_format: LogFormat::Console,
        }
    }

    #[tokio::test]
    async fn test_db_provider_requires_secret() {
        let err = init_key_services(&config(KmsProvider::Db)).await.err().unwrap();
        assert!(matches!(err, KeyError::Configuration(_)));

        let mut config = config(KmsProvider::Db);
        config.kms.master_secret = Some("secret".to_string());
        assert!(init_key_services(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_vault_provider_requires_https() {
        let mut config = config(KmsProvider::Vault);
        config.kms.vault = Some(VaultConfig {
            address: "http://vault.example.com:8200".to_string(),
            token: "token".to_string(),
            timeout_seconds: 5,
            tls: VaultTlsConfig::default(),
        });
        let err = init_key_services(&config).await.err().unwrap();
        assert!(matches!(err, KeyError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_local_store_is_created() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store_config = StoreConfig {
            kind: StoreKind::Local,
            path: temp_dir.path().join("records"),
        };
        init_record_store(&store_config).await.unwrap();
        assert!(temp_dir.path().join("records").join("jwks").is_dir());
    }
}
