//! File-backed record store
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


use crate::error::KeyResult;
use crate::key_types::KeyUse;
use crate::memory_store::{sorted_page, Tables};
use crate::records::{JwksRecord, MasterKeysetRecord, OidcRotationRecord, PageRequest, RecordList};
use crate::store::RecordStore;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const MASTER_KEYSETS_DIR: &str = "master_keysets";
const JWKS_DIR: &str = "jwks";
const OIDC_ROTATIONS_DIR: &str = "oidc_rotations";

/// Record store persisting one JSON document per record
///
/// Layout under the storage directory:
/// `master_keysets/`, `jwks/` and `oidc_rotations/`, each holding
/// `<base64url(id)>.json`. All records are indexed in memory at startup;
/// writes go to disk first and then to the index, under the same lock.
pub struct LocalStore {
    storage_path: PathBuf,
    tables: RwLock<Tables>,
}

impl LocalStore {
    /// Open (or create) a store rooted at `storage_path`
    pub async fn new<P: AsRef<Path>>(storage_path: P) -> KeyResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        for dir in [MASTER_KEYSETS_DIR, JWKS_DIR, OIDC_ROTATIONS_DIR] {
            fs::create_dir_all(storage_path.join(dir)).await?;
        }

        let tables = Tables {
            master_keysets: load_dir(&storage_path.join(MASTER_KEYSETS_DIR), |r: &MasterKeysetRecord| r.id.clone()).await?,
            jwks: load_dir(&storage_path.join(JWKS_DIR), |r: &JwksRecord| r.id.clone()).await?,
            oidc_rotations: load_dir(&storage_path.join(OIDC_ROTATIONS_DIR), |r: &OidcRotationRecord| r.id.clone()).await?,
        };

        info!(
            path = %storage_path.display(),
            master_keysets = tables.master_keysets.len(),
            jwks = tables.jwks.len(),
            oidc_rotations = tables.oidc_rotations.len(),
            "Opened local record store"
        );

        Ok(Self {
            storage_path,
            tables: RwLock::new(tables),
        })
    }

    /// Path of the file holding record `id` in `dir`
    fn record_path(&self, dir: &str, id: &str) -> PathBuf {
        // ids are free-form; encode them so any value maps to one safe file name
        self.storage_path
            .join(dir)
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(id.as_bytes())))
    }

    /// Write a record through a temporary file and rename it into place
    async fn save<T: Serialize>(&self, dir: &str, id: &str, record: &T) -> KeyResult<()> {
        let path = self.record_path(dir, id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        fs::write(&tmp, json).await?;
        fs::rename(&tmp, &path).await?;
        debug!("Saved {}/{}", dir, id);
        Ok(())
    }

    async fn remove(&self, dir: &str, id: &str) -> KeyResult<()> {
        let path = self.record_path(dir, id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Load every `*.json` record in `dir`, skipping unreadable files
async fn load_dir<T, F>(dir: &Path, id_of: F) -> KeyResult<HashMap<String, T>>
where
    T: DeserializeOwned,
    F: Fn(&T) -> String,
{
    let mut records = HashMap::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "json") {
            continue;
        }
        match fs::read(&path).await {
            Ok(content) => match serde_json::from_slice::<T>(&content) {
                Ok(record) => {
                    records.insert(id_of(&record), record);
                }
                Err(e) => warn!("Failed to parse record {}: {}", path.display(), e),
            },
            Err(e) => warn!("Failed to read record {}: {}", path.display(), e),
        }
    }
    debug!("Loaded {} records from {}", records.len(), dir.display());
    Ok(records)
}

#[async_trait]
impl RecordStore for LocalStore {
    async fn create_master_keyset(&self, record: &MasterKeysetRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_master_keyset(record)?;
        self.save(MASTER_KEYSETS_DIR, &record.id, record).await?;
        tables.master_keysets.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_master_keyset(&self, id: &str) -> KeyResult<Option<MasterKeysetRecord>> {
        Ok(self.tables.read().await.master_keysets.get(id).cloned())
    }

    async fn delete_master_keyset(&self, id: &str) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        self.remove(MASTER_KEYSETS_DIR, id).await?;
        tables.master_keysets.remove(id);
        Ok(())
    }

    async fn list_master_keysets(&self, page: PageRequest) -> KeyResult<RecordList<MasterKeysetRecord>> {
        Ok(sorted_page!(self.tables.read().await.master_keysets, page))
    }

    async fn create_jwks(&self, record: &JwksRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_jwks(record)?;
        self.save(JWKS_DIR, &record.id, record).await?;
        tables.jwks.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_jwks(&self, id: &str) -> KeyResult<Option<JwksRecord>> {
        Ok(self.tables.read().await.jwks.get(id).cloned())
    }

    async fn get_jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<Option<JwksRecord>> {
        Ok(self.tables.read().await.jwks_by_kid_use(kid, key_use).cloned())
    }

    async fn delete_jwks(&self, id: &str) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        self.remove(JWKS_DIR, id).await?;
        tables.jwks.remove(id);
        Ok(())
    }

    async fn delete_jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        let ids: Vec<String> = tables
            .jwks
            .values()
            .filter(|r| r.kid == kid && r.key_use == key_use)
            .map(|r| r.id.clone())
            .collect();
        for id in ids {
            self.remove(JWKS_DIR, &id).await?;
            tables.jwks.remove(&id);
        }
        Ok(())
    }

    async fn list_jwks(&self, page: PageRequest) -> KeyResult<RecordList<JwksRecord>> {
        Ok(sorted_page!(self.tables.read().await.jwks, page))
    }

    async fn create_oidc_rotation(&self, record: &OidcRotationRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_oidc_rotation(record)?;
        self.save(OIDC_ROTATIONS_DIR, &record.id, record).await?;
        tables.oidc_rotations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_oidc_rotation(&self, id: &str) -> KeyResult<Option<OidcRotationRecord>> {
        Ok(self.tables.read().await.oidc_rotations.get(id).cloned())
    }

    async fn update_oidc_rotation(
        &self,
        record: &OidcRotationRecord,
        expected_version: u64,
    ) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_oidc_version(&record.id, expected_version)?;
        self.save(OIDC_ROTATIONS_DIR, &record.id, record).await?;
        tables.oidc_rotations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_oidc_rotation(&self, id: &str) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        self.remove(OIDC_ROTATIONS_DIR, id).await?;
        tables.oidc_rotations.remove(id);
        Ok(())
    }

    async fn list_oidc_rotations(&self, page: PageRequest) -> KeyResult<RecordList<OidcRotationRecord>> {
        Ok(sorted_page!(self.tables.read().await.oidc_rotations, page))
    }
}
