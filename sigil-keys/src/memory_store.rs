//! In-memory record store
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
use crate::key_types::KeyUse;
use crate::records::{JwksRecord, MasterKeysetRecord, OidcRotationRecord, PageRequest, RecordList};
use crate::store::RecordStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Records held by a store, shared by the in-memory and local backends
#[derive(Debug, Default)]
pub(crate) struct Tables {
    pub(crate) master_keysets: HashMap<String, MasterKeysetRecord>,
    pub(crate) jwks: HashMap<String, JwksRecord>,
    pub(crate) oidc_rotations: HashMap<String, OidcRotationRecord>,
}

impl Tables {
    pub(crate) fn check_new_master_keyset(&self, record: &MasterKeysetRecord) -> KeyResult<()> {
        if self.master_keysets.contains_key(&record.id) {
            return Err(KeyError::AlreadyExists(format!("master keyset {}", record.id)));
        }
        Ok(())
    }

    pub(crate) fn check_new_jwks(&self, record: &JwksRecord) -> KeyResult<()> {
        if self.jwks.contains_key(&record.id) {
            return Err(KeyError::AlreadyExists(format!("JWKS {}", record.id)));
        }
        if self.jwks_by_kid_use(&record.kid, record.key_use).is_some() {
            return Err(KeyError::AlreadyExists(format!(
                "JWKS kid={} use={}",
                record.kid, record.key_use
            )));
        }
        Ok(())
    }

    pub(crate) fn check_new_oidc_rotation(&self, record: &OidcRotationRecord) -> KeyResult<()> {
        if self.oidc_rotations.contains_key(&record.id) {
            return Err(KeyError::AlreadyExists(format!("OIDC rotation {}", record.id)));
        }
        Ok(())
    }

    pub(crate) fn check_oidc_version(&self, id: &str, expected_version: u64) -> KeyResult<()> {
        let stored = self
            .oidc_rotations
            .get(id)
            .ok_or_else(|| KeyError::NotFound(format!("OIDC rotation {}", id)))?;
        if stored.version != expected_version {
            return Err(KeyError::Conflict(format!(
                "OIDC rotation {} is at version {}, expected {}",
                id, stored.version, expected_version
            )));
        }
        Ok(())
    }

    pub(crate) fn jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> Option<&JwksRecord> {
        self.jwks
            .values()
            .find(|r| r.kid == kid && r.key_use == key_use)
    }
}

/// List order: creation time, then id
macro_rules! sorted_page {
    ($map:expr, $page:expr) => {{
        let mut all: Vec<_> = $map.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        RecordList::paginate(all, $page)
    }};
}
pub(crate) use sorted_page;

/// Process-local record store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_master_keyset(&self, record: &MasterKeysetRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_master_keyset(record)?;
        tables.master_keysets.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_master_keyset(&self, id: &str) -> KeyResult<Option<MasterKeysetRecord>> {
        Ok(self.tables.read().await.master_keysets.get(id).cloned())
    }

    async fn delete_master_keyset(&self, id: &str) -> KeyResult<()> {
        self.tables.write().await.master_keysets.remove(id);
        Ok(())
    }

    async fn list_master_keysets(&self, page: PageRequest) -> KeyResult<RecordList<MasterKeysetRecord>> {
        Ok(sorted_page!(self.tables.read().await.master_keysets, page))
    }

    async fn create_jwks(&self, record: &JwksRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_jwks(record)?;
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
        self.tables.write().await.jwks.remove(id);
        Ok(())
    }

    async fn delete_jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<()> {
        self.tables
            .write()
            .await
            .jwks
            .retain(|_, r| !(r.kid == kid && r.key_use == key_use));
        Ok(())
    }

    async fn list_jwks(&self, page: PageRequest) -> KeyResult<RecordList<JwksRecord>> {
        Ok(sorted_page!(self.tables.read().await.jwks, page))
    }

    async fn create_oidc_rotation(&self, record: &OidcRotationRecord) -> KeyResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_new_oidc_rotation(record)?;
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
        tables.oidc_rotations.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_oidc_rotation(&self, id: &str) -> KeyResult<()> {
        self.tables.write().await.oidc_rotations.remove(id);
        Ok(())
    }

    async fn list_oidc_rotations(&self, page: PageRequest) -> KeyResult<RecordList<OidcRotationRecord>> {
        Ok(sorted_page!(self.tables.read().await.oidc_rotations, page))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::Algorithm;
    use crate::records::RotationMode;
    use chrono::{Duration, Utc};

    fn jwks(id: &str, kid: &str, key_use: KeyUse) -> JwksRecord {
        JwksRecord {
            id: id.to_string(),
            created_at: Utc::now(),
            kid: kid.to_string(),
            alg: Algorithm::Es256,
            key_use,
            kms_key_uri: "db://local?kms-keyset-id=m".to_string(),
            encrypted_jwks: vec![1, 2, 3],
            description: None,
        }
    }

    fn rotation(id: &str) -> OidcRotationRecord {
        let now = Utc::now();
        OidcRotationRecord {
            id: id.to_string(),
            created_at: now,
            current_jwks_id: "a".to_string(),
            next_jwks_id: "b".to_string(),
            previous_jwks_id: None,
            rotation_mode: RotationMode::Manual,
            rotation_period: 0,
            last_rotated: now,
            description: String::new(),
            version: 0,
        }
    }

    #[tokio::test]
    async fn test_kid_use_is_unique() {
        let store = MemoryStore::new();
        store.create_jwks(&jwks("1", "kid", KeyUse::Sig)).await.unwrap();

        let err = store.create_jwks(&jwks("2", "kid", KeyUse::Sig)).await.unwrap_err();
        assert!(matches!(err, KeyError::AlreadyExists(_)));

        // same kid, other use
        store.create_jwks(&jwks("3", "kid", KeyUse::Enc)).await.unwrap();
        assert_eq!(
            store.get_jwks_by_kid_use("kid", KeyUse::Enc).await.unwrap().unwrap().id,
            "3"
        );

        store.delete_jwks_by_kid_use("kid", KeyUse::Sig).await.unwrap();
        assert!(store.get_jwks("1").await.unwrap().is_none());
        assert!(store.get_jwks("3").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_compares_version() {
        let store = MemoryStore::new();
        let mut record = rotation("oidc");
        store.create_oidc_rotation(&record).await.unwrap();

        record.version = 1;
        store.update_oidc_rotation(&record, 0).await.unwrap();

        let err = store.update_oidc_rotation(&record, 0).await.unwrap_err();
        assert!(matches!(err, KeyError::Conflict(_)));

        let err = store
            .update_oidc_rotation(&rotation("missing"), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, KeyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_is_ordered_and_paged() {
        let store = MemoryStore::new();
        let start = Utc::now();
        for i in 0..5 {
            let mut record = jwks(&format!("id-{}", i), &format!("kid-{}", i), KeyUse::Sig);
            record.created_at = start + Duration::seconds(5 - i);
            store.create_jwks(&record).await.unwrap();
        }

        let list = store.list_jwks(PageRequest::new(1, 2)).await.unwrap();
        assert_eq!(list.page.total, 5);
        let ids: Vec<_> = list.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["id-3", "id-2"]);
    }
}
