//! Record store interface
//!
//! Persistence for master keysets, JWKS and OIDC rotation groups. Backends:
//! - In-memory (`memory_store`)
//! - Local JSON files (`local_store`)
//!
//! `get*` returns `Ok(None)` for a missing record; services turn that into
//! `KeyError::NotFound`.
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
use crate::records::{JwksRecord, MasterKeysetRecord, OidcRotationRecord, PageRequest, RecordList};
use async_trait::async_trait;

/// Trait for record store backends
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store a new master keyset; `AlreadyExists` on a duplicate id
    async fn create_master_keyset(&self, record: &MasterKeysetRecord) -> KeyResult<()>;

    async fn get_master_keyset(&self, id: &str) -> KeyResult<Option<MasterKeysetRecord>>;

    async fn delete_master_keyset(&self, id: &str) -> KeyResult<()>;

    async fn list_master_keysets(&self, page: PageRequest) -> KeyResult<RecordList<MasterKeysetRecord>>;

    /// Store a new JWKS; `AlreadyExists` on a duplicate id or `(kid, use)`
    async fn create_jwks(&self, record: &JwksRecord) -> KeyResult<()>;

    async fn get_jwks(&self, id: &str) -> KeyResult<Option<JwksRecord>>;

    async fn get_jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<Option<JwksRecord>>;

    async fn delete_jwks(&self, id: &str) -> KeyResult<()>;

    async fn delete_jwks_by_kid_use(&self, kid: &str, key_use: KeyUse) -> KeyResult<()>;

    async fn list_jwks(&self, page: PageRequest) -> KeyResult<RecordList<JwksRecord>>;

    /// Store a new rotation group; `AlreadyExists` on a duplicate id
    async fn create_oidc_rotation(&self, record: &OidcRotationRecord) -> KeyResult<()>;

    async fn get_oidc_rotation(&self, id: &str) -> KeyResult<Option<OidcRotationRecord>>;

    /// Replace a rotation group if its stored version is still `expected_version`
    ///
    /// `NotFound` when the group is gone, `Conflict` when another writer
    /// got there first. The compare and the write are atomic per id.
    async fn update_oidc_rotation(
        &self,
        record: &OidcRotationRecord,
        expected_version: u64,
    ) -> KeyResult<()>;

    async fn delete_oidc_rotation(&self, id: &str) -> KeyResult<()>;

    async fn list_oidc_rotations(&self, page: PageRequest) -> KeyResult<RecordList<OidcRotationRecord>>;
}
