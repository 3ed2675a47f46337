//! OIDC signing key rotation
//!
//! Each key group keeps a window of up to three signing key sets:
//! - `current`: signs new tokens
//! - `next`: already published so relying parties cache it before it signs
//! - `previous`: still published so tokens signed before the last rotation verify
//!
//! The three slots are pairwise distinct at all times. Every successful
//! rotation bumps `version` by one; the store update compares the version
//! read at the start of the rotation, so concurrent rotations of the same
//! group cannot both succeed.
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
use crate::jwks_store::{JwksStore, NewJwks};
use crate::key_types::{Algorithm, JsonWebKeySet, KeyUse};
use crate::records::{OidcRotationRecord, PageRequest, RecordList, RotationMode};
use crate::store::RecordStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request to create a rotation group
#[derive(Debug, Clone)]
pub struct NewRotation {
    /// Group id; a UUID when absent
    pub id: Option<String>,
    /// Existing key set for the current slot; minted when absent
    pub current_jwks_id: Option<String>,
    /// Existing key set for the next slot; minted when absent
    pub next_jwks_id: Option<String>,
    /// Algorithm of minted key sets
    pub alg: Algorithm,
    pub rotation_mode: RotationMode,
    /// Seconds between periodic rotations
    pub rotation_period: u64,
    pub description: Option<String>,
}

impl NewRotation {
    pub fn new(alg: Algorithm) -> Self {
        Self {
            id: None,
            current_jwks_id: None,
            next_jwks_id: None,
            alg,
            rotation_mode: RotationMode::Manual,
            rotation_period: 0,
            description: None,
        }
    }
}

/// Rotation request
#[derive(Debug, Clone)]
pub enum Rotation {
    /// Promote `next` to `current` and keep the old `current` as `previous`
    Advance {
        next_jwks_id: Option<String>,
        alg: Algorithm,
    },
    /// Replace `current` and `next`, dropping `previous`
    Revoke {
        current_jwks_id: Option<String>,
        next_jwks_id: Option<String>,
        alg: Algorithm,
    },
}

impl Rotation {
    fn alg(&self) -> Algorithm {
        match self {
            Rotation::Advance { alg, .. } | Rotation::Revoke { alg, .. } => *alg,
        }
    }
}

/// OIDC key group manager
pub struct OidcRotation {
    store: Arc<dyn RecordStore>,
    jwks: Arc<JwksStore>,
}

impl OidcRotation {
    pub fn new(store: Arc<dyn RecordStore>, jwks: Arc<JwksStore>) -> Self {
        Self { store, jwks }
    }

    pub async fn create(&self, request: NewRotation) -> KeyResult<OidcRotationRecord> {
        check_signing_alg(request.alg)?;
        if request.rotation_mode == RotationMode::Periodic && request.rotation_period == 0 {
            return Err(KeyError::IllegalArgument(
                "periodic rotation requires a rotation period".to_string(),
            ));
        }
        if let (Some(current), Some(next)) = (&request.current_jwks_id, &request.next_jwks_id) {
            if current == next {
                return Err(KeyError::InvariantViolation(format!(
                    "current and next JWKS must differ, both are {}",
                    current
                )));
            }
        }

        let id = request
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.store.get_oidc_rotation(&id).await?.is_some() {
            return Err(KeyError::AlreadyExists(format!("OIDC rotation {}", id)));
        }
        for jwks_id in [&request.current_jwks_id, &request.next_jwks_id].into_iter().flatten() {
            self.check_candidate(jwks_id).await?;
        }

        let mut minted = Vec::new();
        let current_jwks_id = self
            .supplied_or_minted(request.current_jwks_id, request.alg, &mut minted)
            .await?;
        let next_jwks_id = self
            .supplied_or_minted(request.next_jwks_id, request.alg, &mut minted)
            .await?;

        let now = Utc::now();
        let record = OidcRotationRecord {
            id,
            created_at: now,
            current_jwks_id,
            next_jwks_id,
            previous_jwks_id: None,
            rotation_mode: request.rotation_mode,
            rotation_period: request.rotation_period,
            last_rotated: now,
            description: request.description.unwrap_or_default(),
            version: 0,
        };
        if let Err(e) = self.store.create_oidc_rotation(&record).await {
            self.discard_minted(&minted).await;
            return Err(e);
        }

        info!(
            oidc_id = %record.id,
            current = %record.current_jwks_id,
            next = %record.next_jwks_id,
            "Created OIDC rotation"
        );
        Ok(record)
    }

    /// Rotate a group; the stored record is replaced only if nobody else
    /// rotated it in the meantime
    pub async fn rotate(&self, id: &str, rotation: Rotation) -> KeyResult<OidcRotationRecord> {
        let stored = self.get(id).await?;
        self.rotate_from(stored, rotation, Utc::now()).await
    }

    /// Rotate starting from `stored`; the update expects `stored.version`
    async fn rotate_from(
        &self,
        stored: OidcRotationRecord,
        rotation: Rotation,
        now: DateTime<Utc>,
    ) -> KeyResult<OidcRotationRecord> {
        check_signing_alg(rotation.alg())?;

        let mut minted = Vec::new();
        let mut updated = match rotation {
            Rotation::Advance { next_jwks_id, alg } => {
                if let Some(next) = &next_jwks_id {
                    check_not_in_window(&stored, next)?;
                    self.check_candidate(next).await?;
                }
                let next = self.supplied_or_minted(next_jwks_id, alg, &mut minted).await?;
                OidcRotationRecord {
                    previous_jwks_id: Some(stored.current_jwks_id.clone()),
                    current_jwks_id: stored.next_jwks_id.clone(),
                    next_jwks_id: next,
                    ..stored.clone()
                }
            }
            Rotation::Revoke {
                current_jwks_id,
                next_jwks_id,
                alg,
            } => {
                if let (Some(current), Some(next)) = (&current_jwks_id, &next_jwks_id) {
                    if current == next {
                        return Err(KeyError::InvariantViolation(format!(
                            "current and next JWKS must differ, both are {}",
                            current
                        )));
                    }
                }
                for candidate in [&current_jwks_id, &next_jwks_id].into_iter().flatten() {
                    check_not_in_window(&stored, candidate)?;
                    self.check_candidate(candidate).await?;
                }
                let current = self
                    .supplied_or_minted(current_jwks_id, alg, &mut minted)
                    .await?;
                let next = self.supplied_or_minted(next_jwks_id, alg, &mut minted).await?;
                OidcRotationRecord {
                    current_jwks_id: current,
                    next_jwks_id: next,
                    previous_jwks_id: None,
                    ..stored.clone()
                }
            }
        };
        updated.version = stored.version + 1;
        updated.last_rotated = now;

        if let Err(e) = self.store.update_oidc_rotation(&updated, stored.version).await {
            self.discard_minted(&minted).await;
            return Err(e);
        }

        info!(
            oidc_id = %updated.id,
            version = updated.version,
            current = %updated.current_jwks_id,
            next = %updated.next_jwks_id,
            "Rotated OIDC keys"
        );
        Ok(updated)
    }

    /// Advance a periodic group whose period has elapsed
    ///
    /// Minted keys reuse the algorithm of the key set being promoted and
    /// `last_rotated` becomes `now`. Returns `None` when the group is not
    /// due; a concurrent rotation of the checked version is a `Conflict`.
    pub async fn rotate_if_due(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> KeyResult<Option<OidcRotationRecord>> {
        let stored = self.get(id).await?;
        if !stored.is_rotation_due(now) {
            debug!(oidc_id = %id, "Rotation not due");
            return Ok(None);
        }
        let alg = self.jwks.record(&stored.next_jwks_id).await?.alg;
        self.rotate_from(
            stored,
            Rotation::Advance {
                next_jwks_id: None,
                alg,
            },
            now,
        )
        .await
        .map(Some)
    }

    /// Public keys of the window: current, next, then previous
    pub async fn publish(&self, id: &str) -> KeyResult<JsonWebKeySet> {
        let record = self.get(id).await?;
        let mut keys = Vec::with_capacity(3);
        for jwks_id in record.slots() {
            let decrypted = self.jwks.get(jwks_id).await?;
            let public = decrypted.public_key().ok_or_else(|| {
                KeyError::InvariantViolation(format!("JWKS {} has no public key", jwks_id))
            })?;
            keys.push(public.to_public());
        }
        Ok(JsonWebKeySet { keys })
    }

    pub async fn get(&self, id: &str) -> KeyResult<OidcRotationRecord> {
        self.store
            .get_oidc_rotation(id)
            .await?
            .ok_or_else(|| KeyError::NotFound(format!("OIDC rotation {}", id)))
    }

    /// Remove the group; its key sets stay in the JWKS store
    pub async fn delete(&self, id: &str) -> KeyResult<()> {
        info!(oidc_id = %id, "Deleting OIDC rotation");
        self.store.delete_oidc_rotation(id).await
    }

    pub async fn list(&self, page: PageRequest) -> KeyResult<RecordList<OidcRotationRecord>> {
        self.store.list_oidc_rotations(page).await
    }

    /// A supplied key set must exist, be a signing key and use an OIDC algorithm
    async fn check_candidate(&self, jwks_id: &str) -> KeyResult<()> {
        let record = self.jwks.record(jwks_id).await?;
        if record.key_use != KeyUse::Sig {
            return Err(KeyError::InvariantViolation(format!(
                "JWKS {} has use={}, OIDC keys must have use=sig",
                jwks_id, record.key_use
            )));
        }
        check_signing_alg(record.alg)
    }

    /// Ids of key sets minted here are pushed onto `minted`
    async fn supplied_or_minted(
        &self,
        jwks_id: Option<String>,
        alg: Algorithm,
        minted: &mut Vec<String>,
    ) -> KeyResult<String> {
        match jwks_id {
            Some(id) => Ok(id),
            None => {
                let record = self.jwks.create(NewJwks::new(alg, KeyUse::Sig)).await?;
                debug!(jwks_id = %record.id, "Minted OIDC signing key");
                minted.push(record.id.clone());
                Ok(record.id)
            }
        }
    }

    /// Remove key sets minted for a group write that did not land
    async fn discard_minted(&self, minted: &[String]) {
        for jwks_id in minted {
            if let Err(e) = self.jwks.delete(jwks_id).await {
                warn!(jwks_id = %jwks_id, error = %e, "Failed to remove unreferenced JWKS");
            }
        }
    }
}

fn check_signing_alg(alg: Algorithm) -> KeyResult<()> {
    if !alg.is_oidc_signing() {
        return Err(KeyError::UnsupportedAlgorithm(format!(
            "{} is not an asymmetric signing algorithm",
            alg
        )));
    }
    Ok(())
}

fn check_not_in_window(record: &OidcRotationRecord, jwks_id: &str) -> KeyResult<()> {
    if record.references(jwks_id) {
        return Err(KeyError::InvariantViolation(format!(
            "JWKS {} is already used by OIDC rotation {}",
            jwks_id, record.id
        )));
    }
    Ok(())
}
