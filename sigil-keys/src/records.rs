//! Persisted record types
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


use crate::key_types::{Algorithm, KeyUse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Longest representable rotation period, in seconds
const MAX_ROTATION_PERIOD: u64 = 1 << 40;

/// Envelope-encrypted master keyset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeysetRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    /// Keyset intended to supersede this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_id: Option<String>,
    #[serde(with = "base64_bytes")]
    pub encrypted_keyset: Vec<u8>,
    pub description: String,
}

/// Encrypted JSON Web Key Set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwksRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub kid: String,
    pub alg: Algorithm,
    #[serde(rename = "use")]
    pub key_use: KeyUse,
    /// Reference URI; never contains a remote KMS host
    pub kms_key_uri: String,
    #[serde(with = "base64_bytes")]
    pub encrypted_jwks: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Rotated only on operator request
    Manual,
    /// Due for rotation once `rotation_period` seconds have passed
    Periodic,
}

/// Current/next/previous signing key window of one OIDC key group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcRotationRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub current_jwks_id: String,
    pub next_jwks_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_jwks_id: Option<String>,
    pub rotation_mode: RotationMode,
    /// Seconds
    pub rotation_period: u64,
    pub last_rotated: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub version: u64,
}

impl OidcRotationRecord {
    /// JWKS ids currently referenced by the window
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        [
            Some(self.current_jwks_id.as_str()),
            Some(self.next_jwks_id.as_str()),
            self.previous_jwks_id.as_deref(),
        ]
        .into_iter()
        .flatten()
    }

    pub fn references(&self, jwks_id: &str) -> bool {
        self.slots().any(|slot| slot == jwks_id)
    }

    pub fn is_rotation_due(&self, now: DateTime<Utc>) -> bool {
        match self.rotation_mode {
            RotationMode::Manual => false,
            RotationMode::Periodic => {
                let period = Duration::seconds(self.rotation_period.min(MAX_ROTATION_PERIOD) as i64);
                self.last_rotated
                    .checked_add_signed(period)
                    .map_or(false, |due| due <= now)
            }
        }
    }
}

/// Offset/limit window for list operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl PageRequest {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self {
            offset: Some(offset),
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordList<T> {
    pub items: Vec<T>,
    pub page: Page,
}

impl<T> RecordList<T> {
    /// Apply `page` to records already sorted in list order
    pub fn paginate(all: Vec<T>, page: PageRequest) -> Self {
        let total = all.len() as u64;
        let offset = page.offset.unwrap_or(0).min(total) as usize;
        let limit = page.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            items,
            page: Page {
                offset: page.offset,
                limit: page.limit,
                total,
            },
        }
    }
}

/// Standard base64 for binary record fields in JSON
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
