//! Key management for Sigil
//!
//! Generates JSON Web Keys, keeps them encrypted under a pluggable KMS and
//! rotates OIDC signing keys through a current/next/previous window.
//! Master keysets for the database KMS are themselves envelope-encrypted
//! under an operator secret.
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


pub mod error;
pub mod jwks_store;
pub mod key_types;
pub mod keygen;
pub mod kms;
pub mod local_store;
pub mod master_key;
pub mod memory_store;
pub mod oidc;
pub mod records;
pub mod service_integration;
pub mod store;

pub use error::{ErrorKind, KeyError, KeyResult};
pub use jwks_store::{DecryptedJwks, JwksStore, NewJwks};
pub use key_types::{Algorithm, JsonWebKeySet, Jwk, KeyKind, KeyUse};
pub use keygen::KeyGenerator;
pub use kms::{Aead, KmsBackend, KmsResolver};
pub use local_store::LocalStore;
pub use master_key::{MasterKeyManager, MasterKeyset};
pub use memory_store::MemoryStore;
pub use oidc::{NewRotation, OidcRotation, Rotation};
pub use records::{JwksRecord, MasterKeysetRecord, OidcRotationRecord, PageRequest, RecordList, RotationMode};
pub use service_integration::*;
pub use store::RecordStore;
