//! Error types for key management
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


use thiserror::Error;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unsupported KMS provider for key URI: {0}")]
    UnsupportedProvider(String),

    #[error("Cryptographic failure: {0}")]
    Crypto(String),

    #[error("Invalid key size: {0}")]
    KeySize(String),

    #[error("Random source failure: {0}")]
    RandomSource(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Concurrent modification: {0}")]
    Conflict(String),

    #[error("KMS error: {0}")]
    Kms(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of [`KeyError`], stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    IllegalArgument,
    NotFound,
    AlreadyExists,
    UnsupportedAlgorithm,
    CryptoFailure,
    InvariantViolation,
    Backend,
}

impl KeyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeyError::IllegalArgument(_) | KeyError::Configuration(_) => ErrorKind::IllegalArgument,
            KeyError::NotFound(_) => ErrorKind::NotFound,
            KeyError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            KeyError::UnsupportedAlgorithm(_) | KeyError::UnsupportedProvider(_) => {
                ErrorKind::UnsupportedAlgorithm
            }
            KeyError::Crypto(_) | KeyError::KeySize(_) | KeyError::RandomSource(_) => {
                ErrorKind::CryptoFailure
            }
            KeyError::InvariantViolation(_) | KeyError::Conflict(_) => ErrorKind::InvariantViolation,
            KeyError::Kms(_) | KeyError::Io(_) | KeyError::Serialization(_) => ErrorKind::Backend,
        }
    }
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_variants_share_kind() {
        assert_eq!(KeyError::Crypto("tag".into()).kind(), ErrorKind::CryptoFailure);
        assert_eq!(KeyError::KeySize("1024".into()).kind(), ErrorKind::CryptoFailure);
        assert_eq!(KeyError::RandomSource("eof".into()).kind(), ErrorKind::CryptoFailure);
    }

    #[test]
    fn test_conflict_is_invariant_violation() {
        assert_eq!(
            KeyError::Conflict("oidc-1".into()).kind(),
            ErrorKind::InvariantViolation
        );
    }
}
