//! JOSE algorithm, key use and JSON Web Key definitions
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


use crate::error::KeyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// JWA algorithm identifiers (RFC 7518 sections 3.1 and 4.1, RFC 8037)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    Hs256,
    Hs384,
    Hs512,
    Rs256,
    Rs384,
    Rs512,
    Ps256,
    Ps384,
    Ps512,
    Es256,
    Es384,
    Es512,
    EdDsa,
    Rsa1_5,
    RsaOaep,
    RsaOaep256,
    EcdhEs,
    EcdhEsA128Kw,
    EcdhEsA192Kw,
    EcdhEsA256Kw,
    /// Unsecured JWS; parsed so it can be refused explicitly
    None,
}

/// Elliptic curves used by the EC algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    P256,
    P384,
    P521,
}

impl Curve {
    /// JWK `crv` parameter
    pub fn name(&self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
            Curve::P521 => "P-521",
        }
    }

    /// Intrinsic key size in bits
    pub fn bits(&self) -> usize {
        match self {
            Curve::P256 => 256,
            Curve::P384 => 384,
            Curve::P521 => 521,
        }
    }
}

/// Key material family an algorithm needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    /// HMAC secret of the given length in bytes
    Hmac(usize),
    Rsa,
    /// ECDSA with a pinned curve
    Ecdsa(Curve),
    Ed25519,
    /// ECDH-ES key agreement; curve follows the configured size
    Ecdh,
    Unsupported,
}

const ALGORITHMS: [(Algorithm, &str); 21] = [
    (Algorithm::Hs256, "HS256"),
    (Algorithm::Hs384, "HS384"),
    (Algorithm::Hs512, "HS512"),
    (Algorithm::Rs256, "RS256"),
    (Algorithm::Rs384, "RS384"),
    (Algorithm::Rs512, "RS512"),
    (Algorithm::Ps256, "PS256"),
    (Algorithm::Ps384, "PS384"),
    (Algorithm::Ps512, "PS512"),
    (Algorithm::Es256, "ES256"),
    (Algorithm::Es384, "ES384"),
    (Algorithm::Es512, "ES512"),
    (Algorithm::EdDsa, "EdDSA"),
    (Algorithm::Rsa1_5, "RSA1_5"),
    (Algorithm::RsaOaep, "RSA-OAEP"),
    (Algorithm::RsaOaep256, "RSA-OAEP-256"),
    (Algorithm::EcdhEs, "ECDH-ES"),
    (Algorithm::EcdhEsA128Kw, "ECDH-ES+A128KW"),
    (Algorithm::EcdhEsA192Kw, "ECDH-ES+A192KW"),
    (Algorithm::EcdhEsA256Kw, "ECDH-ES+A256KW"),
    (Algorithm::None, "none"),
];

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        ALGORITHMS
            .iter()
            .find(|(alg, _)| alg == self)
            .map(|(_, name)| *name)
            .unwrap_or("none")
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            Algorithm::Hs256 => KeyFamily::Hmac(32),
            Algorithm::Hs384 => KeyFamily::Hmac(48),
            Algorithm::Hs512 => KeyFamily::Hmac(64),
            Algorithm::Rs256
            | Algorithm::Rs384
            | Algorithm::Rs512
            | Algorithm::Ps256
            | Algorithm::Ps384
            | Algorithm::Ps512
            | Algorithm::Rsa1_5
            | Algorithm::RsaOaep
            | Algorithm::RsaOaep256 => KeyFamily::Rsa,
            Algorithm::Es256 => KeyFamily::Ecdsa(Curve::P256),
            Algorithm::Es384 => KeyFamily::Ecdsa(Curve::P384),
            Algorithm::Es512 => KeyFamily::Ecdsa(Curve::P521),
            Algorithm::EdDsa => KeyFamily::Ed25519,
            Algorithm::EcdhEs
            | Algorithm::EcdhEsA128Kw
            | Algorithm::EcdhEsA192Kw
            | Algorithm::EcdhEsA256Kw => KeyFamily::Ecdh,
            Algorithm::None => KeyFamily::Unsupported,
        }
    }

    /// The `use` this algorithm is defined for, `None` for the unsecured algorithm
    pub fn intended_use(&self) -> Option<KeyUse> {
        match self {
            Algorithm::None => None,
            Algorithm::Rsa1_5
            | Algorithm::RsaOaep
            | Algorithm::RsaOaep256
            | Algorithm::EcdhEs
            | Algorithm::EcdhEsA128Kw
            | Algorithm::EcdhEsA192Kw
            | Algorithm::EcdhEsA256Kw => Some(KeyUse::Enc),
            _ => Some(KeyUse::Sig),
        }
    }

    pub fn is_symmetric(&self) -> bool {
        matches!(self.family(), KeyFamily::Hmac(_))
    }

    /// Asymmetric signature algorithms accepted for OIDC token signing
    pub fn is_oidc_signing(&self) -> bool {
        matches!(
            self.family(),
            KeyFamily::Rsa | KeyFamily::Ecdsa(_) | KeyFamily::Ed25519
        ) && self.intended_use() == Some(KeyUse::Sig)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALGORITHMS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(alg, _)| *alg)
            .ok_or_else(|| KeyError::UnsupportedAlgorithm(format!("unknown alg: {}", s)))
    }
}

impl TryFrom<String> for Algorithm {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(alg: Algorithm) -> Self {
        alg.as_str().to_string()
    }
}

/// Intended use of a key (RFC 7517 section 4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    Sig,
    Enc,
}

impl KeyUse {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUse::Sig => "sig",
            KeyUse::Enc => "enc",
        }
    }
}

impl fmt::Display for KeyUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyUse {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sig" => Ok(KeyUse::Sig),
            "enc" => Ok(KeyUse::Enc),
            other => Err(KeyError::IllegalArgument(format!(
                "unsupported intended use '{}', expected one of [sig, enc]",
                other
            ))),
        }
    }
}

/// JWK `kty` values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    #[serde(rename = "oct")]
    Oct,
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "OKP")]
    Okp,
}

/// A single JSON Web Key
///
/// Binary parameters are base64url without padding, as RFC 7518 requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: KeyKind,
    #[serde(rename = "use")]
    pub key_use: KeyUse,
    pub alg: Algorithm,
    pub kid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub d: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub q: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dq: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
}

impl Jwk {
    /// Empty key of the given type; callers fill in the parameters
    pub(crate) fn new(kty: KeyKind, alg: Algorithm, key_use: KeyUse, kid: String) -> Self {
        Self {
            kty,
            key_use,
            alg,
            kid,
            crv: None,
            x: None,
            y: None,
            n: None,
            e: None,
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: None,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.kty == KeyKind::Oct
    }

    /// Asymmetric key carrying public parameters only
    pub fn is_public(&self) -> bool {
        !self.is_symmetric() && self.d.is_none()
    }

    /// Asymmetric key carrying the private exponent / scalar
    pub fn is_private(&self) -> bool {
        !self.is_symmetric() && self.d.is_some()
    }

    /// Copy with every private parameter removed
    pub fn to_public(&self) -> Jwk {
        Jwk {
            d: None,
            p: None,
            q: None,
            dp: None,
            dq: None,
            qi: None,
            k: None,
            ..self.clone()
        }
    }
}

/// JSON Web Key Set (RFC 7517 section 5)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<Jwk>,
}

impl JsonWebKeySet {
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
