//! Key and key-pair generation per JOSE algorithm
//!
//! Produces RFC 7517 key sets: one `oct` key for HMAC algorithms, or a
//! `public-<kid>` / `private-<kid>` pair for asymmetric algorithms.
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
use crate::key_types::{Algorithm, Curve, JsonWebKeySet, Jwk, KeyFamily, KeyKind, KeyUse};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::RsaPrivateKey;
use zeroize::Zeroizing;

pub const RSA_DEFAULT_KEY_SIZE: usize = 4096;
pub const RSA_MIN_KEY_SIZE: usize = 2048;

pub const PUBLIC_KEY_ID_PREFIX: &str = "public-";
pub const PRIVATE_KEY_ID_PREFIX: &str = "private-";

/// Key generator
///
/// `bits` is an explicit per-request size and is checked against every
/// family; `rsa_default` only replaces the modulus size when `bits` is unset.
#[derive(Debug, Clone, Copy)]
pub struct KeyGenerator {
    bits: Option<usize>,
    rsa_default: usize,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self {
            bits: None,
            rsa_default: RSA_DEFAULT_KEY_SIZE,
        }
    }
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an explicit key size in bits
    pub fn with_bits(mut self, bits: usize) -> Self {
        self.bits = Some(bits);
        self
    }

    /// Default RSA modulus size used when no explicit size is requested
    pub fn with_rsa_default(mut self, bits: usize) -> Self {
        self.rsa_default = bits;
        self
    }

    /// Generate a key set for `alg` intended for `key_use`
    ///
    /// `kid` is the base key identifier; a UUID is used when absent or empty.
    pub fn generate(
        &self,
        kid: Option<&str>,
        alg: Algorithm,
        key_use: KeyUse,
    ) -> KeyResult<JsonWebKeySet> {
        let expected_use = alg.intended_use().ok_or_else(|| {
            KeyError::UnsupportedAlgorithm("unsecure 'none' algorithm is not supported".to_string())
        })?;
        if expected_use != key_use {
            return Err(KeyError::UnsupportedAlgorithm(format!(
                "alg {} requires use={}, got use={}",
                alg, expected_use, key_use
            )));
        }

        let kid = match kid {
            Some(kid) if !kid.is_empty() => kid.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        match alg.family() {
            KeyFamily::Hmac(len) => {
                let secret = random_bytes(len)?;
                let mut jwk = Jwk::new(KeyKind::Oct, alg, key_use, kid);
                jwk.k = Some(b64(&secret));
                Ok(JsonWebKeySet { keys: vec![jwk] })
            }
            KeyFamily::Rsa => {
                let bits = self.rsa_bits()?;
                Ok(key_pair(rsa_private_jwk(alg, key_use, bits)?, &kid))
            }
            KeyFamily::Ecdsa(curve) => {
                self.check_intrinsic(alg, curve.bits())?;
                Ok(key_pair(ec_private_jwk(alg, key_use, curve), &kid))
            }
            KeyFamily::Ed25519 => {
                self.check_intrinsic(alg, 256)?;
                Ok(key_pair(ed25519_private_jwk(alg, key_use), &kid))
            }
            KeyFamily::Ecdh => {
                let curve = match self.bits {
                    None | Some(256) => Curve::P256,
                    Some(384) => Curve::P384,
                    Some(521) => Curve::P521,
                    Some(other) => {
                        return Err(KeyError::KeySize(format!(
                            "unknown elliptic curve bit length {}, use one of 256, 384, 521",
                            other
                        )))
                    }
                };
                Ok(key_pair(ec_private_jwk(alg, key_use, curve), &kid))
            }
            KeyFamily::Unsupported => Err(KeyError::UnsupportedAlgorithm(format!(
                "unsupported alg: {}",
                alg
            ))),
        }
    }

    fn rsa_bits(&self) -> KeyResult<usize> {
        let bits = self.bits.unwrap_or(self.rsa_default);
        if bits < RSA_MIN_KEY_SIZE {
            return Err(KeyError::KeySize(format!(
                "too short key for RSA alg: {} bits, {}+ is required",
                bits, RSA_MIN_KEY_SIZE
            )));
        }
        Ok(bits)
    }

    fn check_intrinsic(&self, alg: Algorithm, intrinsic: usize) -> KeyResult<()> {
        match self.bits {
            Some(bits) if bits != intrinsic => Err(KeyError::KeySize(format!(
                "alg {} does not support arbitrary key length {}, only {}",
                alg, bits, intrinsic
            ))),
            _ => Ok(()),
        }
    }
}

/// Split a private JWK into the public/private pair sharing `kid`
fn key_pair(mut private: Jwk, kid: &str) -> JsonWebKeySet {
    let mut public = private.to_public();
    public.kid = format!("{}{}", PUBLIC_KEY_ID_PREFIX, kid);
    private.kid = format!("{}{}", PRIVATE_KEY_ID_PREFIX, kid);
    JsonWebKeySet {
        keys: vec![public, private],
    }
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn random_bytes(len: usize) -> KeyResult<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(vec![0u8; len]);
    OsRng
        .try_fill_bytes(&mut buf)
        .map_err(|e| KeyError::RandomSource(e.to_string()))?;
    Ok(buf)
}

fn rsa_private_jwk(alg: Algorithm, key_use: KeyUse, bits: usize) -> KeyResult<Jwk> {
    let key = RsaPrivateKey::new(&mut OsRng, bits)
        .map_err(|e| KeyError::Crypto(format!("RSA key generation failed: {}", e)))?;

    let (p, q) = match key.primes() {
        [p, q] => (p, q),
        _ => {
            return Err(KeyError::Crypto(
                "RSA key generation returned a multi-prime key".to_string(),
            ))
        }
    };
    let (dp, dq, qi) = match (key.dp(), key.dq(), key.qinv()) {
        (Some(dp), Some(dq), Some(qi)) => (dp, dq, qi),
        _ => {
            return Err(KeyError::Crypto(
                "RSA key is missing CRT parameters".to_string(),
            ))
        }
    };

    let mut jwk = Jwk::new(KeyKind::Rsa, alg, key_use, String::new());
    jwk.n = Some(b64(&key.n().to_bytes_be()));
    jwk.e = Some(b64(&key.e().to_bytes_be()));
    jwk.d = Some(b64(&Zeroizing::new(key.d().to_bytes_be())));
    jwk.p = Some(b64(&Zeroizing::new(p.to_bytes_be())));
    jwk.q = Some(b64(&Zeroizing::new(q.to_bytes_be())));
    jwk.dp = Some(b64(&Zeroizing::new(dp.to_bytes_be())));
    jwk.dq = Some(b64(&Zeroizing::new(dq.to_bytes_be())));
    jwk.qi = Some(b64(&Zeroizing::new(qi.to_bytes_be().1)));
    Ok(jwk)
}

macro_rules! ec_coordinates {
    ($curve:ident) => {{
        let secret = $curve::SecretKey::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        // Uncompressed points always carry both coordinates
        let x = point.x().map(|x| x.to_vec()).unwrap_or_default();
        let y = point.y().map(|y| y.to_vec()).unwrap_or_default();
        (x, y, Zeroizing::new(secret.to_bytes().to_vec()))
    }};
}

fn ec_private_jwk(alg: Algorithm, key_use: KeyUse, curve: Curve) -> Jwk {
    let (x, y, d) = match curve {
        Curve::P256 => ec_coordinates!(p256),
        Curve::P384 => ec_coordinates!(p384),
        Curve::P521 => ec_coordinates!(p521),
    };

    let mut jwk = Jwk::new(KeyKind::Ec, alg, key_use, String::new());
    jwk.crv = Some(curve.name().to_string());
    jwk.x = Some(b64(&x));
    jwk.y = Some(b64(&y));
    jwk.d = Some(b64(&d));
    jwk
}

fn ed25519_private_jwk(alg: Algorithm, key_use: KeyUse) -> Jwk {
    let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let seed = Zeroizing::new(signing_key.to_bytes());

    let mut jwk = Jwk::new(KeyKind::Okp, alg, key_use, String::new());
    jwk.crv = Some("Ed25519".to_string());
    jwk.x = Some(b64(signing_key.verifying_key().as_bytes()));
    jwk.d = Some(b64(&seed[..]));
    jwk
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded_len(value: &Option<String>) -> usize {
        URL_SAFE_NO_PAD
            .decode(value.as_deref().unwrap())
            .unwrap()
            .len()
    }

    fn assert_pair(keys: &JsonWebKeySet, kid: &str) {
        assert_eq!(keys.len(), 2);
        let public: Vec<_> = keys.keys.iter().filter(|k| k.is_public()).collect();
        let private: Vec<_> = keys.keys.iter().filter(|k| k.is_private()).collect();
        assert_eq!(public.len(), 1);
        assert_eq!(private.len(), 1);
        assert_eq!(public[0].kid, format!("public-{}", kid));
        assert_eq!(private[0].kid, format!("private-{}", kid));
    }

    const ALGORITHMS: [Algorithm; 21] = [
        Algorithm::Hs256,
        Algorithm::Hs384,
        Algorithm::Hs512,
        Algorithm::Rs256,
        Algorithm::Rs384,
        Algorithm::Rs512,
        Algorithm::Ps256,
        Algorithm::Ps384,
        Algorithm::Ps512,
        Algorithm::Es256,
        Algorithm::Es384,
        Algorithm::Es512,
        Algorithm::EdDsa,
        Algorithm::Rsa1_5,
        Algorithm::RsaOaep,
        Algorithm::RsaOaep256,
        Algorithm::EcdhEs,
        Algorithm::EcdhEsA128Kw,
        Algorithm::EcdhEsA192Kw,
        Algorithm::EcdhEsA256Kw,
        Algorithm::None,
    ];

    #[test]
    fn test_every_asymmetric_algorithm_yields_a_pair() {
        let gen = KeyGenerator::new().with_rsa_default(2048);
        let mut generated = 0;
        for alg in ALGORITHMS {
            let Some(key_use) = alg.intended_use() else {
                continue;
            };
            if alg.is_symmetric() {
                continue;
            }
            let keys = gen.generate(Some("kid"), alg, key_use).unwrap();
            assert_pair(&keys, "kid");
            assert!(keys.keys.iter().all(|k| k.alg == alg && k.key_use == key_use));
            generated += 1;
        }
        assert_eq!(generated, 17);
    }

    #[test]
    fn test_hmac_key_lengths() {
        let gen = KeyGenerator::new();
        for (alg, len) in [
            (Algorithm::Hs256, 32),
            (Algorithm::Hs384, 48),
            (Algorithm::Hs512, 64),
        ] {
            let keys = gen.generate(Some("hmac"), alg, KeyUse::Sig).unwrap();
            assert_eq!(keys.len(), 1);
            assert_eq!(keys.keys[0].kid, "hmac");
            assert_eq!(keys.keys[0].kty, KeyKind::Oct);
            assert_eq!(decoded_len(&keys.keys[0].k), len);
        }
    }

    #[test]
    fn test_hmac_keys_are_random() {
        let gen = KeyGenerator::new();
        let a = gen.generate(None, Algorithm::Hs256, KeyUse::Sig).unwrap();
        let b = gen.generate(None, Algorithm::Hs256, KeyUse::Sig).unwrap();
        assert_ne!(a.keys[0].k, b.keys[0].k);
        assert_ne!(a.keys[0].kid, b.keys[0].kid);
    }

    #[test]
    fn test_ecdsa_pairs() {
        let gen = KeyGenerator::new();
        for (alg, crv, coord_len) in [
            (Algorithm::Es256, "P-256", 32),
            (Algorithm::Es384, "P-384", 48),
            (Algorithm::Es512, "P-521", 66),
        ] {
            let keys = gen.generate(Some("ec"), alg, KeyUse::Sig).unwrap();
            assert_pair(&keys, "ec");
            let public = keys.find("public-ec").unwrap();
            assert_eq!(public.crv.as_deref(), Some(crv));
            assert_eq!(decoded_len(&public.x), coord_len);
            assert_eq!(decoded_len(&public.y), coord_len);
            assert_eq!(keys.find("private-ec").unwrap().x, public.x);
        }
    }

    #[test]
    fn test_eddsa_pair() {
        let keys = KeyGenerator::new()
            .generate(Some("ed"), Algorithm::EdDsa, KeyUse::Sig)
            .unwrap();
        assert_pair(&keys, "ed");
        let private = keys.find("private-ed").unwrap();
        assert_eq!(private.kty, KeyKind::Okp);
        assert_eq!(decoded_len(&private.d), 32);
        assert_eq!(decoded_len(&private.x), 32);
    }

    #[test]
    fn test_rsa_pair() {
        let keys = KeyGenerator::new()
            .with_bits(2048)
            .generate(Some("rsa"), Algorithm::Ps256, KeyUse::Sig)
            .unwrap();
        assert_pair(&keys, "rsa");
        let public = keys.find("public-rsa").unwrap();
        assert_eq!(decoded_len(&public.n), 256);
        assert_eq!(public.e.as_deref(), Some("AQAB"));
        assert!(public.p.is_none() && public.qi.is_none());
        let private = keys.find("private-rsa").unwrap();
        assert!(private.p.is_some() && private.dp.is_some() && private.qi.is_some());
    }

    #[test]
    fn test_rsa_encryption_pair() {
        let keys = KeyGenerator::new()
            .with_rsa_default(2048)
            .generate(Some("wrap"), Algorithm::RsaOaep256, KeyUse::Enc)
            .unwrap();
        assert_pair(&keys, "wrap");
        assert!(keys.keys.iter().all(|k| k.key_use == KeyUse::Enc));
    }

    #[test]
    fn test_rsa_too_short() {
        let err = KeyGenerator::new()
            .with_bits(1024)
            .generate(None, Algorithm::Rs256, KeyUse::Sig)
            .unwrap_err();
        assert!(matches!(err, KeyError::KeySize(_)));
    }

    #[test]
    fn test_ecdsa_rejects_mismatched_bits() {
        let gen = KeyGenerator::new().with_bits(384);
        assert!(matches!(
            gen.generate(None, Algorithm::Es256, KeyUse::Sig),
            Err(KeyError::KeySize(_))
        ));
        assert!(gen.generate(None, Algorithm::Es384, KeyUse::Sig).is_ok());
        assert!(matches!(
            KeyGenerator::new()
                .with_bits(512)
                .generate(None, Algorithm::Es512, KeyUse::Sig),
            Err(KeyError::KeySize(_))
        ));
    }

    #[test]
    fn test_ecdh_curve_follows_bits() {
        let keys = KeyGenerator::new()
            .with_bits(521)
            .generate(Some("agree"), Algorithm::EcdhEsA256Kw, KeyUse::Enc)
            .unwrap();
        assert_eq!(keys.keys[0].crv.as_deref(), Some("P-521"));

        assert!(matches!(
            KeyGenerator::new()
                .with_bits(224)
                .generate(None, Algorithm::EcdhEs, KeyUse::Enc),
            Err(KeyError::KeySize(_))
        ));
    }

    #[test]
    fn test_none_is_rejected() {
        for key_use in [KeyUse::Sig, KeyUse::Enc] {
            let err = KeyGenerator::new()
                .generate(Some("x"), Algorithm::None, key_use)
                .unwrap_err();
            assert!(matches!(err, KeyError::UnsupportedAlgorithm(_)));
        }
    }

    #[test]
    fn test_algorithm_use_mismatch() {
        let gen = KeyGenerator::new();
        assert!(matches!(
            gen.generate(None, Algorithm::Hs256, KeyUse::Enc),
            Err(KeyError::UnsupportedAlgorithm(_))
        ));
        assert!(matches!(
            gen.generate(None, Algorithm::EcdhEs, KeyUse::Sig),
            Err(KeyError::UnsupportedAlgorithm(_))
        ));
    }
}
