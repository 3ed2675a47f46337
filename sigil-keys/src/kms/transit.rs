//! Vault transit backend
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


use super::{strip_scheme, Aead};
use crate::error::{KeyError, KeyResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use sigil_config::VaultConfig;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use zeroize::Zeroizing;

const SCHEME: &str = "hcvault";

/// Host placeholder used in stored key URIs
pub const REFERENCE_HOST: &str = "vault";

/// Transit key name prefix for JWKS keys
pub const JWKS_KEY_PREFIX: &str = "sigil-jwks-";

/// Remote transit encryption engine
#[async_trait]
pub trait TransitClient: Send + Sync {
    /// Encrypt with the key at `key_path` (`<mount>/keys/<name>`)
    async fn encrypt(&self, key_path: &str, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>>;

    /// Decrypt with the key at `key_path` (`<mount>/keys/<name>`)
    async fn decrypt(&self, key_path: &str, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>>;
}

/// KMS backed by a Vault transit engine
///
/// Stored key URIs use the placeholder host `vault` so records stay valid
/// when the Vault address changes; the real host is substituted on resolve.
#[derive(Clone)]
pub struct TransitKms {
    host: String,
    client: Arc<dyn TransitClient>,
}

impl fmt::Debug for TransitKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransitKms").field("host", &self.host).finish()
    }
}

impl TransitKms {
    pub fn new(host: &str, client: Arc<dyn TransitClient>) -> Self {
        Self {
            host: host.to_string(),
            client,
        }
    }

    /// Backend for the configured Vault server
    pub fn from_config(config: &VaultConfig) -> KeyResult<Self> {
        let base_url = vault_base_url(&config.address)?;
        let host = host_of(&base_url)?;
        let client = VaultTransitClient::new(config, base_url)?;
        info!(host = %host, "Using Vault transit KMS");
        Ok(Self::new(&host, Arc::new(client)))
    }

    /// Replace the real host with the placeholder host
    pub fn to_reference(&self, key_uri: &str) -> KeyResult<String> {
        let path = self.key_path_for_host(key_uri, &self.host)?;
        Ok(format!("{}://{}/{}", SCHEME, REFERENCE_HOST, path))
    }

    /// Replace the placeholder host with the real host
    pub fn from_reference(&self, reference: &str) -> KeyResult<String> {
        let path = self.key_path_for_host(reference, REFERENCE_HOST)?;
        Ok(format!("{}://{}/{}", SCHEME, self.host, path))
    }

    pub(crate) fn supports(&self, key_uri: &str) -> bool {
        strip_scheme(key_uri, SCHEME)
            .and_then(|rest| rest.split_once('/'))
            .map_or(false, |(host, _)| host == REFERENCE_HOST || host == self.host)
    }

    pub(crate) fn cipher(&self, key_uri: &str) -> KeyResult<Arc<dyn Aead>> {
        let key_uri = if self.key_path_for_host(key_uri, REFERENCE_HOST).is_ok() {
            self.from_reference(key_uri)?
        } else {
            key_uri.to_string()
        };
        let key_path = self.key_path_for_host(&key_uri, &self.host)?;
        Ok(Arc::new(TransitCipher {
            client: self.client.clone(),
            key_path: key_path.to_string(),
        }))
    }

    pub(crate) fn new_cipher(&self, jwks_id: &str) -> KeyResult<(Arc<dyn Aead>, String)> {
        let key_uri = format!(
            "{}://{}/transit/keys/{}{}",
            SCHEME, self.host, JWKS_KEY_PREFIX, jwks_id
        );
        let cipher = self.cipher(&key_uri)?;
        Ok((cipher, self.to_reference(&key_uri)?))
    }

    fn key_path_for_host<'a>(&self, key_uri: &'a str, host: &str) -> KeyResult<&'a str> {
        strip_scheme(key_uri, SCHEME)
            .and_then(|rest| rest.split_once('/'))
            .filter(|(uri_host, path)| *uri_host == host && path.contains("/keys/"))
            .map(|(_, path)| path)
            .ok_or_else(|| {
                KeyError::UnsupportedProvider(format!(
                    "key URI {} is not a transit key on {}",
                    key_uri, host
                ))
            })
    }
}

struct TransitCipher {
    client: Arc<dyn TransitClient>,
    key_path: String,
}

#[async_trait]
impl Aead for TransitCipher {
    async fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        self.client.encrypt(&self.key_path, plaintext, associated_data).await
    }

    async fn decrypt(&self, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        self.client.decrypt(&self.key_path, ciphertext, associated_data).await
    }
}

/// Normalize the configured address; only https is accepted
fn vault_base_url(address: &str) -> KeyResult<reqwest::Url> {
    let address = if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    };
    let url = reqwest::Url::parse(&address)
        .map_err(|e| KeyError::Configuration(format!("invalid Vault address {}: {}", address, e)))?;
    if url.scheme() != "https" {
        return Err(KeyError::Configuration(format!(
            "Vault address with https scheme expected, but got {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn host_of(url: &reqwest::Url) -> KeyResult<String> {
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| KeyError::Configuration(format!("Vault address {} has no host", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// Split `<mount>/keys/<name>` into mount and key name
fn split_key_path(key_path: &str) -> KeyResult<(&str, &str)> {
    key_path
        .split_once("/keys/")
        .filter(|(mount, name)| !mount.is_empty() && !name.is_empty())
        .ok_or_else(|| KeyError::IllegalArgument(format!("invalid transit key path {}", key_path)))
}

/// Transit client speaking the Vault HTTP API
pub struct VaultTransitClient {
    client: reqwest::Client,
    base_url: reqwest::Url,
    token: Zeroizing<String>,
}

impl fmt::Debug for VaultTransitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultTransitClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Deserialize)]
struct EncryptData {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptData {
    plaintext: String,
}

impl VaultTransitClient {
    fn new(config: &VaultConfig, base_url: reqwest::Url) -> KeyResult<Self> {
        let tls = &config.tls;
        let mut builder = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .use_rustls_tls()
            .tls_built_in_root_certs(tls.use_system_cert_pool)
            .danger_accept_invalid_certs(tls.insecure_skip_verify);

        if let Some(ca_cert) = &tls.ca_cert {
            let pem = std::fs::read(ca_cert)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| KeyError::Configuration(format!("invalid Vault CA cert: {}", e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&tls.cert, &tls.key) {
            let mut pem = std::fs::read(key)?;
            pem.extend_from_slice(&std::fs::read(cert)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| KeyError::Configuration(format!("invalid Vault client cert: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| KeyError::Configuration(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            token: Zeroizing::new(config.token.clone()),
        })
    }

    fn endpoint(&self, key_path: &str, operation: &str) -> KeyResult<reqwest::Url> {
        let (mount, name) = split_key_path(key_path)?;
        self.base_url
            .join(&format!("v1/{}/{}/{}", mount, operation, name))
            .map_err(|e| KeyError::IllegalArgument(format!("invalid transit key path {}: {}", key_path, e)))
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        url: reqwest::Url,
        body: serde_json::Value,
    ) -> KeyResult<T> {
        debug!(url = %url, "Calling Vault transit");
        let response = self
            .client
            .post(url)
            .header("X-Vault-Token", self.token.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| KeyError::Kms(format!("Vault request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(KeyError::Kms(format!(
                "Vault transit error ({}): {}",
                status, error_text
            )));
        }

        let result: VaultResponse<T> = response
            .json()
            .await
            .map_err(|e| KeyError::Kms(format!("invalid Vault response: {}", e)))?;
        Ok(result.data)
    }
}

fn request_body(field: &str, value: String, associated_data: &[u8]) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert(field.to_string(), serde_json::Value::String(value));
    if !associated_data.is_empty() {
        body.insert(
            "context".to_string(),
            serde_json::Value::String(STANDARD.encode(associated_data)),
        );
    }
    serde_json::Value::Object(body)
}

#[async_trait]
impl TransitClient for VaultTransitClient {
    async fn encrypt(&self, key_path: &str, plaintext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        let url = self.endpoint(key_path, "encrypt")?;
        let body = request_body("plaintext", STANDARD.encode(plaintext), associated_data);
        let data: EncryptData = self.post(url, body).await?;
        Ok(data.ciphertext.into_bytes())
    }

    async fn decrypt(&self, key_path: &str, ciphertext: &[u8], associated_data: &[u8]) -> KeyResult<Vec<u8>> {
        let url = self.endpoint(key_path, "decrypt")?;
        let ciphertext = String::from_utf8(ciphertext.to_vec())
            .map_err(|_| KeyError::Crypto("transit ciphertext is not UTF-8".to_string()))?;
        let body = request_body("ciphertext", ciphertext, associated_data);
        let data: DecryptData = self.post(url, body).await?;
        STANDARD
            .decode(data.plaintext)
            .map_err(|e| KeyError::Kms(format!("invalid plaintext from Vault: {}", e)))
    }
}
