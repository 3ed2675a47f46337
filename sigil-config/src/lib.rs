//! Configuration management for Sigil key services

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;

/// Record store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Process-local, lost on exit (tests, dry runs)
    Memory,
    /// JSON files under a local directory
    Local,
}

/// Record store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub kind: StoreKind,
    pub path: PathBuf,
}

/// KMS provider used for newly created JWKS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KmsProvider {
    Db,
    Vault,
}

/// TLS settings for the Vault client
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VaultTlsConfig {
    /// Client certificate (PEM)
    pub cert: Option<PathBuf>,
    /// Client private key (PEM)
    pub key: Option<PathBuf>,
    /// Additional trust anchor (PEM)
    pub ca_cert: Option<PathBuf>,
    pub use_system_cert_pool: bool,
    pub insecure_skip_verify: bool,
}

/// Vault transit configuration
#[derive(Clone, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub token: String,
    pub timeout_seconds: u64,
    pub tls: VaultTlsConfig,
}

impl fmt::Debug for VaultConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultConfig")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("timeout_seconds", &self.timeout_seconds)
            .field("tls", &self.tls)
            .finish()
    }
}

/// KMS configuration
#[derive(Clone, Deserialize)]
pub struct KmsConfig {
    pub provider: KmsProvider,
    /// Provider segment of `db://<provider>?kms-keyset-id=...` URIs
    pub db_provider: String,
    /// Master keyset used to encrypt new JWKS (db provider)
    pub keyset_id: Option<String>,
    /// Operator secret protecting master keysets
    pub master_secret: Option<String>,
    pub vault: Option<VaultConfig>,
}

impl fmt::Debug for KmsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsConfig")
            .field("provider", &self.provider)
            .field("db_provider", &self.db_provider)
            .field("keyset_id", &self.keyset_id)
            .field(
                "master_secret",
                &self.master_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("vault", &self.vault)
            .finish()
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Console,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub kms: KmsConfig,
    /// RSA modulus size for generated keys (generator default when unset)
    pub rsa_bits: Option<usize>,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let store_kind = match env::var("SIGIL_STORE")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreKind::Memory,
            "local" => StoreKind::Local,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "SIGIL_STORE must be one of [memory, local], got {}",
                    other
                )))
            }
        };
        let store_path = env::var("SIGIL_STORE_PATH").unwrap_or_else(|_| "./sigil-data".to_string());

        let provider = match env::var("SIGIL_KMS_PROVIDER")
            .unwrap_or_else(|_| "db".to_string())
            .to_lowercase()
            .as_str()
        {
            "db" => KmsProvider::Db,
            "vault" | "hcvault" => KmsProvider::Vault,
            other => {
                return Err(config::ConfigError::Message(format!(
                    "SIGIL_KMS_PROVIDER must be one of [db, vault], got {}",
                    other
                )))
            }
        };

        // Vault settings are only read when a token is present
        let vault = match env::var("VAULT_TOKEN") {
            Ok(token) => Some(VaultConfig {
                address: env::var("VAULT_ADDR")
                    .unwrap_or_else(|_| "https://localhost:8201".to_string()),
                token,
                timeout_seconds: parse_var("VAULT_TIMEOUT")?.unwrap_or(30),
                tls: VaultTlsConfig {
                    cert: env::var("VAULT_TLS_CERT").ok().map(PathBuf::from),
                    key: env::var("VAULT_TLS_KEY").ok().map(PathBuf::from),
                    ca_cert: env::var("VAULT_TLS_CA_CERT").ok().map(PathBuf::from),
                    use_system_cert_pool: parse_var("VAULT_TLS_USE_SYSTEM_CERT_POOL")?
                        .unwrap_or(true),
                    insecure_skip_verify: parse_var("VAULT_TLS_INSECURE_SKIP_VERIFY")?
                        .unwrap_or(false),
                },
            }),
            Err(_) => None,
        };

        let log_format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "console".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            _ => LogFormat::Console,
        };

        let config = Self {
            store: StoreConfig {
                kind: store_kind,
                path: PathBuf::from(store_path),
            },
            kms: KmsConfig {
                provider,
                db_provider: env::var("SIGIL_KMS_DB_PROVIDER").unwrap_or_else(|_| "local".to_string()),
                keyset_id: env::var("SIGIL_KMS_KEYSET_ID").ok().filter(|s| !s.is_empty()),
                master_secret: env::var("SIGIL_KMS_MASTER_SECRET").ok().filter(|s| !s.is_empty()),
                vault,
            },
            rsa_bits: parse_var("SIGIL_RSA_BITS")?,
            log_level: Some(env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string())),
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.kms.provider == KmsProvider::Vault && self.kms.vault.is_none() {
            return Err(config::ConfigError::Message(
                "VAULT_TOKEN is required when SIGIL_KMS_PROVIDER=vault".to_string(),
            ));
        }
        if self.kms.db_provider.is_empty() {
            return Err(config::ConfigError::Message(
                "SIGIL_KMS_DB_PROVIDER must not be empty".to_string(),
            ));
        }
        if let Some(tls) = self.kms.vault.as_ref().map(|v| &v.tls) {
            if tls.cert.is_some() != tls.key.is_some() {
                return Err(config::ConfigError::Message(
                    "VAULT_TLS_CERT and VAULT_TLS_KEY must be set together".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>, config::ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            config::ConfigError::Message(format!("{} has an invalid value: {}", name, value))
        }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            store: StoreConfig {
                kind: StoreKind::Memory,
                path: PathBuf::from("./unused"),
            },
            kms: KmsConfig {
                provider: KmsProvider::Db,
                db_provider: "local".to_string(),
                keyset_id: None,
                master_secret: Some("hunter2".to_string()),
                vault: None,
            },
            rsa_bits: None,
            log_level: None,
            log_format: LogFormat::Console,
        }
    }

    #[test]
    fn test_log_level_default() {
        assert_eq!(base_config().log_level(), "info");
    }

    #[test]
    fn test_vault_provider_requires_vault_settings() {
        let mut config = base_config();
        config.kms.provider = KmsProvider::Vault;
        assert!(config.validate().is_err());

        config.kms.vault = Some(VaultConfig {
            address: "https://vault.internal:8200".to_string(),
            token: "s.token".to_string(),
            timeout_seconds: 30,
            tls: VaultTlsConfig::default(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_client_cert_requires_key() {
        let mut config = base_config();
        config.kms.vault = Some(VaultConfig {
            address: "https://vault.internal:8200".to_string(),
            token: "s.token".to_string(),
            timeout_seconds: 30,
            tls: VaultTlsConfig {
                cert: Some(PathBuf::from("client.pem")),
                ..VaultTlsConfig::default()
            },
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", base_config());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
