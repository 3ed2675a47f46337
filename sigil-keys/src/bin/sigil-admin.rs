//! Sigil administration tool
//!
//! Manages master keysets, encrypted JWKS and OIDC signing key rotation.
//! Results are printed as JSON on stdout; logs go to stderr.
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


use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sigil_config::{AppConfig, LogFormat};
use sigil_keys::{
    init_key_services, init_record_store, Algorithm, ErrorKind, KeyError, KeyUse,
    MasterKeyManager, NewJwks, NewRotation, PageRequest, Rotation, RotationMode,
};
use sigil_logging::{init_logging, Output};
use std::process::ExitCode;
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "sigil-admin", version, about = "Sigil key management tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Master keysets for the db KMS
    #[command(subcommand)]
    Mk(MkCommand),
    /// Encrypted JSON Web Key Sets
    #[command(subcommand)]
    Jwks(JwksCommand),
    /// OIDC signing key rotation groups
    #[command(subcommand)]
    Oidc(OidcCommand),
}

#[derive(Args, Debug)]
struct PageArgs {
    #[arg(long)]
    offset: Option<u64>,
    #[arg(long)]
    limit: Option<u64>,
}

impl From<PageArgs> for PageRequest {
    fn from(args: PageArgs) -> Self {
        PageRequest {
            offset: args.offset,
            limit: args.limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum MkCommand {
    /// Create a master keyset encrypted under SIGIL_KMS_MASTER_SECRET
    Create {
        #[arg(long)]
        name: Option<String>,
        /// Keyset intended to supersede this one
        #[arg(long)]
        next_id: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    Get {
        id: String,
        /// Check that the master secret opens the keyset
        #[arg(long, default_value_t = false)]
        verify: bool,
    },
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    Delete { id: String },
}

/// JWKS lookup by record id or by `(kid, use)`
#[derive(Args, Debug)]
struct JwksSelector {
    #[arg(required_unless_present = "kid", conflicts_with = "kid")]
    id: Option<String>,
    #[arg(long)]
    kid: Option<String>,
    #[arg(long = "use", default_value = "sig")]
    key_use: KeyUse,
}

#[derive(Subcommand, Debug)]
enum JwksCommand {
    Create {
        #[arg(long)]
        id: Option<String>,
        /// Base key identifier; generated when absent
        #[arg(long)]
        kid: Option<String>,
        /// RFC 7518 algorithm, e.g. RS256, ES256, EdDSA, HS256, RSA-OAEP
        #[arg(long, default_value = "RS256")]
        alg: Algorithm,
        #[arg(long = "use", default_value = "sig")]
        key_use: KeyUse,
        /// Key size in bits (RSA modulus or ECDH curve)
        #[arg(long)]
        bits: Option<usize>,
        #[arg(long)]
        description: Option<String>,
    },
    Get {
        #[command(flatten)]
        selector: JwksSelector,
        /// Print only the public key
        #[arg(long, default_value_t = false)]
        public: bool,
    },
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    Delete {
        #[command(flatten)]
        selector: JwksSelector,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    Manual,
    Periodic,
}

impl From<ModeArg> for RotationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Manual => RotationMode::Manual,
            ModeArg::Periodic => RotationMode::Periodic,
        }
    }
}

#[derive(Subcommand, Debug)]
enum OidcCommand {
    Create {
        #[arg(long)]
        id: Option<String>,
        /// Existing JWKS for the current slot; minted when absent
        #[arg(long)]
        current: Option<String>,
        /// Existing JWKS for the next slot; minted when absent
        #[arg(long)]
        next: Option<String>,
        #[arg(long, default_value = "RS256")]
        alg: Algorithm,
        #[arg(long, value_enum, default_value_t = ModeArg::Manual)]
        mode: ModeArg,
        /// Seconds between periodic rotations
        #[arg(long, default_value_t = 0)]
        period: u64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Advance the window, or replace current and next with --revoke
    Rotate {
        id: String,
        #[arg(long, default_value_t = false)]
        revoke: bool,
        /// New current JWKS (revoke only); minted when absent
        #[arg(long, requires = "revoke")]
        current: Option<String>,
        /// New next JWKS; minted when absent
        #[arg(long)]
        next: Option<String>,
        #[arg(long, default_value = "RS256")]
        alg: Algorithm,
        /// Advance only if the rotation period has elapsed
        #[arg(long, default_value_t = false, conflicts_with_all = ["revoke", "next", "current"])]
        if_due: bool,
    },
    Get { id: String },
    /// Print the public JWKS of a group
    Publish { id: String },
    List {
        #[command(flatten)]
        page: PageArgs,
    },
    Delete { id: String },
}

fn missing_selector() -> anyhow::Error {
    KeyError::IllegalArgument("a JWKS id or --kid is required".to_string()).into()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_mk(config: &AppConfig, command: MkCommand) -> anyhow::Result<()> {
    let store = init_record_store(&config.store).await?;
    let manager = MasterKeyManager::new(store);
    let secret = || {
        config.kms.master_secret.clone().ok_or_else(|| {
            KeyError::IllegalArgument("SIGIL_KMS_MASTER_SECRET is not set".to_string())
        })
    };

    match command {
        MkCommand::Create {
            name,
            next_id,
            description,
        } => {
            let record = manager
                .create(
                    name.as_deref(),
                    &secret()?,
                    next_id.as_deref(),
                    description.as_deref(),
                )
                .await?;
            print_json(&record)
        }
        MkCommand::Get { id, verify } => {
            if verify {
                let keyset = manager.decrypt(&id, &secret()?).await?;
                debug!(primary_key_id = keyset.primary_key_id(), "Master keyset verified");
            }
            print_json(&manager.get(&id).await?)
        }
        MkCommand::List { page } => print_json(&manager.list(page.into()).await?),
        MkCommand::Delete { id } => {
            manager.delete(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

async fn run_jwks(config: &AppConfig, command: JwksCommand) -> anyhow::Result<()> {
    let services = init_key_services(config).await?;
    let jwks = services.jwks;

    match command {
        JwksCommand::Create {
            id,
            kid,
            alg,
            key_use,
            bits,
            description,
        } => {
            let record = jwks
                .create(NewJwks {
                    id,
                    kid,
                    alg,
                    key_use,
                    bits,
                    description,
                })
                .await?;
            print_json(&record)
        }
        JwksCommand::Get { selector, public } => {
            let decrypted = match (&selector.id, &selector.kid) {
                (Some(id), _) => jwks.get(id).await?,
                (None, Some(kid)) => jwks.get_by_kid_use(kid, selector.key_use).await?,
                (None, None) => return Err(missing_selector()),
            };
            if public {
                let key = decrypted.public_key().ok_or_else(|| {
                    KeyError::IllegalArgument(format!(
                        "JWKS {} is symmetric and has no public key",
                        decrypted.record.id
                    ))
                })?;
                print_json(key)
            } else {
                print_json(&serde_json::json!({
                    "record": decrypted.record,
                    "jwks": decrypted.keys,
                }))
            }
        }
        JwksCommand::List { page } => print_json(&jwks.list(page.into()).await?),
        JwksCommand::Delete { selector } => {
            match (&selector.id, &selector.kid) {
                (Some(id), _) => jwks.delete(id).await?,
                (None, Some(kid)) => jwks.delete_by_kid_use(kid, selector.key_use).await?,
                (None, None) => return Err(missing_selector()),
            }
            print_json(&serde_json::json!({
                "deleted": selector.id.or(selector.kid),
            }))
        }
    }
}

async fn run_oidc(config: &AppConfig, command: OidcCommand) -> anyhow::Result<()> {
    let services = init_key_services(config).await?;
    let oidc = services.oidc;

    match command {
        OidcCommand::Create {
            id,
            current,
            next,
            alg,
            mode,
            period,
            description,
        } => {
            let record = oidc
                .create(NewRotation {
                    id,
                    current_jwks_id: current,
                    next_jwks_id: next,
                    alg,
                    rotation_mode: mode.into(),
                    rotation_period: period,
                    description,
                })
                .await?;
            print_json(&record)
        }
        OidcCommand::Rotate {
            id,
            revoke,
            current,
            next,
            alg,
            if_due,
        } => {
            if if_due {
                return match oidc.rotate_if_due(&id, chrono::Utc::now()).await? {
                    Some(record) => print_json(&record),
                    None => print_json(&oidc.get(&id).await?),
                };
            }
            let rotation = if revoke {
                Rotation::Revoke {
                    current_jwks_id: current,
                    next_jwks_id: next,
                    alg,
                }
            } else {
                Rotation::Advance {
                    next_jwks_id: next,
                    alg,
                }
            };
            print_json(&oidc.rotate(&id, rotation).await?)
        }
        OidcCommand::Get { id } => print_json(&oidc.get(&id).await?),
        OidcCommand::Publish { id } => print_json(&oidc.publish(&id).await?),
        OidcCommand::List { page } => print_json(&oidc.list(page.into()).await?),
        OidcCommand::Delete { id } => {
            oidc.delete(&id).await?;
            print_json(&serde_json::json!({ "deleted": id }))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let Some(key_error) = err.downcast_ref::<KeyError>() else {
        return 1;
    };
    match key_error.kind() {
        ErrorKind::IllegalArgument => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::AlreadyExists => 4,
        ErrorKind::UnsupportedAlgorithm => 5,
        ErrorKind::CryptoFailure => 6,
        ErrorKind::InvariantViolation => 7,
        ErrorKind::Backend => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::from(2);
        }
    };

    let output = match config.log_format {
        LogFormat::Json => Output::Json,
        LogFormat::Console => Output::Console,
    };
    init_logging("sigil-admin", config.log_level(), output);

    let result = match cli.command {
        Command::Mk(command) => run_mk(&config, command).await,
        Command::Jwks(command) => run_jwks(&config, command).await,
        Command::Oidc(command) => run_oidc(&config, command).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}
