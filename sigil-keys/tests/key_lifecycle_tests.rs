//! End-to-end key lifecycle tests

use sigil_config::{AppConfig, KmsConfig, KmsProvider, LogFormat, StoreConfig, StoreKind};
use sigil_keys::{
    init_key_services, init_record_store, Algorithm, KeyError, KeyUse, MasterKeyManager, NewJwks,
    NewRotation, PageRequest, Rotation,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const SECRET: &str = "integration-secret";

fn app_config(path: &Path, keyset_id: Option<String>) -> AppConfig {
    AppConfig {
        store: StoreConfig {
            kind: StoreKind::Local,
            path: path.to_path_buf(),
        },
        kms: KmsConfig {
            provider: KmsProvider::Db,
            db_provider: "local".to_string(),
            keyset_id,
            master_secret: Some(SECRET.to_string()),
            vault: None,
        },
        rsa_bits: Some(2048),
        log_level: None,
        log_format: LogFormat::Console,
    }
}

async fn create_master_keyset(path: &Path) -> String {
    let store_config = StoreConfig {
        kind: StoreKind::Local,
        path: path.to_path_buf(),
    };
    let store = init_record_store(&store_config).await.unwrap();
    MasterKeyManager::new(store)
        .create(Some("default"), SECRET, None, None)
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_oidc_lifecycle_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let keyset_id = create_master_keyset(temp_dir.path()).await;
    let config = app_config(temp_dir.path(), Some(keyset_id.clone()));

    let group = {
        let services = init_key_services(&config).await.unwrap();
        let group = services.oidc.create(NewRotation::new(Algorithm::Rs256)).await.unwrap();
        let group = services
            .oidc
            .rotate(
                &group.id,
                Rotation::Advance {
                    next_jwks_id: None,
                    alg: Algorithm::Es384,
                },
            )
            .await
            .unwrap();
        assert_eq!(group.version, 1);
        group
    };

    let services = init_key_services(&config).await.unwrap();
    assert_eq!(services.oidc.get(&group.id).await.unwrap(), group);

    let published = services.oidc.publish(&group.id).await.unwrap();
    assert_eq!(published.len(), 3);
    assert!(published.keys.iter().all(|k| k.d.is_none()));
    assert_eq!(published.keys[1].alg, Algorithm::Es384);

    let record = services.jwks.get(&group.current_jwks_id).await.unwrap().record;
    assert_eq!(
        record.kms_key_uri,
        format!("db://local?kms-keyset-id={}", keyset_id)
    );
}

#[tokio::test]
async fn test_jwks_unreadable_without_master_secret() {
    let temp_dir = TempDir::new().unwrap();
    let keyset_id = create_master_keyset(temp_dir.path()).await;
    let config = app_config(temp_dir.path(), Some(keyset_id));

    let services = init_key_services(&config).await.unwrap();
    let mut request = NewJwks::new(Algorithm::Hs512, KeyUse::Sig);
    request.kid = Some("hmac".to_string());
    let record = services.jwks.create(request).await.unwrap();
    drop(services);

    let mut wrong = config.clone();
    wrong.kms.master_secret = Some("another-secret".to_string());
    let services = init_key_services(&wrong).await.unwrap();
    let err = services.jwks.get(&record.id).await.unwrap_err();
    assert!(matches!(err, KeyError::Crypto(_)));

    let services = init_key_services(&config).await.unwrap();
    let decrypted = services.jwks.get_by_kid_use("hmac", KeyUse::Sig).await.unwrap();
    assert_eq!(decrypted.record.id, record.id);
}

#[tokio::test]
async fn test_new_jwks_requires_master_keyset() {
    let temp_dir = TempDir::new().unwrap();
    let services = init_key_services(&app_config(temp_dir.path(), None)).await.unwrap();
    let err = services
        .jwks
        .create(NewJwks::new(Algorithm::Es256, KeyUse::Sig))
        .await
        .unwrap_err();
    assert!(matches!(err, KeyError::Configuration(_)));

    let services = init_key_services(&app_config(temp_dir.path(), Some("missing".to_string())))
        .await
        .unwrap();
    let err = services
        .jwks
        .create(NewJwks::new(Algorithm::Es256, KeyUse::Sig))
        .await
        .unwrap_err();
    assert!(matches!(err, KeyError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_rotations_keep_version_consistent() {
    let temp_dir = TempDir::new().unwrap();
    let keyset_id = create_master_keyset(temp_dir.path()).await;
    let services = init_key_services(&app_config(temp_dir.path(), Some(keyset_id)))
        .await
        .unwrap();
    let group = services.oidc.create(NewRotation::new(Algorithm::Es256)).await.unwrap();

    let oidc = services.oidc.clone();
    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let oidc = Arc::clone(&oidc);
            let id = group.id.clone();
            tokio::spawn(async move {
                oidc.rotate(
                    &id,
                    Rotation::Advance {
                        next_jwks_id: None,
                        alg: Algorithm::Es256,
                    },
                )
                .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert!(matches!(e, KeyError::Conflict(_)), "unexpected error {}", e),
        }
    }

    assert!(succeeded >= 1);
    let stored = services.oidc.get(&group.id).await.unwrap();
    assert_eq!(stored.version, succeeded);

    let slots: Vec<_> = stored.slots().collect();
    assert_eq!(slots.len(), 3);
    assert_ne!(slots[0], slots[1]);
    assert_ne!(slots[1], slots[2]);
    assert_ne!(slots[0], slots[2]);

    let listed = services.oidc.list(PageRequest::default()).await.unwrap();
    assert_eq!(listed.page.total, 1);

    // losing rotations remove the key sets they minted
    let jwks = services.jwks.list(PageRequest::default()).await.unwrap();
    assert_eq!(jwks.page.total, 2 + succeeded);
}
