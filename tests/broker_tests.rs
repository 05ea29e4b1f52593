//! Credential broker integration tests
//!
//! Tests the broker against real cache backends and a mock cluster:
//! - Cache idempotence within a TTL window
//! - Regeneration after expiry
//! - Persistence through the file backend
//! - Corruption detection across secret key changes

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use elastauth::broker::{BrokerContext, CredentialBroker};
use elastauth::cache::{CredentialCache, FileCache, MemoryCache};
use elastauth::config::ElasticsearchConfig;
use elastauth::crypto;
use elastauth::elasticsearch::{ElasticsearchClient, RoleTable};
use elastauth::provider::UserInfo;
use elastauth::Error;

fn es_client(uri: &str) -> ElasticsearchClient {
    ElasticsearchClient::new(&ElasticsearchConfig {
        hosts: vec![uri.to_string()],
        username: "elastic".into(),
        password: "changeme".into(),
        dry_run: false,
    })
    .unwrap()
}

fn roles() -> RoleTable {
    let mappings: HashMap<String, Vec<String>> = [
        ("admin".to_string(), vec!["superuser".to_string()]),
        (
            "dev".to_string(),
            vec!["kibana_admin".to_string(), "monitoring_user".to_string()],
        ),
    ]
    .into_iter()
    .collect();
    RoleTable::new(&mappings, &["viewer".to_string()])
}

async fn file_broker(dir: &Path, key: &str, es_uri: &str) -> CredentialBroker {
    let cache = FileCache::new(dir, Duration::from_secs(60));
    cache.init().await.unwrap();
    CredentialBroker::new(BrokerContext::new(Arc::new(cache), key, es_client(es_uri), roles()))
}

fn john() -> UserInfo {
    UserInfo {
        username: "john".into(),
        email: Some("john@example.com".into()),
        full_name: Some("John Doe".into()),
        groups: vec!["Admin".into(), "dev".into()],
    }
}

/// Two sequential calls within one TTL return the same password and upsert once
#[tokio::test]
async fn test_cache_idempotence() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_security/user/john"))
        .and(body_partial_json(json!({
            "enabled": true,
            "email": "john@example.com",
            "full_name": "John Doe",
            "roles": ["superuser", "kibana_admin", "monitoring_user"],
            "metadata": {"groups": ["Admin", "dev"]},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;
    let broker = CredentialBroker::new(BrokerContext::new(
        Arc::new(MemoryCache::new(Duration::from_secs(60))),
        crypto::generate_key(),
        es_client(&es.uri()),
        roles(),
    ));

    let first = broker.resolve(&john()).await.unwrap();
    let second = broker.resolve(&john()).await.unwrap();

    assert_eq!(first, second);
}

/// Once the entry expires a new password is issued and provisioned
#[tokio::test]
async fn test_expiry_regenerates() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_security/user/john"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": false})))
        .expect(2)
        .mount(&es)
        .await;
    let broker = CredentialBroker::new(BrokerContext::new(
        Arc::new(MemoryCache::new(Duration::from_millis(50))),
        crypto::generate_key(),
        es_client(&es.uri()),
        roles(),
    ));

    let first = broker.resolve(&john()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = broker.resolve(&john()).await.unwrap();

    assert_ne!(first.password, second.password);
}

/// A file cache shared by two broker instances with the same key
#[tokio::test]
async fn test_file_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key = crypto::generate_key();
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;

    let before = file_broker(dir.path(), &key, &es.uri()).await.resolve(&john()).await.unwrap();
    let after = file_broker(dir.path(), &key, &es.uri()).await.resolve(&john()).await.unwrap();

    assert_eq!(before, after);
}

/// Rotating the secret key turns existing entries into corruption errors
#[tokio::test]
async fn test_key_rotation_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .mount(&es)
        .await;

    let cache = FileCache::new(dir.path(), Duration::from_secs(60));
    cache.init().await.unwrap();
    let cache: Arc<dyn CredentialCache> = Arc::new(cache);

    let old = CredentialBroker::new(BrokerContext::new(
        Arc::clone(&cache),
        crypto::generate_key(),
        es_client(&es.uri()),
        roles(),
    ));
    old.resolve(&john()).await.unwrap();

    let rotated = CredentialBroker::new(BrokerContext::new(
        cache,
        crypto::generate_key(),
        es_client(&es.uri()),
        roles(),
    ));
    let err = rotated.resolve(&john()).await.unwrap_err();

    assert!(matches!(err, Error::CacheCorrupted(_)));
}

/// Different users never share a password
#[tokio::test]
async fn test_users_are_isolated() {
    let es = MockServer::start().await;
    let broker = CredentialBroker::new(
        BrokerContext::new(
            Arc::new(MemoryCache::new(Duration::from_secs(60))),
            crypto::generate_key(),
            es_client(&es.uri()),
            roles(),
        )
        .with_dry_run(true),
    );
    let jane = UserInfo {
        username: "jane".into(),
        ..UserInfo::default()
    };

    let john_creds = broker.resolve(&john()).await.unwrap();
    let jane_creds = broker.resolve(&jane).await.unwrap();

    assert_eq!(jane_creds.username, "jane");
    assert_ne!(john_creds.password, jane_creds.password);
}
