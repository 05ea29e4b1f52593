//! End-to-end routing tests
//!
//! Drives the full router in-process against a mock Elasticsearch:
//! - Reserved endpoints answer in both modes
//! - Proxy mode forwards with injected Basic credentials
//! - Auth-only mode never forwards
//! - Response headers are sanitized

use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use elastauth::config::{Config, ElasticsearchConfig};
use elastauth::crypto;
use elastauth::gateway::{AppState, create_router};

fn config(es: &MockServer, proxy: bool, dry_run: bool) -> Config {
    let mut config = Config {
        secret_key: Some(crypto::generate_key()),
        elasticsearch: ElasticsearchConfig {
            hosts: vec![es.uri()],
            username: "elastic".into(),
            password: "changeme".into(),
            dry_run,
        },
        default_roles: vec!["viewer".into()],
        ..Config::default()
    };
    config.proxy.enabled = proxy;
    config.proxy.elasticsearch_url = es.uri();
    config
}

async fn app(config: &Config) -> Router {
    config.validate().unwrap();
    create_router(Arc::new(AppState::from_config(config).await.unwrap()))
}

fn as_john(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("remote-user", "john")
        .header("remote-groups", "admin,dev")
        .body(Body::empty())
        .unwrap()
}

fn decode_basic(value: &str) -> (String, String) {
    let raw = STANDARD.decode(value.strip_prefix("Basic ").unwrap()).unwrap();
    let pair = String::from_utf8(raw).unwrap();
    let (user, pass) = pair.split_once(':').unwrap();
    (user.to_string(), pass.to_string())
}

/// Health endpoint is served locally in proxy mode, nothing reaches Elasticsearch
#[tokio::test]
async fn test_health_is_local_in_proxy_mode() {
    let es = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&es)
        .await;
    let app = app(&config(&es, true, true)).await;

    let response = app
        .oneshot(Request::builder().uri("/elastauth/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap(), json!({"status": "OK"}));
}

/// Proxy mode forwards the original path and query with Basic credentials
#[tokio::test]
async fn test_proxy_forwards_with_basic_credentials() {
    // GIVEN: a cluster answering /_cluster/health to Basic-authenticated callers
    let es = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .and(query_param("pretty", "true"))
        .and(header_regex("authorization", "^Basic "))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("www-authenticate", "Basic realm=\"security\"")
                .insert_header("x-elastic-product", "Elasticsearch")
                .set_body_json(json!({"status": "green"})),
        )
        .expect(1)
        .mount(&es)
        .await;
    let app = app(&config(&es, true, true)).await;

    // WHEN
    let response = app.oneshot(as_john("/_cluster/health?pretty=true")).await.unwrap();

    // THEN: upstream body comes back, auth challenge and product headers do not
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    assert!(response.headers().get("x-elastic-product").is_none());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["status"], "green");

    let received = es.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let auth = received[0].headers.get("authorization").unwrap().to_str().unwrap();
    let (user, password) = decode_basic(auth);
    assert_eq!(user, "john");
    assert_eq!(password.len(), 32);
    assert!(received[0].headers.get("remote-user").is_none());
}

/// Request bodies and methods are forwarded unchanged
#[tokio::test]
async fn test_proxy_forwards_body() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/logs-app/_search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hits": {"total": 0}})))
        .expect(1)
        .mount(&es)
        .await;
    let app = app(&config(&es, true, true)).await;
    let query = json!({"query": {"match_all": {}}});

    let request = Request::builder()
        .method("POST")
        .uri("/logs-app/_search")
        .header("remote-user", "john")
        .header("content-type", "application/json")
        .body(Body::from(query.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let received = es.received_requests().await.unwrap();
    let sent: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent, query);
}

/// Upstream status codes pass through untouched
#[tokio::test]
async fn test_proxy_passes_upstream_errors_through() {
    let es = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing-index"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"status": 404})))
        .mount(&es)
        .await;
    let app = app(&config(&es, true, true)).await;

    let response = app.oneshot(as_john("/missing-index")).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Auth-only mode answers locally and never forwards
#[tokio::test]
async fn test_auth_only_never_forwards() {
    let es = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_cluster/health"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&es)
        .await;
    let app = app(&config(&es, false, true)).await;

    let response = app.oneshot(as_john("/_cluster/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::AUTHORIZATION));
}

/// Remote-User john with dry run: same password on repeated requests
#[tokio::test]
async fn test_remote_user_scenario_is_idempotent() {
    let es = MockServer::start().await;
    let app = app(&config(&es, false, true)).await;

    let first = app.clone().oneshot(as_john("/elastauth")).await.unwrap();
    let second = app.oneshot(as_john("/elastauth")).await.unwrap();

    let first = decode_basic(first.headers()[header::AUTHORIZATION].to_str().unwrap());
    let second = decode_basic(second.headers()[header::AUTHORIZATION].to_str().unwrap());
    assert_eq!(first.0, "john");
    assert_eq!(first.1.len(), 32);
    assert_eq!(first, second);
}

/// Proxied requests for one user provision Elasticsearch once
#[tokio::test]
async fn test_proxy_provisions_user_once() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_security/user/john"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"created": true})))
        .expect(1)
        .mount(&es)
        .await;
    Mock::given(method("GET"))
        .and(path("/_cat/indices"))
        .respond_with(ResponseTemplate::new(200).set_body_string("green open logs"))
        .expect(2)
        .mount(&es)
        .await;
    let app = app(&config(&es, true, false)).await;

    for _ in 0..2 {
        let response = app.clone().oneshot(as_john("/_cat/indices")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

/// A rejected upsert surfaces as a plain-text 500
#[tokio::test]
async fn test_proxy_upsert_failure_is_internal_error() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_security/user/john"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden"})))
        .mount(&es)
        .await;
    let app = app(&config(&es, true, false)).await;

    let response = app.oneshot(as_john("/_cat/indices")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Internal server error");
}

/// Invalid identity fields are a 400 and nothing is provisioned
#[tokio::test]
async fn test_proxy_invalid_user_is_bad_request() {
    let es = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&es)
        .await;
    let app = app(&config(&es, true, false)).await;

    let request = Request::builder()
        .uri("/_cat/indices")
        .header("remote-user", "john")
        .header("remote-email", "not-an-email")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Invalid user information");
}
