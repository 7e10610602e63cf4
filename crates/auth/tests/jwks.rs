use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use brewdesk_auth::{AuthConfig, Capability, PermissionOracle, SessionToken, VerificationMode};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use tokio::net::TcpListener;

fn rs256_token(kid: &str, claims: serde_json::Value) -> String {
    let private_key_pem = include_bytes!("fixtures/test_rsa_private.pem");

    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());

    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(private_key_pem).expect("private key must parse"),
    )
    .expect("token encode should succeed")
}

fn jwks_config() -> AuthConfig {
    AuthConfig {
        mode: VerificationMode::Jwks,
        permissions_claim: "permissions".to_string(),
        issuer: Some("https://issuer.example/".to_string()),
        audience: Some("coffee".to_string()),
        jwks_url: None,
        jwks_json: Some(include_str!("fixtures/test_jwks.json").to_string()),
        jwks_timeout: Duration::from_millis(2000),
        clock_skew: Duration::from_secs(0),
    }
}

#[tokio::test]
async fn verified_token_grants_its_permissions() {
    let token = SessionToken::new(rs256_token(
        "test-kid",
        serde_json::json!({
            "iss": "https://issuer.example/",
            "sub": "auth0|manager",
            "aud": "coffee",
            "exp": 4000000000u64,
            "iat": 1000000000,
            "permissions": ["manage:baristas", "get:drinks-detail"]
        }),
    ));

    let oracle = PermissionOracle::new(jwks_config(), Arc::new(token))
        .await
        .expect("oracle init should succeed");

    assert!(oracle.can(Capability::MANAGE_BARISTAS));
    assert!(oracle.can(Capability::GET_DRINKS_DETAIL));
    assert!(!oracle.can(Capability::DELETE_DRINKS));

    let claims = oracle.claims().expect("claims should decode");
    assert_eq!(claims.subject.as_deref(), Some("auth0|manager"));
    assert_eq!(
        claims.permissions,
        vec!["get:drinks-detail", "manage:baristas"]
    );
}

#[tokio::test]
async fn wrong_audience_or_unknown_kid_grants_nothing() {
    let wrong_audience = SessionToken::new(rs256_token(
        "test-kid",
        serde_json::json!({
            "iss": "https://issuer.example/",
            "aud": "someone-else",
            "exp": 4000000000u64,
            "permissions": ["manage:baristas"]
        }),
    ));
    let oracle = PermissionOracle::new(jwks_config(), Arc::new(wrong_audience.clone()))
        .await
        .expect("oracle init should succeed");
    assert!(!oracle.can(Capability::MANAGE_BARISTAS));

    wrong_audience.replace(rs256_token(
        "rotated-kid",
        serde_json::json!({
            "iss": "https://issuer.example/",
            "aud": "coffee",
            "exp": 4000000000u64,
            "permissions": ["manage:baristas"]
        }),
    ));
    assert!(!oracle.can(Capability::MANAGE_BARISTAS));
    assert_eq!(
        oracle.claims().expect_err("unknown kid must fail").code,
        "ERR_AUTH_INVALID"
    );
}

fn manager_claims() -> serde_json::Value {
    serde_json::json!({
        "iss": "https://issuer.example/",
        "aud": "coffee",
        "exp": 4000000000u64,
        "permissions": ["manage:baristas"]
    })
}

/// Fixture key set with every key relabelled as `kid`.
fn fixture_jwks_with_kid(kid: &str) -> serde_json::Value {
    let mut jwks: serde_json::Value =
        serde_json::from_str(include_str!("fixtures/test_jwks.json")).expect("fixture jwks");
    for key in jwks["keys"].as_array_mut().expect("keys array") {
        key["kid"] = serde_json::json!(kid);
    }
    jwks
}

async fn serve_jwks(published: Arc<Mutex<serde_json::Value>>) -> SocketAddr {
    async fn jwks(
        State(published): State<Arc<Mutex<serde_json::Value>>>,
    ) -> axum::Json<serde_json::Value> {
        axum::Json(published.lock().expect("jwks lock").clone())
    }

    let app = Router::new()
        .route("/.well-known/jwks.json", get(jwks))
        .with_state(published);
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("jwks listener should bind");
    let addr = listener.local_addr().expect("listener addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_keys_picks_up_rotated_signing_key() {
    let published = Arc::new(Mutex::new(fixture_jwks_with_kid("test-kid")));
    let addr = serve_jwks(published.clone()).await;

    let config = AuthConfig {
        jwks_url: Some(format!("http://{}/.well-known/jwks.json", addr)),
        jwks_json: None,
        ..jwks_config()
    };
    let token = SessionToken::new(rs256_token("rotated-kid", manager_claims()));
    let oracle = PermissionOracle::new(config, Arc::new(token.clone()))
        .await
        .expect("oracle should load keys from the url");
    assert!(!oracle.can(Capability::MANAGE_BARISTAS));

    *published.lock().expect("jwks lock") = fixture_jwks_with_kid("rotated-kid");
    assert!(!oracle.can(Capability::MANAGE_BARISTAS));

    oracle.refresh_keys().await.expect("refresh should succeed");
    assert!(oracle.can(Capability::MANAGE_BARISTAS));

    token.replace(rs256_token("test-kid", manager_claims()));
    assert!(!oracle.can(Capability::MANAGE_BARISTAS));
}

#[tokio::test]
async fn unreachable_jwks_url_fails_construction() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener addr");
    drop(listener);

    let config = AuthConfig {
        jwks_url: Some(format!("http://{}/.well-known/jwks.json", addr)),
        jwks_json: None,
        ..jwks_config()
    };
    let err = PermissionOracle::new(config, Arc::new(SessionToken::empty()))
        .await
        .err()
        .expect("construction must fail without keys");
    assert_eq!(err.code, "ERR_AUTH_UNAVAILABLE");
}
