//! Shared harness for broker endpoint tests: an in-process broker over the
//! memory store and queue, plus a local server standing in for Google's
//! signing-cert endpoint.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use tokio::net::TcpListener;

use splice_broker::validators::gce::GceChecker;
use splice_broker::{router, AppState, BrokerConfig};
use splice_queue::MemQueue;
use splice_store::MemStore;

pub const SIGNING_KEY_PEM: &str = include_str!("../../testdata/signing_key.pem");
pub const SIGNING_CERT_PEM: &str = include_str!("../../testdata/signing_cert.pem");
pub const KID: &str = "splice-test";
pub const APP_HOST: &str = "splice.example.com";
pub const FINGERPRINT_HEADER: &str = "x-client-fingerprint";

pub struct TestBroker {
    pub url: String,
    pub store: Arc<MemStore>,
    pub queue: Arc<MemQueue>,
    pub http: reqwest::Client,
}

/// Serves `{KID: <PEM>}` the way the Google certs endpoint does.
pub async fn spawn_certs_server() -> String {
    let body = serde_json::json!({ KID: SIGNING_CERT_PEM });
    let app = Router::new().route("/certs", get(move || async move { Json(body.clone()) }));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}/certs")
}

/// Spawns a broker on an ephemeral port. `verify_cert` controls fingerprint
/// enforcement; `allowlist` feeds the GCE checker.
pub async fn spawn_broker(verify_cert: bool, allowlist: &[&str]) -> TestBroker {
    let config = BrokerConfig {
        listen_addr: "127.0.0.1:0".parse().expect("addr"),
        database_url: String::new(),
        nats_url: String::new(),
        pubsub_topic: "requests".to_string(),
        verify_cert,
        verify_cert_header: FINGERPRINT_HEADER.to_string(),
        rejoin_allowed: false,
        project_allowlist: allowlist.iter().map(|s| s.to_string()).collect(),
        app_host: APP_HOST.to_string(),
    };

    let certs_url = spawn_certs_server().await;
    let gce = GceChecker::with_certs_url(
        config.project_allowlist.clone(),
        config.expected_audience(),
        certs_url,
    );

    let store = Arc::new(MemStore::new());
    let queue = Arc::new(MemQueue::new());
    let state = AppState {
        config,
        store: store.clone(),
        queue: queue.clone(),
        gce: Arc::new(gce),
        generator_names: splice_generators::builtin_names(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestBroker {
        url: format!("http://{addr}"),
        store,
        queue,
        http: reqwest::Client::new(),
    }
}

/// Signs a GCE-style VM identity token with the embedded test key.
pub fn sign_identity(audience: &str, project_id: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": audience,
        "sub": "1234567890",
        "iat": now,
        "exp": now + 3600,
        "google": {
            "compute_engine": {
                "project_id": project_id,
            }
        }
    });
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    encode(
        &header,
        &claims,
        &EncodingKey::from_rsa_pem(SIGNING_KEY_PEM.as_bytes()).expect("encoding key"),
    )
    .expect("token")
}

pub fn expected_audience() -> String {
    format!("https://{APP_HOST}/request-unattended")
}
