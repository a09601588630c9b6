#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use imagegen_api::auth::jwt::{generate_access_token, JwtConfig};
use imagegen_api::config::ServerConfig;
use imagegen_api::router::build_app_router;
use imagegen_api::state::AppState;
use imagegen_core::quota::SubscriptionTier;
use imagegen_core::roles::{ROLE_ADMIN, ROLE_USER};
use imagegen_core::types::DbId;
use imagegen_db::MemoryTaskStore;
use imagegen_pipeline::{GenerationService, InMemoryRateLimitStore, QuotaGate, Supervisor};
use imagegen_providers::client::ProviderClient;
use imagegen_providers::testing::FakeProvider;
use imagegen_providers::{HealthTracker, Orchestrator, ProviderRegistry};
use tower::ServiceExt;

pub const USER_ID: DbId = 7;
pub const OTHER_USER_ID: DbId = 8;
pub const ADMIN_ID: DbId = 1;
pub const WEBHOOK_SECRET: &str = "whsec-test";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-for-integration-tests".to_string(),
            access_token_expiry_mins: 15,
        },
        public_base_url: "https://api.example.com".to_string(),
        webhook_secret: None,
        health_check_interval_secs: 300,
    }
}

/// A running app over the in-memory store and two scripted providers.
pub struct TestApp {
    pub router: Router,
    pub config: ServerConfig,
    pub store: Arc<MemoryTaskStore>,
    pub supervisor: Supervisor,
    /// Priority 1, webhook capable.
    pub replicate: Arc<FakeProvider>,
    /// Priority 2, synchronous.
    pub siliconflow: Arc<FakeProvider>,
}

impl TestApp {
    /// A fresh router over the same state (each `oneshot` consumes one).
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    pub fn token(&self, user_id: DbId) -> String {
        generate_access_token(user_id, ROLE_USER, SubscriptionTier::Free, &self.config.jwt).unwrap()
    }

    pub fn admin_token(&self) -> String {
        generate_access_token(ADMIN_ID, ROLE_ADMIN, SubscriptionTier::Premium, &self.config.jwt)
            .unwrap()
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

/// Build the full application router with the production middleware stack.
pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let replicate = Arc::new(FakeProvider::new("replicate").with_webhooks());
    let siliconflow = Arc::new(FakeProvider::new("siliconflow"));

    let health = Arc::new(HealthTracker::in_memory());
    health.register("replicate", 1, true);
    health.register("siliconflow", 2, true);
    let registry = ProviderRegistry::new(vec![
        replicate.clone() as Arc<dyn ProviderClient>,
        siliconflow.clone() as Arc<dyn ProviderClient>,
    ])
    .unwrap();
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(registry), health));

    let store = Arc::new(MemoryTaskStore::new());
    let gate = Arc::new(QuotaGate::new(
        Arc::new(InMemoryRateLimitStore::new()),
        store.clone(),
    ));
    let supervisor = Supervisor::new();
    let generation = GenerationService::new(
        store.clone(),
        orchestrator,
        gate,
        supervisor.clone(),
        &config.public_base_url,
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        generation,
    };
    let router = build_app_router(state, &config);

    TestApp {
        router,
        config,
        store,
        supervisor,
        replicate,
        siliconflow,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(
        app,
        Request::builder().uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    send(
        app,
        Request::builder()
            .uri(uri)
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

pub async fn post_json_auth(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    token: &str,
) -> Response<Body> {
    send(
        app,
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {token}"))
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

pub async fn post_raw(
    app: Router,
    uri: &str,
    body: String,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Content-Type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    send(app, builder.body(Body::from(body)).unwrap()).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
