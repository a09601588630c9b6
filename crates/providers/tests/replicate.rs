//! HTTP behaviour of the Replicate client against a mock server.

mod common;

use std::time::Duration;

use imagegen_providers::catalog::{replicate_models, ModelSpec};
use imagegen_providers::client::{GenerationRequest, ProviderClient};
use imagegen_providers::error::ProviderErrorKind;
use imagegen_providers::replicate::ReplicateClient;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_with(server: &MockServer, models: Vec<ModelSpec>) -> ReplicateClient {
    ReplicateClient::new(common::settings("replicate", &server.uri(), models))
        .unwrap()
        .with_poll_interval(Duration::from_millis(10))
}

fn client(server: &MockServer) -> ReplicateClient {
    client_with(server, replicate_models())
}

fn prediction(id: &str, status: &str) -> serde_json::Value {
    json!({"id": id, "status": status, "output": null, "error": null})
}

#[tokio::test]
async fn official_model_is_created_by_path_and_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .and(header("authorization", "Token test-key"))
        .and(body_partial_json(json!({"input": {"prompt": "lighthouse"}})))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction("p1", "starting")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction("p1", "processing")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p1",
            "status": "succeeded",
            "output": ["https://replicate.delivery/a.webp", "https://replicate.delivery/b.webp"],
            "metrics": {"predict_time": 0.8},
        })))
        .mount(&server)
        .await;

    let output = client(&server)
        .generate(&common::request("lighthouse"))
        .await
        .unwrap();

    assert_eq!(output.images.len(), 2);
    assert_eq!(output.model, "replicate-flux-schnell");
    assert_eq!(output.external_id.as_deref(), Some("p1"));
}

#[tokio::test]
async fn community_model_is_created_by_version() {
    let server = MockServer::start().await;
    let sdxl = replicate_models()
        .into_iter()
        .find(|m| m.id == "replicate-sdxl")
        .unwrap();
    Mock::given(method("POST"))
        .and(path("/predictions"))
        .and(body_partial_json(json!({
            "version": sdxl.handle,
            "input": {"scheduler": "DPMSolverMultistep"},
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "p2",
            "status": "succeeded",
            "output": "https://replicate.delivery/only.png",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = GenerationRequest {
        model: Some("replicate-sdxl".into()),
        ..common::request("forest")
    };
    let output = client(&server).generate(&request).await.unwrap();
    assert_eq!(output.images, vec!["https://replicate.delivery/only.png"]);
}

#[tokio::test]
async fn failed_prediction_surfaces_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction("p3", "starting")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "p3",
            "status": "failed",
            "error": "NSFW content detected",
        })))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&common::request("storm"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::Api);
    assert_eq!(err.message, "NSFW content detected");
}

#[tokio::test]
async fn succeeded_without_output_is_empty_result() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction("p4", "succeeded")))
        .mount(&server)
        .await;

    let err = client(&server)
        .generate(&common::request("void"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::EmptyResult);
}

#[tokio::test]
async fn polling_stops_at_model_wait_limit() {
    let server = MockServer::start().await;
    let mut models = replicate_models();
    models[0].max_wait = Duration::from_millis(50);

    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction("p5", "starting")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/predictions/p5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction("p5", "processing")))
        .mount(&server)
        .await;

    let err = client_with(&server, models)
        .generate(&common::request("slow"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::Timeout);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn webhook_submission_registers_callback() {
    let server = MockServer::start().await;
    let callback = "https://api.example.com/api/v1/webhooks/replicate/0192";
    Mock::given(method("POST"))
        .and(path("/models/black-forest-labs/flux-schnell/predictions"))
        .and(body_partial_json(json!({
            "webhook": callback,
            "webhook_events_filter": ["completed"],
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(prediction("p6", "starting")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.supports_webhooks());
    let submission = client
        .submit_with_webhook(&common::request("dunes"), callback)
        .await
        .unwrap();

    assert_eq!(submission.external_id, "p6");
    assert_eq!(submission.provider, "replicate");
    assert_eq!(submission.model, "replicate-flux-schnell");
}

#[tokio::test]
async fn cancel_posts_to_prediction() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/predictions/p7/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(prediction("p7", "canceled")))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).cancel("p7").await.unwrap();
}

#[tokio::test]
async fn probe_reads_account() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account"))
        .and(header("authorization", "Token test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"username": "svc"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).probe().await.unwrap();
}

#[tokio::test]
async fn missing_token_is_not_configured() {
    let server = MockServer::start().await;
    let mut settings = common::settings("replicate", &server.uri(), replicate_models());
    settings.api_key = None;
    let client = ReplicateClient::new(settings).unwrap();

    let err = client.probe().await.unwrap_err();
    assert_eq!(err.kind, ProviderErrorKind::NotConfigured);
}
