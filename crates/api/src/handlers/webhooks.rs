//! Inbound provider callbacks.
//!
//! Webhooks are public. When `WEBHOOK_SECRET` is configured the body must
//! carry a valid HMAC-SHA256 signature: Replicate's Standard Webhooks
//! headers when `webhook-signature` is present, otherwise a hex digest in
//! `x-webhook-signature`. Apart from a bad signature every delivery is
//! answered with 200 so providers do not retry events that will never
//! apply.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use imagegen_core::webhook::{
    verify_signature, verify_standard_signature, StandardSignature, SIGNATURE_HEADER,
    WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER,
};
use imagegen_pipeline::lifecycle::WebhookDisposition;
use imagegen_pipeline::WebhookEvent;
use imagegen_providers::config::REPLICATE;
use imagegen_providers::replicate::Prediction;
use serde_json::json;
use uuid::Uuid;

use crate::state::AppState;

/// POST /api/v1/webhooks/{provider}/{task_id}
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path((provider, task_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = state.config.webhook_secret.as_deref() {
        if !signature_valid(secret, &headers, &body) {
            tracing::warn!(provider = %provider, task_id = %task_id, "Webhook signature rejected");
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid webhook signature", "code": "UNAUTHORIZED"})),
            );
        }
    }

    let Ok(task_id) = Uuid::parse_str(&task_id) else {
        return ignored("invalid task id");
    };

    let event = match parse_event(&provider, &body) {
        Ok(event) => event,
        Err(reason) => {
            tracing::warn!(provider = %provider, task_id = %task_id, reason, "Webhook payload ignored");
            return ignored(reason);
        }
    };

    match state.generation.on_webhook(task_id, &provider, event).await {
        Ok(WebhookDisposition::Applied(status)) => (
            StatusCode::OK,
            Json(json!({"status": "ok", "task_status": status})),
        ),
        Ok(WebhookDisposition::Ignored(reason)) => ignored(reason),
        Err(e) => {
            tracing::error!(provider = %provider, task_id = %task_id, error = %e, "Webhook handling failed");
            ignored("processing error")
        }
    }
}

fn signature_valid(secret: &str, headers: &HeaderMap, body: &[u8]) -> bool {
    match header(headers, WEBHOOK_SIGNATURE_HEADER) {
        Some(signatures) => {
            let delivery = StandardSignature {
                id: header(headers, WEBHOOK_ID_HEADER).unwrap_or_default(),
                timestamp: header(headers, WEBHOOK_TIMESTAMP_HEADER).unwrap_or_default(),
                signatures,
            };
            verify_standard_signature(secret, &delivery, body, chrono::Utc::now().timestamp())
        }
        None => verify_signature(
            secret,
            body,
            header(headers, SIGNATURE_HEADER).unwrap_or_default(),
        ),
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn ignored(reason: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({"status": "ignored", "reason": reason})),
    )
}

/// Normalize a provider-specific payload.
fn parse_event(provider: &str, body: &[u8]) -> Result<WebhookEvent, &'static str> {
    if provider != REPLICATE {
        return Err("unsupported provider");
    }
    let prediction: Prediction =
        serde_json::from_slice(body).map_err(|_| "malformed payload")?;
    Ok(WebhookEvent {
        external_id: Some(prediction.id.clone()),
        status: prediction.external_status(),
        output_urls: prediction.output_urls(),
        error: prediction.error_message(),
    })
}
