//! HTTP surface: channel webhooks, payment notifications and a health check.

use crate::application::conversation::ConversationEngine;
use crate::application::registry::BrandRegistry;
use crate::application::webhook::PaymentWebhookHandler;
use crate::domain::event::WebhookEnvelope;
use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BrandRegistry>,
    pub engine: ConversationEngine,
    pub payments: PaymentWebhookHandler,
    pub verify_token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", get(verify_channel).post(receive_messages))
        .route("/payment-webhook", post(receive_payment))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct Handshake {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn verify_channel(State(state): State<AppState>, Query(hs): Query<Handshake>) -> Response {
    let expected = state.verify_token.as_deref().filter(|t| !t.is_empty());
    match (hs.mode.as_deref(), hs.verify_token.as_deref(), expected, hs.challenge) {
        (Some("subscribe"), Some(given), Some(expected), Some(challenge)) if given == expected => {
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            warn!("channel verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Dispatches every message in the envelope. A failing event is logged and
/// does not stop the others. The engine only surfaces storage failures, and
/// any of them turns the response into a 500.
async fn receive_messages(State(state): State<AppState>, body: Bytes) -> Response {
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "malformed channel webhook");
            return (StatusCode::BAD_REQUEST, Json(json!({ "status": "error" }))).into_response();
        }
    };

    let mut failed = false;
    for event in envelope.into_events() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "skipping inbound message");
                continue;
            }
        };
        let brand = match state.registry.resolve(event.tenant_hint.as_deref()) {
            Ok(brand) => brand,
            Err(e) => {
                warn!(error = %e, "inbound message for unknown brand");
                continue;
            }
        };
        let customer = event.customer.clone();
        if let Err(e) = state.engine.handle(&brand, event).await {
            error!(brand = %brand.id, customer, error = %e, "failed to handle inbound event");
            failed = true;
        }
    }

    if failed {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "status": "error" }))).into_response()
    } else {
        Json(json!({ "status": "ok" })).into_response()
    }
}

/// Always 200 with a plain acknowledgement, whatever the outcome.
async fn receive_payment(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    let outcome = state.payments.handle(&body, signature).await;
    debug!(?outcome, "payment webhook handled");
    (StatusCode::OK, outcome.acknowledgement()).into_response()
}
