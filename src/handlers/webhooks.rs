//! Inbound webhook endpoints.
//!
//! Bodies are taken as raw bytes because the card signature covers the exact
//! wire body; parsing before verification would both weaken the check and
//! leak schema errors to unauthenticated callers.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Serialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::errors::{ErrorResponse, ServiceError};
use crate::metrics::names;
use crate::normalizer::{normalize_card, normalize_wallet};
use crate::reconciler::WebhookAck;
use crate::AppState;

/// Webhook acknowledgement envelope. Providers key their retry loops off the
/// HTTP status; `success` is true on every 200, including conflicts and
/// duplicates.
#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookResponse {
    pub success: bool,
    #[serde(flatten)]
    pub ack: WebhookAck,
}

impl WebhookResponse {
    fn accepted(ack: WebhookAck) -> Json<Self> {
        Json(Self { success: true, ack })
    }
}

/// CardGateway delivery endpoint.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/card",
    tag = "webhooks",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged (applied, duplicate, conflict, or orphan)", body = WebhookResponse),
        (status = 400, description = "Payload violates the provider schema", body = ErrorResponse),
        (status = 401, description = "Signature verification failed", body = ErrorResponse),
        (status = 503, description = "Transient failure; redeliver later", body = ErrorResponse)
    )
)]
pub async fn card_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ServiceError> {
    state.metrics.inc(names::WEBHOOKS_RECEIVED_CARD);

    state.verifier.verify_card(&headers, &body).map_err(|e| {
        state.metrics.inc(names::SIGNATURE_FAILURES);
        e
    })?;
    let event = normalize_card(&body).map_err(|e| {
        state.metrics.inc(names::MALFORMED_PAYLOADS);
        e
    })?;

    let ack = state.reconciler.process_event(event).await?;
    Ok(WebhookResponse::accepted(ack))
}

/// WalletGateway delivery endpoint.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/wallet",
    tag = "webhooks",
    request_body = String,
    responses(
        (status = 200, description = "Event acknowledged (applied, duplicate, conflict, or orphan)", body = WebhookResponse),
        (status = 400, description = "Payload violates the provider schema", body = ErrorResponse),
        (status = 401, description = "Signature verification failed", body = ErrorResponse),
        (status = 503, description = "Transient failure; redeliver later", body = ErrorResponse)
    )
)]
pub async fn wallet_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ServiceError> {
    state.metrics.inc(names::WEBHOOKS_RECEIVED_WALLET);

    state.verifier.verify_wallet(&body).map_err(|e| {
        state.metrics.inc(names::SIGNATURE_FAILURES);
        e
    })?;
    let event = normalize_wallet(&body).map_err(|e| {
        state.metrics.inc(names::MALFORMED_PAYLOADS);
        e
    })?;

    let ack = state.reconciler.process_event(event).await?;
    Ok(WebhookResponse::accepted(ack))
}

/// Per-provider liveness probe for CardGateway's endpoint monitoring.
#[utoipa::path(
    get,
    path = "/api/v1/webhooks/card/health",
    tag = "webhooks",
    responses((status = 200, description = "Card webhook endpoint is live"))
)]
pub async fn card_health() -> Json<Value> {
    Json(json!({ "success": true, "provider": "card_gateway" }))
}

/// Per-provider liveness probe for WalletGateway's endpoint monitoring.
#[utoipa::path(
    get,
    path = "/api/v1/webhooks/wallet/health",
    tag = "webhooks",
    responses((status = 200, description = "Wallet webhook endpoint is live"))
)]
pub async fn wallet_health() -> Json<Value> {
    Json(json!({ "success": true, "provider": "wallet_gateway" }))
}
