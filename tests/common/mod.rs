//! Shared harness for integration tests: an in-process app plus signing
//! helpers that play the role of the two providers.

use axum::body::{to_bytes, Body};
use axum::Router;
use http::{Request, Response, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use paysync_api::config::AppConfig;
use paysync_api::signature::{card_signature, wallet_signature};
use paysync_api::{app, AppState};

pub const CARD_SECRET: &str = "integration-card-secret-0123456789abcdef";
pub const WALLET_SECRET: &str = "integration-wallet-secret-0123456789abcdef";

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        environment: "development".into(),
        log_level: "warn".into(),
        log_json: false,
        card_webhook_secret: CARD_SECRET.into(),
        wallet_webhook_secret: WALLET_SECRET.into(),
        signature_tolerance_secs: 300,
        max_webhook_body_bytes: 64 * 1024,
        ledger_lease_secs: 60,
        processing_timeout_ms: 5_000,
        apply_retry_limit: 5,
        void_window_secs: 86_400,
        fulfillment_webhook_url: None,
        fulfillment_webhook_secret: None,
        notifier_max_retries: 3,
        cors_allowed_origins: None,
    }
}

pub struct TestApp {
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            router: app(AppState::from_config(config)),
        }
    }

    pub async fn request(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("request failed")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.request(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response<Body> {
        self.request(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Registers an order and returns its id.
    pub async fn create_order(
        &self,
        unique_payment_id: &str,
        expected_amount_minor: i64,
        currency: &str,
    ) -> String {
        let response = self
            .post_json(
                "/api/v1/orders",
                json!({
                    "unique_payment_id": unique_payment_id,
                    "expected_amount_minor": expected_amount_minor,
                    "currency": currency,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response_json(response).await;
        body["id"].as_str().unwrap().to_string()
    }

    /// Delivers a card webhook with a valid signature over `body`.
    pub async fn deliver_card(&self, body: &Value) -> Response<Body> {
        let raw = body.to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = card_signature(CARD_SECRET, &timestamp, raw.as_bytes());
        self.request(
            Request::post("/api/v1/webhooks/card")
                .header("content-type", "application/json")
                .header("x-timestamp", timestamp)
                .header("x-signature", signature)
                .body(Body::from(raw))
                .unwrap(),
        )
        .await
    }

    /// Delivers a wallet webhook; the signature field is computed over the
    /// provider's fixed field set.
    pub async fn deliver_wallet(&self, body: &Value) -> Response<Body> {
        self.request(
            Request::post("/api/v1/webhooks/wallet")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

/// CardGateway payload with the given event id, status, and major-unit
/// amount string for an order token.
pub fn card_payload(event_id: &str, order_ref: &str, status: &str, amount: &str) -> Value {
    json!({
        "id": event_id,
        "transaction_id": format!("ctx_{event_id}"),
        "merchant_order_id": order_ref,
        "status": status,
        "amount": amount,
        "currency": "EGP",
        "created_at": chrono::Utc::now().to_rfc3339(),
    })
}

/// Correctly signed WalletGateway payload.
pub fn wallet_payload(event_id: &str, order_ref: &str, status: &str, amount_minor: i64) -> Value {
    let transaction_no = format!("wtx_{event_id}");
    let canonical = format!("{event_id}|{transaction_no}|{order_ref}|{amount_minor}|EGP|{status}");
    json!({
        "event_id": event_id,
        "transaction_no": transaction_no,
        "merchant_order_id": order_ref,
        "status": status,
        "amount_minor": amount_minor,
        "currency": "EGP",
        "occurred_at": chrono::Utc::now().timestamp(),
        "signature": wallet_signature(WALLET_SECRET, &canonical),
    })
}

pub async fn response_json(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
