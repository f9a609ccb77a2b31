//! Payment webhook reconciliation engine.
//!
//! Providers deliver payment events at-least-once, out of order, and
//! concurrently; this service verifies each delivery's authenticity,
//! normalizes it onto a canonical event, deduplicates it through an
//! idempotency ledger, and reconciles it against the order payment state
//! machine under optimistic concurrency.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod notifier;
pub mod openapi;
pub mod reconciler;
pub mod signature;
pub mod state_machine;
pub mod store;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::ledger::InMemoryLedger;
use crate::metrics::MetricsRegistry;
use crate::notifier::{FulfillmentNotifier, HttpFulfillmentNotifier, NoopNotifier};
use crate::reconciler::Reconciler;
use crate::signature::WebhookVerifier;
use crate::store::InMemoryOrderStore;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub verifier: WebhookVerifier,
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<MetricsRegistry>,
}

impl AppState {
    /// Wires the full pipeline from configuration.
    pub fn from_config(config: AppConfig) -> Self {
        let verifier = WebhookVerifier::new(
            config.card_webhook_secret.clone(),
            config.wallet_webhook_secret.clone(),
            config.signature_tolerance_secs,
            config.max_webhook_body_bytes,
        );

        let notifier: Arc<dyn FulfillmentNotifier> = match (
            config.fulfillment_webhook_url.clone(),
            config.fulfillment_webhook_secret.clone(),
        ) {
            (Some(url), Some(secret)) => Arc::new(HttpFulfillmentNotifier::new(
                url,
                secret,
                config.notifier_max_retries,
            )),
            _ => Arc::new(NoopNotifier),
        };

        let metrics = Arc::new(MetricsRegistry::new());
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryLedger::new(config.ledger_lease())),
            notifier,
            metrics.clone(),
            chrono::Duration::seconds(config.void_window_secs),
            config.apply_retry_limit,
            config.processing_timeout(),
        ));

        Self {
            config: Arc::new(config),
            verifier,
            reconciler,
            metrics,
        }
    }
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    let cors = match state.config.cors_allowed_origins.as_deref() {
        Some(origins) => {
            let parsed: Vec<axum::http::HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(parsed))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/metrics", get(handlers::health::metrics_text))
        .route("/metrics/json", get(handlers::health::metrics_json))
        .route("/api/v1/status", get(handlers::health::api_status))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/webhooks/card", post(handlers::webhooks::card_webhook))
        .route("/webhooks/card/health", get(handlers::webhooks::card_health))
        .route("/webhooks/wallet", post(handlers::webhooks::wallet_webhook))
        .route(
            "/webhooks/wallet/health",
            get(handlers::webhooks::wallet_health),
        )
        .route("/orders", post(handlers::orders::create_order))
        .route(
            "/orders/:id/payment-status",
            get(handlers::orders::payment_status_by_order_id),
        )
        .route(
            "/payment-status/:unique_payment_id",
            get(handlers::orders::payment_status_by_payment_id),
        )
        .route("/admin/conflicts", get(handlers::admin::list_conflicts))
        .route("/admin/orphans", get(handlers::admin::list_orphans))
}
