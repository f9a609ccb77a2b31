//! OpenAPI document and Swagger UI wiring.

use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::errors::ErrorResponse;
use crate::handlers;
use crate::models::{
    ConflictReason, ConflictRecord, OrderStatus, OrphanEvent, PaymentOutcome, PaymentProvider,
    PaymentStatus, PaymentStatusSnapshot,
};
use crate::reconciler::WebhookAck;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "PaySync Reconciliation API",
        description = "Verifies, normalizes, deduplicates, and reconciles asynchronous payment provider webhooks against the order payment state machine"
    ),
    paths(
        handlers::webhooks::card_webhook,
        handlers::webhooks::card_health,
        handlers::webhooks::wallet_webhook,
        handlers::webhooks::wallet_health,
        handlers::orders::create_order,
        handlers::orders::payment_status_by_order_id,
        handlers::orders::payment_status_by_payment_id,
        handlers::admin::list_conflicts,
        handlers::admin::list_orphans,
        handlers::health::health,
        handlers::health::api_status,
    ),
    components(schemas(
        ErrorResponse,
        WebhookAck,
        handlers::webhooks::WebhookResponse,
        PaymentProvider,
        PaymentOutcome,
        PaymentStatus,
        OrderStatus,
        PaymentStatusSnapshot,
        ConflictReason,
        ConflictRecord,
        OrphanEvent,
        handlers::orders::CreateOrderRequest,
        handlers::orders::OrderResponse,
    )),
    tags(
        (name = "webhooks", description = "Provider webhook ingestion"),
        (name = "orders", description = "Order registration and payment status"),
        (name = "admin", description = "Conflict and orphan audit"),
        (name = "health", description = "Liveness and service status")
    )
)]
pub struct ApiDoc;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi())
}
