//! Order registration and payment-status queries.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::{ErrorResponse, ServiceError};
use crate::models::{OrderStatus, PaymentStatus, PaymentStatusSnapshot};
use crate::AppState;

/// Checkout collaborator's registration call, made before the provider ever
/// sees the payment.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    /// Merchant correlation token embedded in provider payloads.
    #[validate(length(min = 1, max = 128))]
    pub unique_payment_id: String,
    /// Expected charge in integer minor units.
    #[validate(range(min = 1))]
    pub expected_amount_minor: i64,
    /// ISO 4217 alpha-3 code.
    #[validate(length(equal = 3))]
    pub currency: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub unique_payment_id: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub expected_amount_minor: i64,
    pub currency: String,
    pub version: u64,
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    tag = "orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order registered", body = OrderResponse),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 409, description = "unique_payment_id already registered", body = ErrorResponse)
    )
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ServiceError> {
    request.validate()?;
    let order = state
        .reconciler
        .create_order(
            request.unique_payment_id,
            request.expected_amount_minor,
            request.currency.to_ascii_uppercase(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(OrderResponse {
            id: order.id,
            unique_payment_id: order.unique_payment_id,
            payment_status: order.payment_status,
            order_status: order.order_status,
            expected_amount_minor: order.expected_amount_minor,
            currency: order.currency,
            version: order.version,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/payment-status",
    tag = "orders",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Current payment state", body = PaymentStatusSnapshot),
        (status = 404, description = "Unknown order", body = ErrorResponse)
    )
)]
pub async fn payment_status_by_order_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentStatusSnapshot>, ServiceError> {
    let snapshot = state.reconciler.payment_status_by_order_id(id).await?;
    Ok(Json(snapshot))
}

#[utoipa::path(
    get,
    path = "/api/v1/payment-status/{unique_payment_id}",
    tag = "orders",
    params(("unique_payment_id" = String, Path, description = "Merchant correlation token")),
    responses(
        (status = 200, description = "Current payment state", body = PaymentStatusSnapshot),
        (status = 404, description = "Unknown payment id", body = ErrorResponse)
    )
)]
pub async fn payment_status_by_payment_id(
    State(state): State<AppState>,
    Path(unique_payment_id): Path<String>,
) -> Result<Json<PaymentStatusSnapshot>, ServiceError> {
    let snapshot = state
        .reconciler
        .payment_status_by_payment_id(&unique_payment_id)
        .await?;
    Ok(Json(snapshot))
}
