//! Downstream fulfillment notification.
//!
//! Fired exactly once per order, on the `Pending -> Succeeded` edge. Delivery
//! is best-effort with bounded retries and never blocks or fails webhook
//! acknowledgement; the receiver deduplicates on the idempotency key if we
//! ever double-send across process restarts.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::errors::ServiceError;
use crate::models::Order;

const IDEMPOTENCY_HEADER: &str = "idempotency-key";
const SIGNATURE_HEADER: &str = "x-fulfillment-signature";
const TIMESTAMP_HEADER: &str = "x-fulfillment-timestamp";
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Body POSTed to the fulfillment webhook.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentNotification {
    pub order_id: uuid::Uuid,
    pub unique_payment_id: String,
    pub payment_status: crate::models::PaymentStatus,
    pub order_status: crate::models::OrderStatus,
    pub amount_minor: i64,
    pub currency: String,
    pub settled_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl FulfillmentNotification {
    pub fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            unique_payment_id: order.unique_payment_id.clone(),
            payment_status: order.payment_status,
            order_status: order.order_status,
            amount_minor: order.expected_amount_minor,
            currency: order.currency.clone(),
            settled_at: order.settled_occurred_at,
        }
    }

    /// Stable across redeliveries of the same state change.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.order_id, self.payment_status)
    }
}

#[async_trait]
pub trait FulfillmentNotifier: Send + Sync {
    async fn notify(&self, notification: FulfillmentNotification) -> Result<(), ServiceError>;
}

/// Delivers notifications over HTTP with an HMAC-SHA256 signature computed
/// over `"{timestamp}.{body}"`, mirroring the inbound card scheme so the
/// receiver can verify with the same recipe.
pub struct HttpFulfillmentNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
    max_retries: u32,
}

impl HttpFulfillmentNotifier {
    pub fn new(url: String, secret: String, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            secret,
            max_retries,
        }
    }

    fn sign(&self, timestamp: &str, body: &[u8]) -> Result<String, ServiceError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(format!("hmac init: {}", e)))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl FulfillmentNotifier for HttpFulfillmentNotifier {
    async fn notify(&self, notification: FulfillmentNotification) -> Result<(), ServiceError> {
        let body = serde_json::to_vec(&notification)
            .map_err(|e| ServiceError::SerializationError(e.to_string()))?;
        let key = notification.idempotency_key();

        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            let timestamp = chrono::Utc::now().timestamp().to_string();
            let signature = self.sign(&timestamp, &body)?;

            let result = self
                .client
                .post(&self.url)
                .header("content-type", "application/json")
                .header(IDEMPOTENCY_HEADER, &key)
                .header(TIMESTAMP_HEADER, &timestamp)
                .header(SIGNATURE_HEADER, &signature)
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    info!(
                        order_id = %notification.order_id,
                        attempt,
                        "fulfillment notification delivered"
                    );
                    return Ok(());
                }
                Ok(response) => {
                    warn!(
                        order_id = %notification.order_id,
                        attempt,
                        status = %response.status(),
                        "fulfillment endpoint rejected notification"
                    );
                    last_err = Some(ServiceError::ExternalServiceError(format!(
                        "fulfillment endpoint returned {}",
                        response.status()
                    )));
                }
                Err(e) => {
                    warn!(
                        order_id = %notification.order_id,
                        attempt,
                        error = %e,
                        "fulfillment notification send failed"
                    );
                    last_err = Some(ServiceError::ExternalServiceError(e.to_string()));
                }
            }

            if attempt < self.max_retries {
                let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| {
            ServiceError::ExternalServiceError("fulfillment delivery failed".into())
        }))
    }
}

/// Used when no fulfillment URL is configured.
pub struct NoopNotifier;

#[async_trait]
impl FulfillmentNotifier for NoopNotifier {
    async fn notify(&self, notification: FulfillmentNotification) -> Result<(), ServiceError> {
        info!(
            order_id = %notification.order_id,
            payment_status = %notification.payment_status,
            "fulfillment notifier disabled; dropping notification"
        );
        Ok(())
    }
}

/// Fire-and-forget dispatch; webhook acknowledgement never waits on delivery.
pub fn notify_async(notifier: Arc<dyn FulfillmentNotifier>, notification: FulfillmentNotification) {
    tokio::spawn(async move {
        let order_id = notification.order_id;
        if let Err(e) = notifier.notify(notification).await {
            error!(%order_id, error = %e, "fulfillment notification permanently failed");
        }
    });
}
