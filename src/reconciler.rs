//! Webhook reconciliation pipeline.
//!
//! Order of operations for a verified, normalized event: reserve its id in
//! the idempotency ledger, resolve the target order, run the state machine,
//! persist under optimistic concurrency, commit the ledger, acknowledge.
//! Conflicts and orphans are successful outcomes from the provider's point
//! of view; they are committed and acknowledged with 200 so the provider
//! stops redelivering, and surface through the audit endpoints instead.

use chrono::{Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::ledger::{IdempotencyLedger, Reservation};
use crate::metrics::{names, MetricsRegistry};
use crate::models::{
    ConflictReason, ConflictRecord, EventDisposition, Order, OrphanEvent, PaymentEvent,
    PaymentStatus, PaymentStatusSnapshot,
};
use crate::notifier::{notify_async, FulfillmentNotification, FulfillmentNotifier};
use crate::state_machine::{apply_transition, decide, Decision};
use crate::store::OrderStore;

/// Acknowledgement returned to the provider. Everything here is HTTP 200;
/// rejections and retryables travel as [`ServiceError`] instead.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookAck {
    Applied {
        order_id: Uuid,
        payment_status: PaymentStatus,
    },
    /// Event id seen before; prior disposition replayed without side effects.
    Duplicate {
        order_id: Option<Uuid>,
        payment_status: Option<PaymentStatus>,
    },
    /// Legal-but-unapplicable event; recorded for operators.
    ConflictRecorded { reason: ConflictReason },
    /// No order matched the reference; parked for manual reconciliation.
    Orphaned,
}

pub struct Reconciler {
    store: Arc<dyn OrderStore>,
    ledger: Arc<dyn IdempotencyLedger>,
    notifier: Arc<dyn FulfillmentNotifier>,
    metrics: Arc<MetricsRegistry>,
    void_window: Duration,
    apply_retry_limit: u32,
    processing_timeout: std::time::Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn OrderStore>,
        ledger: Arc<dyn IdempotencyLedger>,
        notifier: Arc<dyn FulfillmentNotifier>,
        metrics: Arc<MetricsRegistry>,
        void_window: Duration,
        apply_retry_limit: u32,
        processing_timeout: std::time::Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            metrics,
            void_window,
            apply_retry_limit,
            processing_timeout,
        }
    }

    /// Registers an order at checkout time so later webhooks can resolve it.
    pub async fn create_order(
        &self,
        unique_payment_id: String,
        expected_amount_minor: i64,
        currency: String,
    ) -> Result<Order, ServiceError> {
        if expected_amount_minor <= 0 {
            return Err(ServiceError::ValidationError(
                "expected_amount_minor must be positive".into(),
            ));
        }
        if !crate::normalizer::is_iso_alpha3_upper(&currency) {
            return Err(ServiceError::ValidationError(format!(
                "currency must be an ISO 4217 alpha-3 code, got '{}'",
                currency
            )));
        }
        let order = Order::new(unique_payment_id, expected_amount_minor, currency);
        self.store.insert(order.clone()).await?;
        info!(order_id = %order.id, unique_payment_id = %order.unique_payment_id, "order registered");
        Ok(order)
    }

    /// Runs the full pipeline for one normalized event, under the processing
    /// budget. On timeout the reservation is released so redelivery can
    /// start over, and the provider gets a retryable error.
    pub async fn process_event(&self, event: PaymentEvent) -> Result<WebhookAck, ServiceError> {
        match tokio::time::timeout(self.processing_timeout, self.process_inner(&event)).await {
            Ok(result) => result,
            Err(_) => {
                self.metrics.inc(names::PROCESSING_TIMEOUTS);
                let _ = self
                    .ledger
                    .release(event.provider, &event.external_event_id)
                    .await;
                warn!(
                    provider = %event.provider,
                    event_id = %event.external_event_id,
                    "webhook processing exceeded budget"
                );
                Err(ServiceError::Timeout(format!(
                    "processing budget exceeded for event {}",
                    event.external_event_id
                )))
            }
        }
    }

    async fn process_inner(&self, event: &PaymentEvent) -> Result<WebhookAck, ServiceError> {
        match self
            .ledger
            .check_and_reserve(event.provider, &event.external_event_id)
            .await?
        {
            Reservation::Fresh => {}
            Reservation::AlreadyApplied(record) => {
                self.metrics.inc(names::EVENTS_DUPLICATE);
                info!(
                    provider = %event.provider,
                    event_id = %event.external_event_id,
                    disposition = %record.disposition,
                    "duplicate delivery acknowledged from ledger"
                );
                return Ok(WebhookAck::Duplicate {
                    order_id: record.order_id,
                    payment_status: record.resulting_payment_status,
                });
            }
            Reservation::InFlight => {
                // Another worker holds the lease; redeliver later rather
                // than risk double-applying.
                return Err(ServiceError::TransientInfraFailure(format!(
                    "event {} is already being processed",
                    event.external_event_id
                )));
            }
        }

        // Reservation held from here on; every path must commit or release.
        match self.resolve_and_apply(event).await {
            Ok(ack) => Ok(ack),
            Err(e) => {
                let _ = self
                    .ledger
                    .release(event.provider, &event.external_event_id)
                    .await;
                Err(e)
            }
        }
    }

    async fn resolve_and_apply(&self, event: &PaymentEvent) -> Result<WebhookAck, ServiceError> {
        let order = match self
            .store
            .get_by_payment_id(&event.order_reference_id)
            .await?
        {
            Some(order) => order,
            None => return self.park_orphan(event).await,
        };

        let mut current = order;
        let mut attempts = 0u32;
        loop {
            // Per-order witness. Catches the crash window where the order
            // write landed but the ledger commit did not; redelivery heals
            // the ledger instead of re-applying.
            if current.has_applied(event.provider, &event.external_event_id) {
                self.ledger
                    .commit(
                        event.provider,
                        &event.external_event_id,
                        Some(current.id),
                        EventDisposition::Applied,
                        Some(current.payment_status),
                    )
                    .await?;
                self.metrics.inc(names::EVENTS_DUPLICATE);
                return Ok(WebhookAck::Duplicate {
                    order_id: Some(current.id),
                    payment_status: Some(current.payment_status),
                });
            }

            match decide(&current, event, self.void_window) {
                Decision::Conflict(reason) => return self.record_conflict(event, &current, reason).await,
                Decision::Apply(transition) => {
                    let read_version = current.version;
                    let mut updated = current.clone();
                    apply_transition(&mut updated, event, &transition);

                    match self.store.update_with_version(updated.clone(), read_version).await {
                        Ok(()) => {
                            self.ledger
                                .commit(
                                    event.provider,
                                    &event.external_event_id,
                                    Some(updated.id),
                                    EventDisposition::Applied,
                                    Some(updated.payment_status),
                                )
                                .await?;
                            self.metrics.inc(names::EVENTS_APPLIED);
                            info!(
                                order_id = %updated.id,
                                provider = %event.provider,
                                event_id = %event.external_event_id,
                                payment_status = %updated.payment_status,
                                "event applied"
                            );
                            if transition.notify_fulfillment {
                                self.metrics.inc(names::NOTIFICATIONS_TRIGGERED);
                                notify_async(
                                    self.notifier.clone(),
                                    FulfillmentNotification::for_order(&updated),
                                );
                            }
                            return Ok(WebhookAck::Applied {
                                order_id: updated.id,
                                payment_status: updated.payment_status,
                            });
                        }
                        Err(ServiceError::ConcurrentModification(_)) => {
                            attempts += 1;
                            self.metrics.inc(names::CAS_RETRIES);
                            if attempts >= self.apply_retry_limit {
                                return Err(ServiceError::TransientInfraFailure(format!(
                                    "apply retry limit reached for event {}",
                                    event.external_event_id
                                )));
                            }
                            // Lost the race; re-read and re-decide against
                            // the winner's state.
                            current = self
                                .store
                                .get_by_payment_id(&event.order_reference_id)
                                .await?
                                .ok_or_else(|| {
                                    ServiceError::InternalError(
                                        "order vanished during apply".into(),
                                    )
                                })?;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    async fn park_orphan(&self, event: &PaymentEvent) -> Result<WebhookAck, ServiceError> {
        self.store
            .record_orphan(OrphanEvent {
                id: Uuid::new_v4(),
                provider: event.provider,
                external_event_id: event.external_event_id.clone(),
                order_reference_id: event.order_reference_id.clone(),
                outcome: event.outcome,
                amount_minor: event.amount_minor,
                currency: event.currency.clone(),
                raw_payload_digest: event.raw_payload_digest.clone(),
                recorded_at: Utc::now(),
            })
            .await?;
        self.ledger
            .commit(
                event.provider,
                &event.external_event_id,
                None,
                EventDisposition::Orphaned,
                None,
            )
            .await?;
        self.metrics.inc(names::EVENTS_ORPHANED);
        warn!(
            provider = %event.provider,
            event_id = %event.external_event_id,
            order_reference_id = %event.order_reference_id,
            "orphan event parked; no matching order"
        );
        Ok(WebhookAck::Orphaned)
    }

    async fn record_conflict(
        &self,
        event: &PaymentEvent,
        order: &Order,
        reason: ConflictReason,
    ) -> Result<WebhookAck, ServiceError> {
        self.store
            .record_conflict(ConflictRecord {
                id: Uuid::new_v4(),
                order_id: order.id,
                provider: event.provider,
                external_event_id: event.external_event_id.clone(),
                reason,
                incoming_outcome: event.outcome,
                incoming_occurred_at: event.occurred_at,
                payment_status_at_conflict: order.payment_status,
                recorded_at: Utc::now(),
            })
            .await?;
        self.ledger
            .commit(
                event.provider,
                &event.external_event_id,
                Some(order.id),
                EventDisposition::Conflict,
                Some(order.payment_status),
            )
            .await?;
        self.metrics.inc(names::EVENTS_CONFLICT);
        warn!(
            order_id = %order.id,
            provider = %event.provider,
            event_id = %event.external_event_id,
            %reason,
            "conflicting event recorded"
        );
        Ok(WebhookAck::ConflictRecorded { reason })
    }

    pub async fn payment_status_by_order_id(
        &self,
        order_id: Uuid,
    ) -> Result<PaymentStatusSnapshot, ServiceError> {
        let order = self
            .store
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;
        Ok(snapshot(&order))
    }

    pub async fn payment_status_by_payment_id(
        &self,
        unique_payment_id: &str,
    ) -> Result<PaymentStatusSnapshot, ServiceError> {
        let order = self
            .store
            .get_by_payment_id(unique_payment_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment id {}", unique_payment_id))
            })?;
        Ok(snapshot(&order))
    }

    pub async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, ServiceError> {
        self.store.list_conflicts().await
    }

    pub async fn list_orphans(&self) -> Result<Vec<OrphanEvent>, ServiceError> {
        self.store.list_orphans().await
    }
}

fn snapshot(order: &Order) -> PaymentStatusSnapshot {
    PaymentStatusSnapshot {
        unique_payment_id: order.unique_payment_id.clone(),
        payment_status: order.payment_status,
        order_status: order.order_status,
    }
}
