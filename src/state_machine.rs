//! Pure payment state-machine.
//!
//! [`decide`] inspects an order and a fresh normalized event and returns what
//! should happen, without touching storage or clocks other than the event's
//! own timestamps. All writes happen elsewhere; this module is trivially
//! testable and holds every transition rule in one place.

use chrono::Duration;

use crate::models::{
    ConflictReason, Order, OrderStatus, PaymentEvent, PaymentOutcome, PaymentStatus,
};

/// The state change a legal event produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    /// Minor units to add to the order's accumulated refunds.
    pub refunded_delta: i64,
    /// True when this event settles the order (anchors the void window).
    pub settles: bool,
    /// True exactly on the Pending -> Succeeded edge; the only transition
    /// that triggers downstream fulfillment.
    pub notify_fulfillment: bool,
}

/// Outcome of evaluating one event against one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Apply(Transition),
    Conflict(ConflictReason),
}

/// Decides how `event` applies to `order`.
///
/// First writer wins: once a terminal state is reached it never regresses,
/// regardless of provider timestamps. The only edges out of a terminal state
/// are the explicit refund and void edges from `Succeeded`.
pub fn decide(order: &Order, event: &PaymentEvent, void_window: Duration) -> Decision {
    match order.payment_status {
        PaymentStatus::Pending => decide_from_pending(order, event),
        PaymentStatus::Succeeded => decide_from_succeeded(order, event, void_window),
        // Fully terminal; nothing ever applies again.
        PaymentStatus::Failed
        | PaymentStatus::Expired
        | PaymentStatus::Refunded
        | PaymentStatus::Voided => Decision::Conflict(ConflictReason::TerminalStateSticky),
    }
}

fn decide_from_pending(order: &Order, event: &PaymentEvent) -> Decision {
    match event.outcome {
        PaymentOutcome::Pending => Decision::Apply(Transition {
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Created,
            refunded_delta: 0,
            settles: false,
            notify_fulfillment: false,
        }),
        PaymentOutcome::Succeeded => {
            if event.currency != order.currency
                || event.amount_minor != order.expected_amount_minor
            {
                return Decision::Conflict(ConflictReason::AmountMismatch);
            }
            Decision::Apply(Transition {
                payment_status: PaymentStatus::Succeeded,
                order_status: OrderStatus::Confirmed,
                refunded_delta: 0,
                settles: true,
                notify_fulfillment: true,
            })
        }
        PaymentOutcome::Failed => terminal_apply(PaymentStatus::Failed),
        PaymentOutcome::Expired => terminal_apply(PaymentStatus::Expired),
        // Money never moved; there is nothing to refund or void.
        PaymentOutcome::Refunded | PaymentOutcome::Voided => {
            Decision::Conflict(ConflictReason::InvalidTransition)
        }
    }
}

fn decide_from_succeeded(order: &Order, event: &PaymentEvent, void_window: Duration) -> Decision {
    match event.outcome {
        PaymentOutcome::Refunded => {
            if event.currency != order.currency {
                return Decision::Conflict(ConflictReason::AmountMismatch);
            }
            if event.amount_minor <= 0 {
                return Decision::Conflict(ConflictReason::InvalidTransition);
            }
            let total = order.refunded_minor.saturating_add(event.amount_minor);
            if total > order.expected_amount_minor {
                return Decision::Conflict(ConflictReason::OverRefund);
            }
            let fully_refunded = total == order.expected_amount_minor;
            Decision::Apply(Transition {
                payment_status: if fully_refunded {
                    PaymentStatus::Refunded
                } else {
                    PaymentStatus::Succeeded
                },
                order_status: OrderStatus::Confirmed,
                refunded_delta: event.amount_minor,
                settles: false,
                notify_fulfillment: false,
            })
        }
        PaymentOutcome::Voided => {
            let settled_at = match order.settled_occurred_at {
                Some(t) => t,
                None => return Decision::Conflict(ConflictReason::InvalidTransition),
            };
            if event.occurred_at > settled_at + void_window {
                return Decision::Conflict(ConflictReason::VoidWindowExpired);
            }
            terminal_apply(PaymentStatus::Voided)
        }
        // A second success from the other provider means the buyer was
        // charged twice; flag it for operators instead of picking a winner.
        PaymentOutcome::Succeeded => {
            let other_provider = order
                .settled_by
                .as_ref()
                .map(|s| s.provider != event.provider)
                .unwrap_or(false);
            if other_provider {
                Decision::Conflict(ConflictReason::ProviderDisagreement)
            } else {
                Decision::Conflict(ConflictReason::TerminalStateSticky)
            }
        }
        PaymentOutcome::Failed | PaymentOutcome::Expired | PaymentOutcome::Pending => {
            Decision::Conflict(ConflictReason::TerminalStateSticky)
        }
    }
}

// Failure, expiry, and void edges. No money moved (or it was reversed), so
// none of these record a settlement witness; that is exclusive to the
// Pending -> Succeeded edge.
fn terminal_apply(status: PaymentStatus) -> Decision {
    Decision::Apply(Transition {
        payment_status: status,
        order_status: OrderStatus::derived_from(status),
        refunded_delta: 0,
        settles: false,
        notify_fulfillment: false,
    })
}

/// Mutates `order` per an accepted transition. Bumps the version; the store's
/// compare-and-swap keys off the pre-bump value.
pub fn apply_transition(order: &mut Order, event: &PaymentEvent, transition: &Transition) {
    order.payment_status = transition.payment_status;
    order.order_status = transition.order_status;
    order.refunded_minor += transition.refunded_delta;
    order.applied_events.push(crate::models::AppliedEvent {
        provider: event.provider,
        external_event_id: event.external_event_id.clone(),
    });
    if transition.settles && order.settled_by.is_none() {
        order.settled_by = Some(crate::models::AppliedEvent {
            provider: event.provider,
            external_event_id: event.external_event_id.clone(),
        });
        order.settled_transaction_id = Some(event.external_transaction_id.clone());
        order.settled_occurred_at = Some(event.occurred_at);
    }
    order.version += 1;
    order.updated_at = chrono::Utc::now();
}
