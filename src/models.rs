use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Payment providers that deliver webhooks to this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentProvider {
    /// Card / online gateway: signs the raw request body.
    CardGateway,
    /// Wallet / BNPL gateway: signs a fixed subset of payload fields.
    WalletGateway,
}

/// Provider-reported outcome, normalized across both gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Pending,
    Refunded,
    Voided,
    Expired,
}

/// Authoritative payment lifecycle state of an order.
///
/// `Pending -> {Succeeded, Failed, Expired}`; `Succeeded -> {Refunded, Voided}`.
/// Everything except `Pending` and `Succeeded` is fully terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
    Expired,
    Refunded,
    Voided,
}

impl PaymentStatus {
    /// A terminal status never re-enters `Pending`. `Succeeded` still admits
    /// the explicit refund/void edges.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

/// Derived order state; not independently settable once payment is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    /// The order status implied by a payment status.
    pub fn derived_from(payment: PaymentStatus) -> Self {
        match payment {
            PaymentStatus::Pending => OrderStatus::Created,
            PaymentStatus::Succeeded | PaymentStatus::Refunded => OrderStatus::Confirmed,
            PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Voided => {
                OrderStatus::Cancelled
            }
        }
    }
}

/// Canonical, provider-agnostic payment event produced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub provider: PaymentProvider,
    /// Provider-assigned event id, unique per provider; the deduplication key.
    pub external_event_id: String,
    /// Provider's transaction/order reference.
    pub external_transaction_id: String,
    /// Merchant-side order identifier embedded by the provider.
    pub order_reference_id: String,
    pub outcome: PaymentOutcome,
    /// Settled amount in integer minor units (may be partial for refunds).
    pub amount_minor: i64,
    /// ISO 4217 currency code.
    pub currency: String,
    /// Provider-reported timestamp.
    pub occurred_at: DateTime<Utc>,
    /// SHA-256 hex digest of the raw body, retained for audit/replay diagnosis.
    pub raw_payload_digest: String,
}

/// An event id already consumed by an order, the per-order idempotency witness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEvent {
    pub provider: PaymentProvider,
    pub external_event_id: String,
}

/// Payment-relevant projection of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Merchant-generated correlation token, set at checkout; inbound events
    /// resolve back to the order through it.
    pub unique_payment_id: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    /// Charge the checkout collaborator expects, in minor units.
    pub expected_amount_minor: i64,
    pub currency: String,
    /// Accumulated partial refunds, in minor units.
    pub refunded_minor: i64,
    /// Ordered set of events already applied to this order.
    pub applied_events: Vec<AppliedEvent>,
    /// Provider and event that settled the order, once terminal.
    pub settled_by: Option<AppliedEvent>,
    pub settled_transaction_id: Option<String>,
    /// `occurred_at` of the applied terminal event; anchors the void window.
    pub settled_occurred_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency guard; strictly increases on every accepted write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(unique_payment_id: String, expected_amount_minor: i64, currency: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            unique_payment_id,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Created,
            expected_amount_minor,
            currency,
            refunded_minor: 0,
            applied_events: Vec::new(),
            settled_by: None,
            settled_transaction_id: None,
            settled_occurred_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_applied(&self, provider: PaymentProvider, external_event_id: &str) -> bool {
        self.applied_events
            .iter()
            .any(|e| e.provider == provider && e.external_event_id == external_event_id)
    }
}

/// Why a syntactically valid event could not be legally applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictReason {
    /// Order already holds a terminal state; terminal states are sticky.
    TerminalStateSticky,
    /// Reported amount/currency does not match the expected charge.
    AmountMismatch,
    /// The edge does not exist in the transition table.
    InvalidTransition,
    /// Void reported after the provider's void window elapsed.
    VoidWindowExpired,
    /// Refund total would exceed the charged amount.
    OverRefund,
    /// A second provider reported a terminal outcome for an order another
    /// provider already settled.
    ProviderDisagreement,
}

/// Audit record for an event that was observed but not applied.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConflictRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub provider: PaymentProvider,
    pub external_event_id: String,
    pub reason: ConflictReason,
    pub incoming_outcome: PaymentOutcome,
    pub incoming_occurred_at: DateTime<Utc>,
    /// Payment status the order held when the conflict was recorded.
    pub payment_status_at_conflict: PaymentStatus,
    pub recorded_at: DateTime<Utc>,
}

/// A verified event referencing no known order, parked for manual reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrphanEvent {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub external_event_id: String,
    pub order_reference_id: String,
    pub outcome: PaymentOutcome,
    pub amount_minor: i64,
    pub currency: String,
    pub raw_payload_digest: String,
    pub recorded_at: DateTime<Utc>,
}

/// How a ledger-committed event was ultimately disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EventDisposition {
    Applied,
    Conflict,
    Orphaned,
}

/// Append-only ledger entry keyed by `(provider, external_event_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub provider: PaymentProvider,
    pub external_event_id: String,
    pub order_id: Option<Uuid>,
    pub disposition: EventDisposition,
    pub resulting_payment_status: Option<PaymentStatus>,
    pub applied_at: DateTime<Utc>,
}

/// Client-facing view of an order's payment state. Conflicts are an operator
/// concern and never surface here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentStatusSnapshot {
    pub unique_payment_id: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
}
