//! Provider payload normalization.
//!
//! Each provider speaks its own schema; this module maps both onto the
//! canonical [`PaymentEvent`]. Normalization is fail-closed: a missing or
//! unmappable required field rejects the delivery rather than guessing.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{PaymentEvent, PaymentOutcome, PaymentProvider};
use crate::signature::payload_digest;

/// CardGateway webhook payload. Amounts arrive as decimal strings in major
/// units ("50.00"), timestamps as RFC 3339.
#[derive(Debug, Deserialize)]
struct CardPayload {
    id: String,
    transaction_id: String,
    merchant_order_id: String,
    status: String,
    amount: String,
    currency: String,
    created_at: String,
}

/// WalletGateway webhook payload. Amounts are already integer minor units,
/// timestamps are unix seconds, and the signature travels in-band.
#[derive(Debug, Deserialize)]
struct WalletPayload {
    event_id: String,
    transaction_no: String,
    merchant_order_id: String,
    status: String,
    amount_minor: i64,
    currency: String,
    occurred_at: i64,
    #[allow(dead_code)]
    signature: String,
}

pub fn normalize_card(body: &[u8]) -> Result<PaymentEvent, ServiceError> {
    let payload: CardPayload = serde_json::from_slice(body)
        .map_err(|e| ServiceError::MalformedPayload(format!("card payload: {}", e)))?;

    let outcome = match payload.status.as_str() {
        "captured" => PaymentOutcome::Succeeded,
        "declined" => PaymentOutcome::Failed,
        "pending" => PaymentOutcome::Pending,
        "refunded" => PaymentOutcome::Refunded,
        "voided" => PaymentOutcome::Voided,
        "expired" => PaymentOutcome::Expired,
        other => {
            return Err(ServiceError::MalformedPayload(format!(
                "unknown card status '{}'",
                other
            )))
        }
    };

    let amount_minor = major_to_minor(&payload.amount)?;
    let occurred_at = DateTime::parse_from_rfc3339(&payload.created_at)
        .map_err(|e| ServiceError::MalformedPayload(format!("card created_at: {}", e)))?
        .with_timezone(&Utc);

    require_non_empty("id", &payload.id)?;
    require_non_empty("transaction_id", &payload.transaction_id)?;
    require_non_empty("merchant_order_id", &payload.merchant_order_id)?;
    require_currency(&payload.currency)?;

    let event = PaymentEvent {
        provider: PaymentProvider::CardGateway,
        external_event_id: payload.id,
        external_transaction_id: payload.transaction_id,
        order_reference_id: payload.merchant_order_id,
        outcome,
        amount_minor,
        currency: payload.currency,
        occurred_at,
        raw_payload_digest: payload_digest(body),
    };
    debug!(
        provider = %event.provider,
        event_id = %event.external_event_id,
        outcome = %event.outcome,
        "normalized card webhook"
    );
    Ok(event)
}

pub fn normalize_wallet(body: &[u8]) -> Result<PaymentEvent, ServiceError> {
    let payload: WalletPayload = serde_json::from_slice(body)
        .map_err(|e| ServiceError::MalformedPayload(format!("wallet payload: {}", e)))?;

    let outcome = match payload.status.as_str() {
        "SUCCESS" => PaymentOutcome::Succeeded,
        "FAILURE" => PaymentOutcome::Failed,
        "PENDING" => PaymentOutcome::Pending,
        "REFUND" => PaymentOutcome::Refunded,
        "VOID" => PaymentOutcome::Voided,
        "EXPIRED" => PaymentOutcome::Expired,
        other => {
            return Err(ServiceError::MalformedPayload(format!(
                "unknown wallet status '{}'",
                other
            )))
        }
    };

    if payload.amount_minor < 0 {
        return Err(ServiceError::MalformedPayload(
            "negative amount_minor".into(),
        ));
    }
    let occurred_at = Utc
        .timestamp_opt(payload.occurred_at, 0)
        .single()
        .ok_or_else(|| {
            ServiceError::MalformedPayload(format!(
                "wallet occurred_at out of range: {}",
                payload.occurred_at
            ))
        })?;

    require_non_empty("event_id", &payload.event_id)?;
    require_non_empty("transaction_no", &payload.transaction_no)?;
    require_non_empty("merchant_order_id", &payload.merchant_order_id)?;
    require_currency(&payload.currency)?;

    let event = PaymentEvent {
        provider: PaymentProvider::WalletGateway,
        external_event_id: payload.event_id,
        external_transaction_id: payload.transaction_no,
        order_reference_id: payload.merchant_order_id,
        outcome,
        amount_minor: payload.amount_minor,
        currency: payload.currency,
        occurred_at,
        raw_payload_digest: payload_digest(body),
    };
    debug!(
        provider = %event.provider,
        event_id = %event.external_event_id,
        outcome = %event.outcome,
        "normalized wallet webhook"
    );
    Ok(event)
}

/// Converts a decimal-string major-unit amount ("50.00", "7", "12.5") to
/// integer minor units assuming a two-digit exponent. Rejects negatives,
/// more than two fraction digits, and anything non-numeric. Floats are never
/// involved; money stays integral end to end.
fn major_to_minor(amount: &str) -> Result<i64, ServiceError> {
    let amount = amount.trim();
    if amount.is_empty() || amount.starts_with('-') || amount.starts_with('+') {
        return Err(ServiceError::MalformedPayload(format!(
            "invalid amount '{}'",
            amount
        )));
    }

    let (whole, frac) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty()
        || frac.len() > 2
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !frac.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ServiceError::MalformedPayload(format!(
            "invalid amount '{}'",
            amount
        )));
    }

    let whole: i64 = whole
        .parse()
        .map_err(|_| ServiceError::MalformedPayload(format!("amount overflow '{}'", amount)))?;
    let frac_minor = if frac.is_empty() {
        0
    } else {
        let parsed: i64 = frac.parse().map_err(|_| {
            ServiceError::MalformedPayload(format!("invalid amount '{}'", amount))
        })?;
        if frac.len() == 1 {
            parsed * 10
        } else {
            parsed
        }
    };
    whole
        .checked_mul(100)
        .and_then(|m| m.checked_add(frac_minor))
        .ok_or_else(|| ServiceError::MalformedPayload(format!("amount overflow '{}'", amount)))
}

fn require_non_empty(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::MalformedPayload(format!("empty {}", field)));
    }
    Ok(())
}

/// ISO 4217 alpha-3, upper-case. Order registration applies the same rule so
/// no order can be created with a currency no event will ever carry.
pub(crate) fn is_iso_alpha3_upper(currency: &str) -> bool {
    currency.len() == 3 && currency.bytes().all(|b| b.is_ascii_uppercase())
}

fn require_currency(currency: &str) -> Result<(), ServiceError> {
    if !is_iso_alpha3_upper(currency) {
        return Err(ServiceError::MalformedPayload(format!(
            "invalid currency '{}'",
            currency
        )));
    }
    Ok(())
}
