//! Idempotency ledger.
//!
//! Every webhook is keyed by `(provider, external_event_id)`. The ledger is
//! consulted before any state-machine work: a fresh key is reserved under a
//! lease, a committed key short-circuits to the recorded disposition, and a
//! live reservation means another worker is mid-flight. Leases exist so a
//! crashed worker cannot wedge an event id forever.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{EventDisposition, IdempotencyRecord, PaymentProvider, PaymentStatus};
use uuid::Uuid;

/// Result of attempting to reserve an event id for processing.
#[derive(Debug, Clone)]
pub enum Reservation {
    /// Unseen id; the caller holds the lease and must commit or release.
    Fresh,
    /// Already fully processed; replay the recorded disposition.
    AlreadyApplied(IdempotencyRecord),
    /// Another worker holds a live lease on this id.
    InFlight,
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Atomically claims `(provider, event_id)` for processing.
    async fn check_and_reserve(
        &self,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<Reservation, ServiceError>;

    /// Finalizes a held reservation. Committed entries are immutable.
    async fn commit(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        order_id: Option<Uuid>,
        disposition: EventDisposition,
        resulting_payment_status: Option<PaymentStatus>,
    ) -> Result<(), ServiceError>;

    /// Drops a held reservation without recording an outcome, so the
    /// provider's redelivery can start over.
    async fn release(
        &self,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
enum LedgerEntry {
    Reserved { lease_expires_at: DateTime<Utc> },
    Committed(IdempotencyRecord),
}

/// DashMap-backed ledger. A durable deployment would put this behind the same
/// trait on a transactional store; the semantics here are the contract.
pub struct InMemoryLedger {
    entries: DashMap<(PaymentProvider, String), LedgerEntry>,
    lease: Duration,
}

impl InMemoryLedger {
    pub fn new(lease: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            lease,
        }
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn check_and_reserve(
        &self,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<Reservation, ServiceError> {
        let key = (provider, event_id.to_string());
        let now = Utc::now();

        // The entry API serializes concurrent claimants on the same key.
        match self.entries.entry(key) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(LedgerEntry::Reserved {
                    lease_expires_at: now + self.lease,
                });
                debug!(%provider, event_id, "reserved event id");
                Ok(Reservation::Fresh)
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => match slot.get() {
                LedgerEntry::Committed(record) => Ok(Reservation::AlreadyApplied(record.clone())),
                LedgerEntry::Reserved { lease_expires_at } => {
                    if *lease_expires_at <= now {
                        // Stale lease from a dead worker; take it over.
                        slot.insert(LedgerEntry::Reserved {
                            lease_expires_at: now + self.lease,
                        });
                        debug!(%provider, event_id, "took over expired reservation");
                        Ok(Reservation::Fresh)
                    } else {
                        Ok(Reservation::InFlight)
                    }
                }
            },
        }
    }

    async fn commit(
        &self,
        provider: PaymentProvider,
        event_id: &str,
        order_id: Option<Uuid>,
        disposition: EventDisposition,
        resulting_payment_status: Option<PaymentStatus>,
    ) -> Result<(), ServiceError> {
        let key = (provider, event_id.to_string());
        let record = IdempotencyRecord {
            provider,
            external_event_id: event_id.to_string(),
            order_id,
            disposition,
            resulting_payment_status,
            applied_at: Utc::now(),
        };
        match self.entries.get_mut(&key) {
            Some(mut entry) => match entry.value() {
                LedgerEntry::Committed(_) => Err(ServiceError::InternalError(format!(
                    "ledger entry for {}/{} already committed",
                    provider, event_id
                ))),
                LedgerEntry::Reserved { .. } => {
                    *entry.value_mut() = LedgerEntry::Committed(record);
                    Ok(())
                }
            },
            None => Err(ServiceError::InternalError(format!(
                "commit without reservation for {}/{}",
                provider, event_id
            ))),
        }
    }

    async fn release(
        &self,
        provider: PaymentProvider,
        event_id: &str,
    ) -> Result<(), ServiceError> {
        let key = (provider, event_id.to_string());
        // Only drop reservations; a committed entry stays forever.
        self.entries
            .remove_if(&key, |_, v| matches!(v, LedgerEntry::Reserved { .. }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(Duration::seconds(60))
    }

    #[tokio::test]
    async fn fresh_then_duplicate() {
        let l = ledger();
        let r = l
            .check_and_reserve(PaymentProvider::CardGateway, "evt_1")
            .await
            .unwrap();
        assert_matches!(r, Reservation::Fresh);

        l.commit(
            PaymentProvider::CardGateway,
            "evt_1",
            None,
            EventDisposition::Applied,
            Some(PaymentStatus::Succeeded),
        )
        .await
        .unwrap();

        let r = l
            .check_and_reserve(PaymentProvider::CardGateway, "evt_1")
            .await
            .unwrap();
        assert_matches!(
            r,
            Reservation::AlreadyApplied(rec) if rec.disposition == EventDisposition::Applied
        );
    }

    #[tokio::test]
    async fn same_id_different_provider_is_independent() {
        let l = ledger();
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
        assert_matches!(
            l.check_and_reserve(PaymentProvider::WalletGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
    }

    #[tokio::test]
    async fn concurrent_reservation_reports_in_flight() {
        let l = ledger();
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::InFlight
        );
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimable() {
        let l = InMemoryLedger::new(Duration::seconds(-1));
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
        // The first lease is already expired, so a second worker takes over.
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
    }

    #[tokio::test]
    async fn release_allows_retry() {
        let l = ledger();
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
        l.release(PaymentProvider::CardGateway, "evt_1").await.unwrap();
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::Fresh
        );
    }

    #[tokio::test]
    async fn release_never_drops_a_committed_entry() {
        let l = ledger();
        l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
            .await
            .unwrap();
        l.commit(
            PaymentProvider::CardGateway,
            "evt_1",
            None,
            EventDisposition::Orphaned,
            None,
        )
        .await
        .unwrap();
        l.release(PaymentProvider::CardGateway, "evt_1").await.unwrap();
        assert_matches!(
            l.check_and_reserve(PaymentProvider::CardGateway, "evt_1")
                .await
                .unwrap(),
            Reservation::AlreadyApplied(_)
        );
    }
}
