//! Order persistence behind a trait, with optimistic concurrency.
//!
//! Writers never hold locks across the state machine; they read a snapshot,
//! decide, then compare-and-swap on the order's version. A lost race surfaces
//! as [`ServiceError::ConcurrentModification`] and the caller re-reads.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::{ConflictRecord, Order, OrphanEvent};

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Creates a new order. The `unique_payment_id` must be unused.
    async fn insert(&self, order: Order) -> Result<(), ServiceError>;

    async fn get(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    /// Resolves the merchant correlation token to its order.
    async fn get_by_payment_id(&self, unique_payment_id: &str)
        -> Result<Option<Order>, ServiceError>;

    /// Replaces the stored order iff its version still equals
    /// `expected_version`. The caller passes the pre-bump version it read.
    async fn update_with_version(
        &self,
        order: Order,
        expected_version: u64,
    ) -> Result<(), ServiceError>;

    /// Appends to the conflict audit trail.
    async fn record_conflict(&self, conflict: ConflictRecord) -> Result<(), ServiceError>;

    /// Parks a verified event that matched no order.
    async fn record_orphan(&self, orphan: OrphanEvent) -> Result<(), ServiceError>;

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, ServiceError>;

    async fn list_orphans(&self) -> Result<Vec<OrphanEvent>, ServiceError>;
}

/// DashMap-backed store with a secondary index on the payment token.
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, Order>,
    by_payment_id: DashMap<String, Uuid>,
    conflicts: DashMap<Uuid, ConflictRecord>,
    orphans: DashMap<Uuid, OrphanEvent>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<(), ServiceError> {
        // Claim the token first; it is the externally visible uniqueness.
        match self.by_payment_id.entry(order.unique_payment_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ServiceError::Conflict(format!(
                    "unique_payment_id '{}' already exists",
                    order.unique_payment_id
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.id);
            }
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|o| o.clone()))
    }

    async fn get_by_payment_id(
        &self,
        unique_payment_id: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let id = match self.by_payment_id.get(unique_payment_id) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.get(id).await
    }

    async fn update_with_version(
        &self,
        order: Order,
        expected_version: u64,
    ) -> Result<(), ServiceError> {
        let mut stored = self
            .orders
            .get_mut(&order.id)
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order.id)))?;
        if stored.version != expected_version {
            return Err(ServiceError::ConcurrentModification(order.id));
        }
        *stored = order;
        Ok(())
    }

    async fn record_conflict(&self, conflict: ConflictRecord) -> Result<(), ServiceError> {
        self.conflicts.insert(conflict.id, conflict);
        Ok(())
    }

    async fn record_orphan(&self, orphan: OrphanEvent) -> Result<(), ServiceError> {
        self.orphans.insert(orphan.id, orphan);
        Ok(())
    }

    async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, ServiceError> {
        let mut out: Vec<_> = self.conflicts.iter().map(|c| c.clone()).collect();
        out.sort_by_key(|c| c.recorded_at);
        Ok(out)
    }

    async fn list_orphans(&self) -> Result<Vec<OrphanEvent>, ServiceError> {
        let mut out: Vec<_> = self.orphans.iter().map(|o| o.clone()).collect();
        out.sort_by_key(|o| o.recorded_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn insert_and_lookup_both_keys() {
        let store = InMemoryOrderStore::new();
        let order = Order::new("P-123".into(), 5000, "EGP".into());
        let id = order.id;
        store.insert(order).await.unwrap();

        assert!(store.get(id).await.unwrap().is_some());
        let by_token = store.get_by_payment_id("P-123").await.unwrap().unwrap();
        assert_eq!(by_token.id, id);
        assert!(store.get_by_payment_id("P-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_payment_token_rejected() {
        let store = InMemoryOrderStore::new();
        store
            .insert(Order::new("P-123".into(), 5000, "EGP".into()))
            .await
            .unwrap();
        let err = store
            .insert(Order::new("P-123".into(), 9000, "EGP".into()))
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::Conflict(_));
    }

    #[tokio::test]
    async fn version_cas_rejects_stale_writer() {
        let store = InMemoryOrderStore::new();
        let order = Order::new("P-123".into(), 5000, "EGP".into());
        store.insert(order.clone()).await.unwrap();

        // Two workers read version 1; only the first write lands.
        let mut first = store.get(order.id).await.unwrap().unwrap();
        let mut second = first.clone();

        first.version += 1;
        store.update_with_version(first, 1).await.unwrap();

        second.version += 1;
        let err = store.update_with_version(second, 1).await.unwrap_err();
        assert_matches!(err, ServiceError::ConcurrentModification(_));

        assert_eq!(store.get(order.id).await.unwrap().unwrap().version, 2);
    }

    #[tokio::test]
    async fn audit_lists_are_ordered_by_time() {
        use crate::models::{ConflictReason, PaymentOutcome, PaymentProvider, PaymentStatus};
        let store = InMemoryOrderStore::new();
        for n in 0..3 {
            store
                .record_conflict(ConflictRecord {
                    id: Uuid::new_v4(),
                    order_id: Uuid::new_v4(),
                    provider: PaymentProvider::CardGateway,
                    external_event_id: format!("evt_{n}"),
                    reason: ConflictReason::TerminalStateSticky,
                    incoming_outcome: PaymentOutcome::Succeeded,
                    incoming_occurred_at: chrono::Utc::now(),
                    payment_status_at_conflict: PaymentStatus::Failed,
                    recorded_at: chrono::Utc::now() + chrono::Duration::seconds(n),
                })
                .await
                .unwrap();
        }
        let listed = store.list_conflicts().await.unwrap();
        assert_eq!(listed.len(), 3);
        assert!(listed.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }
}
