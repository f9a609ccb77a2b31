//! Process-local reconciliation metrics.
//!
//! Plain atomics behind a registry; exported as Prometheus text on
//! `/metrics` and as JSON on `/metrics/json`.

use dashmap::DashMap;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters. Label-ish dimensions (provider, conflict
/// reason) are folded into the metric name at call sites.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, Arc<Counter>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::default()))
            .clone()
    }

    pub fn inc(&self, name: &str) {
        self.counter(name).inc();
    }

    /// Prometheus exposition text.
    pub fn export_text(&self) -> String {
        let mut names: Vec<String> = self.counters.iter().map(|e| e.key().clone()).collect();
        names.sort();

        let mut out = String::new();
        for name in names {
            if let Some(counter) = self.counters.get(&name) {
                out.push_str(&format!("# TYPE {} counter\n", name));
                out.push_str(&format!("{} {}\n", name, counter.get()));
            }
        }
        out
    }

    pub fn export_json(&self) -> serde_json::Value {
        let mut counters = serde_json::Map::new();
        for entry in self.counters.iter() {
            counters.insert(entry.key().clone(), json!(entry.value().get()));
        }
        json!({ "counters": counters })
    }
}

/// Well-known metric names, so call sites and dashboards agree.
pub mod names {
    pub const WEBHOOKS_RECEIVED_CARD: &str = "paysync_webhooks_received_card_total";
    pub const WEBHOOKS_RECEIVED_WALLET: &str = "paysync_webhooks_received_wallet_total";
    pub const SIGNATURE_FAILURES: &str = "paysync_signature_failures_total";
    pub const MALFORMED_PAYLOADS: &str = "paysync_malformed_payloads_total";
    pub const EVENTS_APPLIED: &str = "paysync_events_applied_total";
    pub const EVENTS_DUPLICATE: &str = "paysync_events_duplicate_total";
    pub const EVENTS_CONFLICT: &str = "paysync_events_conflict_total";
    pub const EVENTS_ORPHANED: &str = "paysync_events_orphaned_total";
    pub const CAS_RETRIES: &str = "paysync_apply_cas_retries_total";
    pub const PROCESSING_TIMEOUTS: &str = "paysync_processing_timeouts_total";
    pub const NOTIFICATIONS_TRIGGERED: &str = "paysync_fulfillment_notifications_total";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_export() {
        let registry = MetricsRegistry::new();
        registry.inc(names::EVENTS_APPLIED);
        registry.inc(names::EVENTS_APPLIED);
        registry.inc(names::EVENTS_CONFLICT);

        assert_eq!(registry.counter(names::EVENTS_APPLIED).get(), 2);

        let text = registry.export_text();
        assert!(text.contains("paysync_events_applied_total 2"));
        assert!(text.contains("# TYPE paysync_events_conflict_total counter"));

        let j = registry.export_json();
        assert_eq!(j["counters"]["paysync_events_applied_total"], 2);
    }

    #[test]
    fn unknown_counter_starts_at_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.counter("paysync_new_counter").get(), 0);
    }
}
