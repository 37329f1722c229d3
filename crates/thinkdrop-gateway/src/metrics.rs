use std::collections::BTreeMap;

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionStats {
    pub requests: u64,
    pub errors: u64,
    pub total_elapsed_ms: u64,
}

/// Per-action request counters, aggregated into health reports.
#[derive(Default)]
pub struct ActionMetrics {
    actions: DashMap<String, ActionStats>,
}

impl ActionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, action: &str, elapsed_ms: u64, is_error: bool) {
        let mut stats = self.actions.entry(action.to_string()).or_default();
        stats.requests += 1;
        stats.total_elapsed_ms += elapsed_ms;
        if is_error {
            stats.errors += 1;
        }
    }

    /// Stable-ordered snapshot for serialization.
    pub fn snapshot(&self) -> BTreeMap<String, ActionStats> {
        self.actions
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_accumulate_per_action() {
        let metrics = ActionMetrics::new();
        metrics.record("memory.store", 12, false);
        metrics.record("memory.store", 8, true);
        metrics.record("memory.search", 5, false);

        let snapshot = metrics.snapshot();
        let store = snapshot.get("memory.store").expect("store stats");
        assert_eq!(store.requests, 2);
        assert_eq!(store.errors, 1);
        assert_eq!(store.total_elapsed_ms, 20);
        assert_eq!(snapshot.get("memory.search").expect("search").requests, 1);
    }

    #[test]
    fn snapshot_is_sorted_by_action() {
        let metrics = ActionMetrics::new();
        metrics.record("b.action", 1, false);
        metrics.record("a.action", 1, false);
        let keys: Vec<_> = metrics.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["a.action", "b.action"]);
    }
}
