//! Daemon metrics: per-failure-code counters, join outcome counters and the
//! waiting gauge, rendered in Prometheus text format.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter names tracked by the daemon. Failure counters are keyed by the
/// event codes in [`crate::events`].
const COUNTERS: [&str; 10] = [
    "failure-205",
    "failure-206",
    "failure-207",
    "failure-208",
    "failure-210",
    "failure-211",
    "failure-212",
    "join-attempt",
    "join-fail",
    "join-success",
];

/// Process-wide joiner metrics.
pub struct Metrics {
    counters: BTreeMap<&'static str, AtomicU64>,
    waiting: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            counters: COUNTERS
                .iter()
                .map(|name| (*name, AtomicU64::new(0)))
                .collect(),
            waiting: AtomicU64::new(0),
        }
    }

    pub fn increment(&self, name: &str) {
        if let Some(counter) = self.counters.get(name) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            tracing::warn!(counter = name, "increment of unknown metric");
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Sets the waiting gauge: 1 while blocked on the subscription, 0 while
    /// processing.
    pub fn set_waiting(&self, value: u64) {
        self.waiting.store(value, Ordering::Relaxed);
    }

    pub fn waiting(&self) -> u64 {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Renders all metrics in Prometheus text format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP spliced_waiting Whether the daemon is waiting for work.\n");
        out.push_str("# TYPE spliced_waiting gauge\n");
        out.push_str(&format!("spliced_waiting {}\n", self.waiting()));

        for (name, counter) in &self.counters {
            let metric = format!("spliced_{}_total", name.replace('-', "_"));
            out.push_str(&format!("# TYPE {metric} counter\n"));
            out.push_str(&format!("{metric} {}\n", counter.load(Ordering::Relaxed)));
        }

        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get("join-attempt"), 0);
        metrics.increment("join-attempt");
        metrics.increment("join-attempt");
        assert_eq!(metrics.get("join-attempt"), 2);
    }

    #[test]
    fn unknown_counter_is_ignored() {
        let metrics = Metrics::new();
        metrics.increment("no-such-counter");
        assert_eq!(metrics.get("no-such-counter"), 0);
    }

    #[test]
    fn render_includes_all_series() {
        let metrics = Metrics::new();
        metrics.increment("join-success");
        metrics.set_waiting(1);
        let text = metrics.render();
        assert!(text.contains("spliced_waiting 1"));
        assert!(text.contains("spliced_join_success_total 1"));
        assert!(text.contains("spliced_failure_205_total 0"));
    }
}
