//! Latency tracking for pricing decisions.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Percentile snapshot served by the stats endpoint, in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySnapshot {
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub samples: u64,
}

impl LatencySnapshot {
    fn empty() -> Self {
        Self { p50_ms: None, p95_ms: None, p99_ms: None, samples: 0 }
    }
}

/// Histogram over `recommend` call durations, cache hits included. The gap
/// between the fast percentiles and the tail shows how often a request
/// actually waited on a scrape rather than the cache.
pub struct DecisionLatency {
    micros: Mutex<hdrhistogram::Histogram<u64>>,
}

impl DecisionLatency {
    /// A cache hit resolves in microseconds; a scrape-bound call can spend
    /// the full navigation deadline plus queue time, so the histogram spans
    /// 1us to 100s at 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 100_000_000, 3)
            .expect("valid histogram bounds");
        Self { micros: Mutex::new(histogram) }
    }

    /// Record one pricing decision, successful or not.
    pub fn observe(&self, elapsed: Duration) {
        let us = elapsed.as_micros().min(u128::from(u64::MAX)) as u64;
        if let Ok(mut h) = self.micros.lock() {
            let _ = h.record(us.max(1));
        }
    }

    pub fn snapshot(&self) -> LatencySnapshot {
        let Ok(h) = self.micros.lock() else {
            return LatencySnapshot::empty();
        };
        if h.len() == 0 {
            return LatencySnapshot::empty();
        }
        let ms_at = |quantile: f64| Some(h.value_at_quantile(quantile) as f64 / 1000.0);
        LatencySnapshot {
            p50_ms: ms_at(0.5),
            p95_ms: ms_at(0.95),
            p99_ms: ms_at(0.99),
            samples: h.len(),
        }
    }
}
