//! Metrics / Tracing hooks (§2 row 11, [SUPPLEMENT]).
//!
//! A small Prometheus text-exposition surface for the per-route counters
//! the route table already maintains, generalized with latency
//! histograms. Grounded on `routing_config.rs`'s `RoutingStats`
//! (per-route atomic counters) — the teacher tracks counts only; this
//! adds latency because the component table names "latency histograms"
//! explicitly.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

const LATENCY_BUCKETS_MS: &[f64] = &[5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0];

#[derive(Default)]
struct RouteHistogram {
    bucket_counts: Vec<u64>,
    sum_ms: f64,
    count: u64,
}

impl RouteHistogram {
    fn new() -> Self {
        Self {
            bucket_counts: vec![0; LATENCY_BUCKETS_MS.len() + 1],
            sum_ms: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, duration: Duration) {
        let ms = duration.as_secs_f64() * 1000.0;
        self.sum_ms += ms;
        self.count += 1;
        let mut placed = false;
        for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
            if ms <= *bound {
                self.bucket_counts[i] += 1;
                placed = true;
                break;
            }
        }
        if !placed {
            *self.bucket_counts.last_mut().unwrap() += 1;
        }
    }
}

/// Process-wide metrics registry. One instance, shared via `Arc` from
/// `AppState`.
#[derive(Default)]
pub struct Metrics {
    route_latency: Mutex<HashMap<String, RouteHistogram>>,
    error_counts: Mutex<HashMap<&'static str, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_route_latency(&self, route_key: &str, duration: Duration) {
        let mut histograms = self.route_latency.lock().expect("metrics lock poisoned");
        histograms
            .entry(route_key.to_string())
            .or_insert_with(RouteHistogram::new)
            .observe(duration);
    }

    pub fn record_error(&self, error_type: &'static str) {
        let mut counts = self.error_counts.lock().expect("metrics lock poisoned");
        *counts.entry(error_type).or_insert(0) += 1;
    }

    /// Renders the Prometheus text exposition format for the `/metrics`
    /// scrape endpoint.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP gateway_route_latency_ms Per-route request latency in milliseconds\n");
        out.push_str("# TYPE gateway_route_latency_ms histogram\n");
        let histograms = self.route_latency.lock().expect("metrics lock poisoned");
        for (route, hist) in histograms.iter() {
            let mut cumulative = 0u64;
            for (i, bound) in LATENCY_BUCKETS_MS.iter().enumerate() {
                cumulative += hist.bucket_counts[i];
                out.push_str(&format!(
                    "gateway_route_latency_ms_bucket{{route=\"{route}\",le=\"{bound}\"}} {cumulative}\n"
                ));
            }
            cumulative += hist.bucket_counts.last().unwrap();
            out.push_str(&format!(
                "gateway_route_latency_ms_bucket{{route=\"{route}\",le=\"+Inf\"}} {cumulative}\n"
            ));
            out.push_str(&format!("gateway_route_latency_ms_sum{{route=\"{route}\"}} {}\n", hist.sum_ms));
            out.push_str(&format!("gateway_route_latency_ms_count{{route=\"{route}\"}} {}\n", hist.count));
        }
        drop(histograms);

        out.push_str("# HELP gateway_errors_total Errors by type\n");
        out.push_str("# TYPE gateway_errors_total counter\n");
        let errors = self.error_counts.lock().expect("metrics lock poisoned");
        for (error_type, count) in errors.iter() {
            out.push_str(&format!("gateway_errors_total{{type=\"{error_type}\"}} {count}\n"));
        }

        out
    }
}
