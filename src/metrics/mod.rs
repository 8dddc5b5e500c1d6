//! Prometheus text-exposition metrics for the TTS gateway (spec.md §4.5).
//!
//! No Prometheus client crate is pulled in: the reference implementation
//! hand-rolls its own exposition-format renderer (`server.py::render_prometheus`)
//! rather than reaching for a metrics library, and this module follows the
//! same shape line for line so the two stay easy to compare.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

const TTFA_RING_CAPACITY: usize = 5000;

/// Shared counters plus the TTFA summary ring, guarded the way the Python
/// `Metrics` class guards its fields with a single `asyncio.Lock`.
pub struct Metrics {
    active_connections: AtomicU64,
    sessions_total: AtomicU64,
    backpressure_total: AtomicU64,
    errors_total_by_code: Mutex<HashMap<String, u64>>,
    ttfa_ms: Mutex<VecDeque<f64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            active_connections: AtomicU64::new(0),
            sessions_total: AtomicU64::new(0),
            backpressure_total: AtomicU64::new(0),
            errors_total_by_code: Mutex::new(HashMap::new()),
            ttfa_ms: Mutex::new(VecDeque::with_capacity(TTFA_RING_CAPACITY)),
        }
    }

    pub fn inc_active(&self, delta: i64) {
        if delta >= 0 {
            self.active_connections.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.active_connections.fetch_sub((-delta) as u64, Ordering::Relaxed);
        }
    }

    pub fn inc_sessions(&self) {
        self.sessions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn inc_error(&self, code: &str) {
        let mut errors = self.errors_total_by_code.lock().await;
        *errors.entry(code.to_string()).or_insert(0) += 1;
        if code == "backpressure" {
            self.backpressure_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn observe_ttfa_ms(&self, ttfa_ms: f64) {
        let mut ring = self.ttfa_ms.lock().await;
        if ring.len() == TTFA_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(ttfa_ms);
    }

    pub async fn render_prometheus(&self) -> String {
        let active = self.active_connections.load(Ordering::Relaxed);
        let sessions_total = self.sessions_total.load(Ordering::Relaxed);
        let backpressure_total = self.backpressure_total.load(Ordering::Relaxed);
        let errors_by_code = self.errors_total_by_code.lock().await.clone();
        let ttfa_values: Vec<f64> = self.ttfa_ms.lock().await.iter().copied().collect();

        let (p50, p95, p99) = percentiles(&ttfa_values);
        let ttfa_sum: f64 = ttfa_values.iter().sum();
        let ttfa_count = ttfa_values.len() as f64;

        let mut lines = Vec::new();
        lines.push("# HELP ws_gateway_active_connections Active WebSocket connections.".to_string());
        lines.push("# TYPE ws_gateway_active_connections gauge".to_string());
        lines.push(fmt_line("ws_gateway_active_connections", active as f64, &[]));

        lines.push("# HELP ws_gateway_sessions_total Total sessions started (start messages accepted).".to_string());
        lines.push("# TYPE ws_gateway_sessions_total counter".to_string());
        lines.push(fmt_line("ws_gateway_sessions_total", sessions_total as f64, &[]));

        lines.push("# HELP ws_gateway_errors_total Total errors by code.".to_string());
        lines.push("# TYPE ws_gateway_errors_total counter".to_string());
        let mut codes: Vec<&String> = errors_by_code.keys().collect();
        codes.sort();
        for code in codes {
            let count = errors_by_code[code];
            lines.push(fmt_line("ws_gateway_errors_total", count as f64, &[("code", code)]));
        }

        lines.push("# HELP ws_gateway_backpressure_total Total backpressure errors.".to_string());
        lines.push("# TYPE ws_gateway_backpressure_total counter".to_string());
        lines.push(fmt_line("ws_gateway_backpressure_total", backpressure_total as f64, &[]));

        lines.push(
            "# HELP ws_gateway_ttfa_ms Time-to-first-audio in milliseconds (summary over recent samples)."
                .to_string(),
        );
        lines.push("# TYPE ws_gateway_ttfa_ms summary".to_string());
        lines.push(fmt_line("ws_gateway_ttfa_ms", p50, &[("quantile", "0.5")]));
        lines.push(fmt_line("ws_gateway_ttfa_ms", p95, &[("quantile", "0.95")]));
        lines.push(fmt_line("ws_gateway_ttfa_ms", p99, &[("quantile", "0.99")]));
        lines.push(fmt_line("ws_gateway_ttfa_ms_sum", ttfa_sum, &[]));
        lines.push(fmt_line("ws_gateway_ttfa_ms_count", ttfa_count, &[]));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('"', "\\\"")
}

fn fmt_line(name: &str, value: f64, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return format!("{name} {value}");
    }
    let mut sorted = labels.to_vec();
    sorted.sort_by_key(|(k, _)| *k);
    let labels_str: Vec<String> = sorted
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    format!("{name}{{{}}} {value}", labels_str.join(","))
}

/// Linear-interpolation percentiles over an unsorted sample set, grounded on
/// `server.py::_percentiles`.
fn percentiles(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut xs = values.to_vec();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let pick = |p: f64| -> f64 {
        if p <= 0.0 {
            return xs[0];
        }
        if p >= 100.0 {
            return xs[xs.len() - 1];
        }
        let idx = (xs.len() - 1) as f64 * (p / 100.0);
        let lo = idx.floor() as usize;
        let hi = (lo + 1).min(xs.len() - 1);
        let frac = idx - lo as f64;
        xs[lo] * (1.0 - frac) + xs[hi] * frac
    };

    (pick(50.0), pick(95.0), pick(99.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentiles_of_empty_is_zero() {
        assert_eq!(percentiles(&[]), (0.0, 0.0, 0.0));
    }

    #[test]
    fn percentiles_of_single_value() {
        assert_eq!(percentiles(&[42.0]), (42.0, 42.0, 42.0));
    }

    #[test]
    fn percentiles_interpolate_linearly() {
        let values: Vec<f64> = (1..=101).map(|n| n as f64).collect();
        let (p50, _, _) = percentiles(&values);
        assert!((p50 - 51.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn render_prometheus_has_expected_help_and_type_lines() {
        let metrics = Metrics::new();
        metrics.inc_active(2);
        metrics.inc_sessions();
        metrics.inc_error("bad_request").await;
        metrics.observe_ttfa_ms(120.0).await;

        let rendered = metrics.render_prometheus().await;
        assert!(rendered.contains("# TYPE ws_gateway_active_connections gauge"));
        assert!(rendered.contains("ws_gateway_active_connections 2"));
        assert!(rendered.contains("ws_gateway_sessions_total 1"));
        assert!(rendered.contains("ws_gateway_errors_total{code=\"bad_request\"} 1"));
        assert!(rendered.contains("ws_gateway_ttfa_ms{quantile=\"0.5\"}"));
        assert!(rendered.ends_with('\n'));
    }

    #[tokio::test]
    async fn backpressure_error_code_increments_backpressure_total() {
        let metrics = Metrics::new();
        metrics.inc_error("backpressure").await;
        let rendered = metrics.render_prometheus().await;
        assert!(rendered.contains("ws_gateway_backpressure_total 1"));
    }

    #[tokio::test]
    async fn ttfa_ring_evicts_oldest_past_capacity() {
        let metrics = Metrics::new();
        for i in 0..(TTFA_RING_CAPACITY + 10) {
            metrics.observe_ttfa_ms(i as f64).await;
        }
        let ring = metrics.ttfa_ms.lock().await;
        assert_eq!(ring.len(), TTFA_RING_CAPACITY);
        assert_eq!(*ring.front().unwrap(), 10.0);
    }
}
