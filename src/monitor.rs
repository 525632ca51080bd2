//! Counters, gauges, histograms, structured JSON event log, and health
//! registry (spec §4.18, C18).
//!
//! This module *is* the crate's logging substrate — the teacher repo this
//! one grew from has no `tracing` dependency; it emits structured events
//! through its own sink (see `stats.rs`/`progress.rs`), and this module
//! keeps that shape rather than bolting on a second logging facade
//! (see SPEC_FULL.md §A).

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

pub type HealthCheckFn = Box<dyn Fn() -> HealthStatus + Send + Sync>;

#[derive(Default)]
struct Histogram {
    samples: Vec<f64>,
}

impl Histogram {
    fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
        sorted[idx]
    }
}

#[derive(Debug, Serialize)]
pub struct HistogramSummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub count: usize,
}

pub struct Monitoring {
    counters: Mutex<HashMap<String, i64>>,
    gauges: Mutex<HashMap<String, f64>>,
    histograms: Mutex<HashMap<String, Histogram>>,
    health_checks: Mutex<HashMap<String, HealthCheckFn>>,
    log_sink: Mutex<Box<dyn Write + Send>>,
    service_name: String,
}

impl Monitoring {
    pub fn new(service_name: &str, sink: Box<dyn Write + Send>) -> Self {
        Monitoring {
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
            health_checks: Mutex::new(HashMap::new()),
            log_sink: Mutex::new(sink),
            service_name: service_name.to_string(),
        }
    }

    fn label_key(name: &str, labels: &[(&str, &str)]) -> String {
        if labels.is_empty() {
            name.to_string()
        } else {
            let joined = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
            format!("{name}{{{joined}}}")
        }
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)], n: i64) {
        let key = Self::label_key(name, labels);
        let mut guard = self.counters.lock().expect("counters lock poisoned");
        *guard.entry(key).or_insert(0) += n;
    }

    pub fn gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::label_key(name, labels);
        let mut guard = self.gauges.lock().expect("gauges lock poisoned");
        guard.insert(key, value);
    }

    pub fn histogram(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let key = Self::label_key(name, labels);
        let mut guard = self.histograms.lock().expect("histograms lock poisoned");
        guard.entry(key).or_default().samples.push(value);
    }

    pub fn histogram_summary(&self, name: &str, labels: &[(&str, &str)]) -> HistogramSummary {
        let key = Self::label_key(name, labels);
        let guard = self.histograms.lock().expect("histograms lock poisoned");
        match guard.get(&key) {
            Some(h) => HistogramSummary {
                p50: h.percentile(0.50),
                p95: h.percentile(0.95),
                p99: h.percentile(0.99),
                count: h.samples.len(),
            },
            None => HistogramSummary { p50: 0.0, p95: 0.0, p99: 0.0, count: 0 },
        }
    }

    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> i64 {
        let key = Self::label_key(name, labels);
        *self.counters.lock().expect("counters lock poisoned").get(&key).unwrap_or(&0)
    }

    /// `log_event` (spec §4.18): one JSON object per line.
    pub fn log_event(&self, level: &str, event: &str, fields: serde_json::Value) {
        let mut record = serde_json::json!({
            "ts": Utc::now().to_rfc3339(),
            "level": level,
            "service": self.service_name,
            "event": event,
        });
        if let (Some(obj), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
            for (k, v) in extra {
                obj.insert(k.clone(), v.clone());
            }
        }
        let mut sink = self.log_sink.lock().expect("log sink lock poisoned");
        let _ = writeln!(sink, "{record}");
    }

    pub fn register_health(&self, component: &str, check: HealthCheckFn) {
        self.health_checks
            .lock()
            .expect("health checks lock poisoned")
            .insert(component.to_string(), check);
    }

    /// `health.overall()` (spec §4.18): `healthy` iff every component is
    /// `healthy|degraded`; `unhealthy` if any is `unhealthy`.
    pub fn overall_health(&self) -> HealthStatus {
        let guard = self.health_checks.lock().expect("health checks lock poisoned");
        let mut any_degraded = false;
        for check in guard.values() {
            match check() {
                HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
                HealthStatus::Degraded => any_degraded = true,
                HealthStatus::Healthy => {}
            }
        }
        if any_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// `log_request` (spec §4.18): updates counters and histograms for an
    /// HTTP-shaped call.
    pub fn log_request(&self, endpoint: &str, method: &str, status: u16, duration_ms: f64) {
        let labels = [("endpoint", endpoint), ("method", method)];
        self.counter("requests_total", &labels, 1);
        self.histogram("request_duration_ms", duration_ms, &labels);
        if status >= 500 {
            self.counter("request_errors_total", &labels, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> Box<dyn Write + Send> {
        Box::new(Vec::new())
    }

    #[test]
    fn counter_accumulates_by_label_key() {
        let m = Monitoring::new("test", sink());
        m.counter("ingest_total", &[("kind", "pdf")], 1);
        m.counter("ingest_total", &[("kind", "pdf")], 2);
        m.counter("ingest_total", &[("kind", "text")], 5);
        assert_eq!(m.counter_value("ingest_total", &[("kind", "pdf")]), 3);
        assert_eq!(m.counter_value("ingest_total", &[("kind", "text")]), 5);
    }

    #[test]
    fn histogram_percentiles_are_monotonic() {
        let m = Monitoring::new("test", sink());
        for v in [10.0, 20.0, 30.0, 40.0, 50.0] {
            m.histogram("latency_ms", v, &[]);
        }
        let summary = m.histogram_summary("latency_ms", &[]);
        assert!(summary.p50 <= summary.p95);
        assert!(summary.p95 <= summary.p99);
        assert_eq!(summary.count, 5);
    }

    #[test]
    fn overall_health_is_unhealthy_if_any_component_unhealthy() {
        let m = Monitoring::new("test", sink());
        m.register_health("db", Box::new(|| HealthStatus::Healthy));
        m.register_health("llm", Box::new(|| HealthStatus::Unhealthy));
        assert_eq!(m.overall_health(), HealthStatus::Unhealthy);
    }

    #[test]
    fn overall_health_is_degraded_when_no_component_unhealthy_but_one_degraded() {
        let m = Monitoring::new("test", sink());
        m.register_health("db", Box::new(|| HealthStatus::Healthy));
        m.register_health("llm", Box::new(|| HealthStatus::Degraded));
        assert_eq!(m.overall_health(), HealthStatus::Degraded);
    }
}
