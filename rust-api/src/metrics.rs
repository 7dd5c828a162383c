//! Prometheus metrics reporter.
//!
//! One `Metrics` value is created at startup and shared through `AppState`.
//! It owns its own registry, so tests can build independent instances.
//! Counters only ever increase for the life of the process.

use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Fixed latency buckets in milliseconds (`+Inf` is implicit).
pub const LATENCY_BUCKETS_MS: [f64; 6] = [10.0, 50.0, 100.0, 250.0, 500.0, 1000.0];

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Process-wide request counters and latency histogram.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    http_requests: IntCounterVec,
    webhook_requests: IntCounterVec,
    request_latency: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "HTTP requests by route and status"),
            &["path", "status"],
        )?;

        let webhook_requests = IntCounterVec::new(
            Opts::new("webhook_requests_total", "Webhook ingestion outcomes"),
            &["result"],
        )?;

        let request_latency = HistogramVec::new(
            HistogramOpts::new("request_latency_ms", "Request latency in milliseconds")
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["path"],
        )?;

        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(webhook_requests.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;

        Ok(Self {
            registry,
            http_requests,
            webhook_requests,
            request_latency,
        })
    }

    /// Record a finished HTTP request.
    pub fn observe_http(&self, path: &str, status: u16, latency: Duration) {
        self.http_requests
            .with_label_values(&[path, &status.to_string()])
            .inc();
        self.request_latency
            .with_label_values(&[path])
            .observe(latency.as_secs_f64() * 1000.0);
    }

    /// Record one webhook ingestion outcome.
    pub fn inc_webhook(&self, result: &str) {
        self.webhook_requests.with_label_values(&[result]).inc();
    }

    /// Current value of `webhook_requests_total{result}`.
    pub fn webhook_total(&self, result: &str) -> u64 {
        self.webhook_requests
            .get_metric_with_label_values(&[result])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Current value of `http_requests_total{path,status}`.
    pub fn http_total(&self, path: &str, status: u16) -> u64 {
        self.http_requests
            .get_metric_with_label_values(&[path, &status.to_string()])
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_render() {
        let metrics = Metrics::new().unwrap();
        metrics.inc_webhook("created");
        metrics.inc_webhook("created");
        metrics.inc_webhook("invalid_signature");
        metrics.observe_http("/webhook", 201, Duration::from_millis(3));

        assert_eq!(metrics.webhook_total("created"), 2);
        assert_eq!(metrics.webhook_total("invalid_signature"), 1);
        assert_eq!(metrics.http_total("/webhook", 201), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"webhook_requests_total{result="created"} 2"#));
        assert!(text.contains(r#"http_requests_total{path="/webhook",status="201"} 1"#));
        assert!(text.contains(r#"request_latency_ms_bucket{path="/webhook",le="10"} 1"#));
        assert!(text.contains(r#"request_latency_ms_bucket{path="/webhook",le="+Inf"} 1"#));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.inc_webhook("duplicate");

        assert_eq!(a.webhook_total("duplicate"), 1);
        assert_eq!(b.webhook_total("duplicate"), 0);
    }
}
