use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static REMOTE_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static REMOTE_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static GATED_SKIPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static STALE_RESPONSES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn remote_requests_total() -> &'static IntCounterVec {
    REMOTE_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "brewdesk_remote_requests_total",
                    "Remote store requests issued by entity stores.",
                ),
                &["resource", "method", "outcome"],
            )
            .expect("create brewdesk_remote_requests_total"),
        )
    })
}

fn remote_request_duration_seconds() -> &'static HistogramVec {
    REMOTE_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "brewdesk_remote_request_duration_seconds",
                    "Remote store request duration in seconds.",
                )
                .buckets(vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
                &["resource", "method", "outcome"],
            )
            .expect("create brewdesk_remote_request_duration_seconds"),
        )
    })
}

fn gated_skips_total() -> &'static IntCounterVec {
    GATED_SKIPS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "brewdesk_gated_skips_total",
                    "Operations skipped because the actor lacked the capability.",
                ),
                &["resource", "action"],
            )
            .expect("create brewdesk_gated_skips_total"),
        )
    })
}

fn stale_responses_total() -> &'static IntCounterVec {
    STALE_RESPONSES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "brewdesk_stale_responses_total",
                    "Successful responses dropped because their edit session was retired.",
                ),
                &["resource"],
            )
            .expect("create brewdesk_stale_responses_total"),
        )
    })
}

pub fn observe_remote_request(resource: &str, method: &str, outcome: &str, duration: Duration) {
    remote_requests_total()
        .with_label_values(&[resource, method, outcome])
        .inc();
    remote_request_duration_seconds()
        .with_label_values(&[resource, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn inc_gated_skip(resource: &str, action: &str) {
    gated_skips_total()
        .with_label_values(&[resource, action])
        .inc();
}

pub fn inc_stale_response(resource: &str) {
    stale_responses_total().with_label_values(&[resource]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_observed_series() {
        inc_gated_skip("users", "list");
        observe_remote_request("drinks", "GET", "success", Duration::from_millis(3));

        let (body, content_type) = render().expect("render should succeed");
        let text = String::from_utf8(body).expect("metrics should be utf-8");
        assert!(text.contains("brewdesk_gated_skips_total"));
        assert!(text.contains("brewdesk_remote_requests_total"));
        assert!(content_type.starts_with("text/plain"));
    }
}
