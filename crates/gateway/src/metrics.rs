use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static BACKEND_FETCHES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static MAP_LOOKUPS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static SUBMISSIONS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

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

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "civica_gateway_http_requests_total",
                    "Gateway HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create civica_gateway_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "civica_gateway_http_request_duration_seconds",
                    "Gateway HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create civica_gateway_http_request_duration_seconds"),
        )
    })
}

fn backend_fetches_total() -> &'static IntCounterVec {
    BACKEND_FETCHES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "civica_gateway_backend_fetches_total",
                    "Collection fetches issued against the document store.",
                ),
                &["collection", "outcome"],
            )
            .expect("create civica_gateway_backend_fetches_total"),
        )
    })
}

fn map_lookups_total() -> &'static IntCounterVec {
    MAP_LOOKUPS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "civica_gateway_map_lookups_total",
                    "Point-in-feature lookups by outcome.",
                ),
                &["outcome"],
            )
            .expect("create civica_gateway_map_lookups_total"),
        )
    })
}

fn submissions_total() -> &'static IntCounterVec {
    SUBMISSIONS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "civica_gateway_submissions_total",
                    "Contribution form submissions by form and outcome.",
                ),
                &["form", "outcome"],
            )
            .expect("create civica_gateway_submissions_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

/// `outcome` is one of `ok`, `error`, `cancelled`.
pub fn observe_backend_fetch(collection: &str, outcome: &str) {
    backend_fetches_total()
        .with_label_values(&[collection, outcome])
        .inc();
}

#[cfg(test)]
pub(crate) fn backend_fetch_count(collection: &str, outcome: &str) -> u64 {
    backend_fetches_total()
        .with_label_values(&[collection, outcome])
        .get()
}

pub fn observe_map_lookup(outcome: &str) {
    map_lookups_total().with_label_values(&[outcome]).inc();
}

pub fn observe_submission(form: &str, outcome: &str) {
    submissions_total().with_label_values(&[form, outcome]).inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = backend_fetches_total();
    let _ = map_lookups_total();
    let _ = submissions_total();

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
        observe_submission("candidates", "validation_failed");
        observe_map_lookup("miss");

        let (body, content_type) = render().expect("metrics should render");
        let text = String::from_utf8(body).expect("metrics are utf-8");

        assert!(content_type.starts_with("text/plain"));
        assert!(text.contains("civica_gateway_submissions_total"));
        assert!(text.contains("form=\"candidates\""));
        assert!(text.contains("civica_gateway_map_lookups_total"));
    }
}
