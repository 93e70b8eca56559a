//! Prometheus metrics.

use axum::{body::Body, http::Request, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
};
use tracing::Span;

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Simple request counter
    pub static ref INCOMING_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("incoming_requests", "The number of HTTP requests received"),
        &["http_method"]
    ).expect("metric can be created");
    // Request counter by status code
    pub static ref RESPONSE_CODE_COLLECTOR: IntCounterVec = IntCounterVec::new(
        Opts::new("outgoing_response", "The number of responses sent."),
        &["status_code"]
    ).expect("metric can be created");
    // Request histogram by response time
    pub static ref RESPONSE_TIME_COLLECTOR: HistogramVec = HistogramVec::new(
        HistogramOpts{
            common_opts: Opts::new("response_time", "The time taken to respond to each request"),
            buckets: prometheus::DEFAULT_BUCKETS.to_vec(),
        },
        &[],
    ).expect("metric can be created");
    // Dataset cache hits
    pub static ref DATASET_CACHE_HITS: IntCounter = IntCounter::new(
        "dataset_cache_hits", "The number of dataset requests served from the cache"
    ).expect("metric can be created");
    // Dataset cache misses
    pub static ref DATASET_CACHE_MISSES: IntCounter = IntCounter::new(
        "dataset_cache_misses", "The number of dataset requests not served from the cache"
    ).expect("metric can be created");
    // Bytes retrieved from the object store
    pub static ref BYTES_RETRIEVED: IntCounter = IntCounter::new(
        "bytes_retrieved", "The number of bytes retrieved from the object store"
    ).expect("metric can be created");
}

/// Register all metrics with the registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(INCOMING_REQUESTS.clone()),
        Box::new(RESPONSE_CODE_COLLECTOR.clone()),
        Box::new(RESPONSE_TIME_COLLECTOR.clone()),
        Box::new(DATASET_CACHE_HITS.clone()),
        Box::new(DATASET_CACHE_MISSES.clone()),
        Box::new(BYTES_RETRIEVED.clone()),
    ];
    for collector in collectors {
        if let Err(err) = REGISTRY.register(collector) {
            tracing::warn!("failed to register metric: {}", err);
        }
    }
}

/// Renders the registry in the Prometheus text exposition format.
pub async fn metrics_handler() -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("failed to encode metrics: {}", err);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Increments the prometheus counter on all incoming requests, labelled by http method
pub fn request_counter(request: &Request<Body>, _span: &Span) {
    INCOMING_REQUESTS
        .with_label_values(&[&request.method().to_string().to_ascii_uppercase()])
        .inc();
}

/// Increment the prometheus counter on all outgoing responses, labelled by status code
pub fn record_response_metrics<B>(
    response: &Response<B>,
    latency: std::time::Duration,
    _span: &Span,
) {
    RESPONSE_CODE_COLLECTOR
        .with_label_values(&[response.status().as_str()])
        .inc();

    RESPONSE_TIME_COLLECTOR
        .with_label_values(&[])
        .observe(latency.as_secs_f64());
}
