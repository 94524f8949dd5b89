use axum::{
    Router,
    extract::{MatchedPath, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::get,
};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Label used for requests that matched no route.
pub const UNMATCHED_HANDLER: &str = "none";

/// Process-wide request instruments, cumulative for the process lifetime.
///
/// Prometheus families live in a private registry rendered by `/metrics`.
/// The application counters are mirrored to the global OpenTelemetry meter,
/// which exports over OTLP when telemetry is enabled and is a no-op otherwise.
#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Registry,
    requests: IntCounterVec,
    latency: HistogramVec,
    http_requests: IntCounterVec,
    http_duration: HistogramVec,
    otel: OtelInstruments,
}

#[derive(Clone)]
struct OtelInstruments {
    requests: Counter<u64>,
    latency: Histogram<f64>,
}

impl OtelInstruments {
    fn new() -> Self {
        let meter = global::meter("vision-api");
        let requests = meter
            .u64_counter("request_count")
            .with_description("Total API requests")
            .build();
        let latency = meter
            .f64_histogram("request_latency_seconds")
            .with_description("Request latency")
            .with_unit("s")
            .build();

        Self { requests, latency }
    }
}

impl MetricsRecorder {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("request_count_total", "Total API requests"),
            &["method", "endpoint"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("request_latency_seconds", "Request latency"),
            &["endpoint"],
        )?;

        let http_requests = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of requests by method, status and handler."),
            &["handler", "method", "status"],
        )?;
        let http_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Latency with only few buckets by handler.",
            )
            .buckets(vec![0.1, 0.5, 1.0]),
            &["handler", "method"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(http_requests.clone()))?;
        registry.register(Box::new(http_duration.clone()))?;

        Ok(Self {
            registry,
            requests,
            latency,
            http_requests,
            http_duration,
            otel: OtelInstruments::new(),
        })
    }

    pub fn record_request(&self, method: &str, endpoint: &str) {
        self.requests.with_label_values(&[method, endpoint]).inc();
        self.otel.requests.add(
            1,
            &[
                KeyValue::new("method", method.to_string()),
                KeyValue::new("endpoint", endpoint.to_string()),
            ],
        );
    }

    pub fn observe_latency(&self, endpoint: &str, seconds: f64) {
        self.latency.with_label_values(&[endpoint]).observe(seconds);
        self.otel
            .latency
            .record(seconds, &[KeyValue::new("endpoint", endpoint.to_string())]);
    }

    /// One finished HTTP exchange, keyed by route template. Status codes are
    /// grouped by class (`2xx`, `5xx`).
    pub fn record_http(&self, handler: &str, method: &str, status: StatusCode, seconds: f64) {
        let status = status_group(status);
        self.http_requests
            .with_label_values(&[handler, method, status.as_str()])
            .inc();
        self.http_duration
            .with_label_values(&[handler, method])
            .observe(seconds);
    }

    pub fn http_request_count(&self, handler: &str, method: &str, status: &str) -> u64 {
        self.http_requests
            .with_label_values(&[handler, method, status])
            .get()
    }

    pub fn request_count(&self, method: &str, endpoint: &str) -> u64 {
        self.requests.with_label_values(&[method, endpoint]).get()
    }

    pub fn latency_count(&self, endpoint: &str) -> u64 {
        self.latency.with_label_values(&[endpoint]).get_sample_count()
    }

    pub fn latency_sum(&self, endpoint: &str) -> f64 {
        self.latency.with_label_values(&[endpoint]).get_sample_sum()
    }

    /// Render every instrument in the Prometheus text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn status_group(status: StatusCode) -> String {
    format!("{}xx", status.as_u16() / 100)
}

/// Middleware recording `http_requests_total` and
/// `http_request_duration_seconds` for every routed request.
pub async fn track_http(
    State(recorder): State<MetricsRecorder>,
    request: Request,
    next: Next,
) -> Response {
    let handler = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_HANDLER.to_string(), |path| path.as_str().to_string());
    let method = request.method().as_str().to_string();

    let start = Instant::now();
    let response = next.run(request).await;

    recorder.record_http(&handler, &method, response.status(), start.elapsed().as_secs_f64());
    response
}

/// `GET /metrics` for the given recorder.
pub fn metrics_router(recorder: MetricsRecorder) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(recorder)
}

async fn render_metrics(State(recorder): State<MetricsRecorder>) -> Response {
    match recorder.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Background scrape endpoint on its own port.
///
/// Started once at startup and stopped when the API server stops. Request
/// handling never waits on it; a bind failure only disables scraping.
pub struct MetricsExporter {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MetricsExporter {
    /// Bind `addr` and serve in a background task.
    pub fn start(addr: String, recorder: MetricsRecorder) -> Self {
        let (tx, rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let listener = match TcpListener::bind(&addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    tracing::error!(addr = %addr, error = %e, "Metrics exporter failed to bind");
                    return;
                }
            };
            serve(listener, recorder, rx).await;
        });

        Self {
            shutdown: Some(tx),
            task,
        }
    }

    /// Serve on an already bound listener.
    pub fn with_listener(listener: TcpListener, recorder: MetricsRecorder) -> Self {
        let (tx, rx) = oneshot::channel();
        let task = tokio::spawn(serve(listener, recorder, rx));

        Self {
            shutdown: Some(tx),
            task,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Trigger graceful shutdown and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "Metrics exporter task ended abnormally");
        }
        tracing::info!("Metrics exporter stopped");
    }
}

async fn serve(listener: TcpListener, recorder: MetricsRecorder, shutdown: oneshot::Receiver<()>) {
    match listener.local_addr() {
        Ok(addr) => tracing::info!(addr = %addr, "Metrics exporter listening"),
        Err(e) => tracing::warn!(error = %e, "Metrics exporter address unknown"),
    }

    let app = metrics_router(recorder);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown.await;
        })
        .await;

    if let Err(e) = result {
        tracing::error!(error = %e, "Metrics exporter failed");
    }
}
