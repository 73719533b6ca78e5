//! Prometheus metrics for the kwire server.
//!
//! This module provides:
//! - Metrics registry with counters, gauges, and histograms
//! - HTTP server to expose metrics at `/metrics` endpoint

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Request duration histogram buckets (in seconds).
const DURATION_BUCKETS: &[f64] = &[0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5];

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head><title>kwire Metrics</title></head>
<body>
<h1>kwire Metrics</h1>
<p><a href="/metrics">Metrics</a></p>
</body>
</html>"#;

/// Prometheus metrics for the kwire server.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Total connections accepted.
    pub connections_total: Counter,
    /// Currently active connections.
    pub connections_active: Gauge,
    /// Total requests by API name.
    pub requests_total: CounterVec,
    /// Connection failures by kind.
    pub errors_total: CounterVec,
    /// Responses sent with a non-zero error code, by code name.
    pub response_errors_total: CounterVec,
    /// Request handling duration by API name.
    pub request_duration: HistogramVec,
    /// Requests for API keys the server does not handle.
    pub unsupported_requests_total: Counter,
}

impl Metrics {
    /// Creates a new Metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = Counter::with_opts(Opts::new(
            "kwire_connections_total",
            "Total number of connections accepted",
        ))?;
        registry.register(Box::new(connections_total.clone()))?;

        let connections_active = Gauge::with_opts(Opts::new(
            "kwire_connections_active",
            "Number of currently active connections",
        ))?;
        registry.register(Box::new(connections_active.clone()))?;

        let requests_total = CounterVec::new(
            Opts::new("kwire_requests_total", "Total requests by API"),
            &["api"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;

        let errors_total = CounterVec::new(
            Opts::new("kwire_errors_total", "Connection failures by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        let response_errors_total = CounterVec::new(
            Opts::new(
                "kwire_response_errors_total",
                "Responses sent with a non-zero error code",
            ),
            &["code"],
        )?;
        registry.register(Box::new(response_errors_total.clone()))?;

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "kwire_request_duration_seconds",
                "Request handling duration in seconds by API",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["api"],
        )?;
        registry.register(Box::new(request_duration.clone()))?;

        let unsupported_requests_total = Counter::with_opts(Opts::new(
            "kwire_unsupported_requests_total",
            "Requests for API keys the server does not handle",
        ))?;
        registry.register(Box::new(unsupported_requests_total.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            requests_total,
            errors_total,
            response_errors_total,
            request_duration,
            unsupported_requests_total,
        })
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        buffer
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Runs the HTTP metrics server.
///
/// The server listens on the given address and serves metrics at `/metrics`.
pub async fn run_metrics_server(
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);
    serve_metrics(listener, metrics, shutdown).await;
    Ok(())
}

/// Serves metrics on an already bound listener until shutdown.
pub async fn serve_metrics(
    listener: TcpListener,
    metrics: Arc<Metrics>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let metrics = metrics.clone();
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let metrics = metrics.clone();
                                async move { handle_request(req, metrics).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                tracing::debug!("Metrics connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Metrics server shutting down");
                break;
            }
        }
    }
}

/// Handles an HTTP request to the metrics server.
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            Bytes::from(metrics.encode()),
        ),
        "/health" | "/healthz" => {
            text_response(StatusCode::OK, "text/plain", Bytes::from_static(b"OK"))
        }
        "/" => text_response(
            StatusCode::OK,
            "text/html",
            Bytes::from_static(INDEX_HTML.as_bytes()),
        ),
        _ => text_response(
            StatusCode::NOT_FOUND,
            "text/plain",
            Bytes::from_static(b"Not Found"),
        ),
    };

    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
