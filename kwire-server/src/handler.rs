//! Request dispatch and API handlers.

use crate::metrics::Metrics;
use kwire_protocol::{ApiKey, ApiVersion, ApiVersionsResponse, ErrorCode, Request, Response};
use std::sync::Arc;
use std::time::Instant;

/// Versions of ApiVersions this server answers with error code 0.
pub const API_VERSIONS_RANGE: ApiVersion = ApiVersion::new(ApiKey::ApiVersions.as_i16(), 0, 4);

/// SaslHandshake range advertised to clients. Requests for it are not handled.
pub const SASL_HANDSHAKE_RANGE: ApiVersion =
    ApiVersion::new(ApiKey::SaslHandshake.as_i16(), 1, 3);

/// The API version ranges this server advertises.
///
/// The table is fixed; build it with `Default` once at startup and share it
/// read-only between connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedApis {
    entries: Vec<ApiVersion>,
}

impl SupportedApis {
    /// Entries in advertisement order.
    pub fn entries(&self) -> &[ApiVersion] {
        &self.entries
    }

    pub fn find(&self, api_key: i16) -> Option<&ApiVersion> {
        self.entries.iter().find(|a| a.api_key == api_key)
    }
}

impl Default for SupportedApis {
    fn default() -> Self {
        Self {
            entries: vec![API_VERSIONS_RANGE, SASL_HANDSHAKE_RANGE],
        }
    }
}

/// Outcome of routing one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Encode and send this response, then keep the connection open.
    Respond(Response),
    /// No handler for the key; the connection is closed after notice.
    Unsupported { api_key: i16 },
}

/// Request handler.
pub struct RequestHandler {
    apis: Arc<SupportedApis>,
    /// Metrics for request tracking.
    metrics: Option<Arc<Metrics>>,
}

impl RequestHandler {
    /// Creates a handler serving the given API table.
    pub fn new(apis: Arc<SupportedApis>) -> Self {
        Self {
            apis,
            metrics: None,
        }
    }

    /// Sets the metrics instance for request tracking.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn supported_apis(&self) -> &Arc<SupportedApis> {
        &self.apis
    }

    /// Routes a decoded request to its handler.
    pub fn dispatch(&self, request: &Request) -> Dispatch {
        let start = Instant::now();

        let outcome = match ApiKey::from_i16(request.api_key) {
            Some(ApiKey::ApiVersions) => {
                Dispatch::Respond(Response::ApiVersions(self.build_api_versions(request)))
            }
            _ => Dispatch::Unsupported {
                api_key: request.api_key,
            },
        };

        if let Some(ref metrics) = self.metrics {
            match &outcome {
                Dispatch::Respond(response) => {
                    let api = response.name();
                    metrics.requests_total.with_label_values(&[api]).inc();
                    metrics
                        .request_duration
                        .with_label_values(&[api])
                        .observe(start.elapsed().as_secs_f64());
                    if let Some(code) = ErrorCode::from_i16(response.error_code()) {
                        if code != ErrorCode::None {
                            metrics
                                .response_errors_total
                                .with_label_values(&[&code.to_string()])
                                .inc();
                        }
                    }
                }
                Dispatch::Unsupported { .. } => {
                    metrics.requests_total.with_label_values(&["unsupported"]).inc();
                    metrics.unsupported_requests_total.inc();
                }
            }
        }

        outcome
    }

    /// Builds the ApiVersions response.
    ///
    /// The whole table is reported even when the requested version is
    /// rejected.
    pub fn build_api_versions(&self, request: &Request) -> ApiVersionsResponse {
        let error_code = if API_VERSIONS_RANGE.supports(request.api_version) {
            ErrorCode::None
        } else {
            ErrorCode::UnsupportedVersion
        };

        ApiVersionsResponse {
            error_code: error_code.as_i16(),
            api_keys: self.apis.entries().to_vec(),
            throttle_time_ms: 0,
        }
    }
}

impl Default for RequestHandler {
    fn default() -> Self {
        Self::new(Arc::new(SupportedApis::default()))
    }
}
