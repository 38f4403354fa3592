//! Local gateway endpoints and the `/api/*` proxy dispatcher.
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    body::Body as AxumBody,
    response::{IntoResponse, Response},
};
use hyper::Request;
use serde_json::{Map, Value, json};
use tracing::Instrument;

use crate::{
    adapters::health_checker::HealthChecker,
    core::{
        error::{GatewayError, RoutingError, UpstreamError},
        proxy::{self, ForwardedInfo, ProxyOutcome},
        registry::ServiceRegistry,
    },
    metrics,
    ports::http_client::{HttpClient, HttpClientError},
    tracing_setup,
};

pub const GATEWAY_NAME: &str = "TutorMatch API Gateway";
pub const GATEWAY_DESCRIPTION: &str = "Proxy gateway for TutorMatch microservices";

fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Local gateway endpoints plus the reverse-proxy dispatcher.
#[derive(Clone)]
pub struct HttpHandler {
    registry: Arc<ServiceRegistry>,
    http_client: Arc<dyn HttpClient>,
    health_checker: Arc<HealthChecker>,
    request_timeout: Duration,
}

impl HttpHandler {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        http_client: Arc<dyn HttpClient>,
        health_checker: Arc<HealthChecker>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            http_client,
            health_checker,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// `GET /`
    pub fn welcome(&self) -> Value {
        json!({
            "name": GATEWAY_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "timestamp": timestamp(),
            "message": format!("Welcome to the {GATEWAY_NAME}"),
        })
    }

    /// `GET /status`: static description of the routing table.
    pub fn status(&self) -> Value {
        let routes: Vec<Value> = self
            .registry
            .entries()
            .iter()
            .map(|entry| {
                let port = url::Url::parse(&entry.base_url)
                    .ok()
                    .and_then(|u| u.port_or_known_default());
                json!({
                    "prefix": entry.path_prefix,
                    "service": entry.name,
                    "port": port,
                })
            })
            .collect();

        json!({
            "name": GATEWAY_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "status": "running",
            "timestamp": timestamp(),
            "description": GATEWAY_DESCRIPTION,
            "routes": routes,
        })
    }

    /// `GET /health`: probes every service; the gateway itself is healthy if it
    /// can answer at all.
    pub async fn health(&self) -> Value {
        let services: Map<String, Value> = self
            .health_checker
            .check_all()
            .await
            .into_iter()
            .map(|(name, status)| (name, json!(status)))
            .collect();

        json!({
            "gateway": "healthy",
            "timestamp": timestamp(),
            "services": services,
        })
    }

    /// `GET /services`: configured services, no probing.
    pub fn services(&self) -> Value {
        let services: Vec<Value> = self
            .registry
            .entries()
            .iter()
            .map(|entry| {
                json!({
                    "name": entry.name,
                    "prefix": entry.path_prefix,
                    "description": entry.description,
                    "status": "configured",
                })
            })
            .collect();

        json!({
            "timestamp": timestamp(),
            "services": services,
        })
    }

    /// Forward `req` to the service owning its path and relay the answer.
    ///
    /// Always produces a response: failures become the structured JSON error with
    /// the status given by [`ProxyOutcome::status`].
    pub async fn dispatch(&self, req: Request<AxumBody>, peer: Option<SocketAddr>) -> Response {
        let path = req.uri().path().to_string();

        let Some(entry) = self.registry.resolve(&path) else {
            tracing::warn!(
                %path,
                outcome = ProxyOutcome::NoMatchingService.label(),
                "No service found for path"
            );
            return GatewayError::from(RoutingError::NoMatchingService { path }).into_response();
        };

        let remainder = ServiceRegistry::strip_prefix(&path, entry);
        let target = match proxy::build_target_uri(&entry.base_url, remainder, req.uri().query()) {
            Ok(target) => target,
            Err(e) => {
                tracing::warn!(service = %entry.name, "{}", e);
                return GatewayError::BadRequest("Invalid request path".to_string())
                    .into_response();
            }
        };

        let span = tracing_setup::create_upstream_span(
            &entry.name,
            req.method().as_str(),
            &target.to_string(),
        );

        let forwarded =
            ForwardedInfo::from_request(req.headers(), req.uri(), peer.map(|p| p.ip()));
        let (mut parts, body) = req.into_parts();
        parts.headers = proxy::rewrite_request_headers(&parts.headers, &target, &forwarded);
        parts.uri = target;
        let outgoing = Request::from_parts(parts, body);

        let service = entry.name.clone();
        async move {
            let timer = metrics::UpstreamRequestTimer::new(&service);
            let result = self.http_client.send_request(outgoing).await;

            let (outcome, response) = match result {
                Ok(upstream) => {
                    let (mut parts, body) = upstream.into_parts();
                    parts.headers = proxy::rewrite_response_headers(&parts.headers);
                    (
                        ProxyOutcome::Forwarded(parts.status),
                        Response::from_parts(parts, body),
                    )
                }
                Err(err) => {
                    let (outcome, error) = self.classify_failure(&service, err);
                    (outcome, GatewayError::from(error).into_response())
                }
            };

            let span = tracing::Span::current();
            span.record("http.status_code", outcome.status().as_u16());
            span.record("outcome", outcome.label());
            metrics::increment_upstream_request_total(&service, outcome.label());
            tracing::debug!(
                outcome = outcome.label(),
                elapsed_ms = timer.elapsed().as_millis() as u64,
                "Upstream request finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    fn classify_failure(
        &self,
        service: &str,
        err: HttpClientError,
    ) -> (ProxyOutcome, UpstreamError) {
        let service = service.to_string();
        match err {
            HttpClientError::ConnectionRefused(detail) => (
                ProxyOutcome::UpstreamUnreachable { refused: true },
                UpstreamError::ConnectionRefused { service, detail },
            ),
            HttpClientError::Unreachable(detail) => (
                ProxyOutcome::UpstreamUnreachable { refused: false },
                UpstreamError::Unreachable { service, detail },
            ),
            HttpClientError::Timeout(_) => (
                ProxyOutcome::UpstreamTimeout,
                UpstreamError::Timeout {
                    service,
                    secs: self.request_timeout.as_secs(),
                },
            ),
            other => (
                ProxyOutcome::UpstreamError,
                UpstreamError::Other {
                    service,
                    detail: other.to_string(),
                },
            ),
        }
    }
}
