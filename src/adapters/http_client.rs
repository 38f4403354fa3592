use std::{error::Error as StdError, io, time::Duration};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::Result;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::{Instant, timeout, timeout_at};
use tower_http::timeout::TimeoutBody;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// HTTP client adapter using Hyper with Rustls.
///
/// * One attempt per request. `request_timeout` bounds the wait for the response
///   head and then every wait for the next body frame; a stalled body errors the
///   stream instead of holding the connection open
/// * Connect failures are classified so the dispatcher can tell a refused
///   connection (503) from everything else (502)
/// * GET based health checks with their own timeout
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs
        http_connector.set_connect_timeout(Some(connect_timeout));

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        tracing::debug!(
            request_timeout_ms = request_timeout.as_millis() as u64,
            connect_timeout_ms = connect_timeout.as_millis() as u64,
            "Created upstream HTTP client"
        );
        Ok(Self {
            client,
            request_timeout,
        })
    }

    /// Map a hyper-util client error onto the port's error kinds.
    ///
    /// A refusal shows up as an `io::Error` somewhere down the source chain.
    fn classify(err: &hyper_util::client::legacy::Error) -> HttpClientError {
        let mut source: Option<&(dyn StdError + 'static)> = err.source();
        while let Some(cause) = source {
            let refused = cause
                .downcast_ref::<io::Error>()
                .is_some_and(|io_err| io_err.kind() == io::ErrorKind::ConnectionRefused);
            if refused {
                return HttpClientError::ConnectionRefused(err.to_string());
            }
            source = cause.source();
        }

        if err.is_connect() {
            HttpClientError::Unreachable(format!("{err}: {}", Self::root_cause(err)))
        } else {
            HttpClientError::Transport(format!("{err}: {}", Self::root_cause(err)))
        }
    }

    fn root_cause(err: &(dyn StdError + 'static)) -> String {
        let mut current = err;
        while let Some(next) = current.source() {
            current = next;
        }
        current.to_string()
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        tracing::debug!("Outgoing request headers: {:?}", parts.headers);

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let outgoing = Request::from_parts(parts, body);

        match timeout(self.request_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                let (mut parts, hyper_body) = response.into_parts();
                // Axum re-frames the streamed body
                parts.headers.remove(header::TRANSFER_ENCODING);
                let body = TimeoutBody::new(self.request_timeout, hyper_body);
                Ok(Response::from_parts(parts, AxumBody::new(body)))
            }
            Ok(Err(e)) => {
                let error = Self::classify(&e);
                tracing::debug!("Request {} {} failed: {}", method, uri, error);
                Err(error)
            }
            Err(_) => Err(HttpClientError::Timeout(self.request_timeout)),
        }
    }

    async fn health_check(&self, url: &str, timeout_duration: Duration) -> HttpClientResult<bool> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(url)
            .version(Version::HTTP_11)
            .body(AxumBody::empty())
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;

        tracing::debug!("Health checking URL: {}", url);

        let deadline = Instant::now() + timeout_duration;
        match timeout_at(deadline, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let is_healthy = response.status().is_success();
                // Drain so the connection can go back to the pool; the verdict is
                // already made, so a stalled body only costs the rest of the budget
                if timeout_at(deadline, response.into_body().collect())
                    .await
                    .is_err()
                {
                    tracing::debug!("Health check body for {} did not finish in time", url);
                }
                tracing::debug!("Health check for {} result: {}", url, is_healthy);
                Ok(is_healthy)
            }
            Ok(Err(err)) => {
                tracing::debug!("Health check error for {}: {}", url, err);
                Ok(false)
            }
            Err(_) => {
                tracing::debug!("Health check timeout for {}", url);
                Err(HttpClientError::Timeout(timeout_duration))
            }
        }
    }
}
