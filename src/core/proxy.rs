//! Pure request / response transforms used by the dispatcher.
//!
//! Nothing in here performs I/O; the dispatcher composes these functions around a
//! single call to the HTTP client port.
use std::{borrow::Cow, net::IpAddr};

use axum::http::{
    HeaderMap, HeaderName, HeaderValue, StatusCode, Uri,
    header::{self, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS},
};
use thiserror::Error;

pub const CORS_ALLOW_METHODS: &str = "GET, POST, PUT, DELETE, PATCH, OPTIONS";
pub const CORS_ALLOW_HEADERS: &str =
    "Origin, X-Requested-With, Content-Type, Accept, Authorization";

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
static X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Connection-scoped headers (RFC 9110 §7.6.1) never forwarded in either direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// What happened to one dispatched request. Drives logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The backend answered; its status is relayed unchanged
    Forwarded(StatusCode),
    NoMatchingService,
    UpstreamUnreachable { refused: bool },
    UpstreamTimeout,
    UpstreamError,
}

impl ProxyOutcome {
    /// Status the caller sees.
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyOutcome::Forwarded(status) => *status,
            ProxyOutcome::NoMatchingService => StatusCode::NOT_FOUND,
            ProxyOutcome::UpstreamUnreachable { refused: true } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyOutcome::UpstreamUnreachable { refused: false }
            | ProxyOutcome::UpstreamTimeout
            | ProxyOutcome::UpstreamError => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProxyOutcome::Forwarded(_) => "forwarded",
            ProxyOutcome::NoMatchingService => "no_matching_service",
            ProxyOutcome::UpstreamUnreachable { refused: true } => "refused",
            ProxyOutcome::UpstreamUnreachable { refused: false } => "unreachable",
            ProxyOutcome::UpstreamTimeout => "timeout",
            ProxyOutcome::UpstreamError => "error",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid target URI '{target}': {reason}")]
pub struct InvalidTarget {
    pub target: String,
    pub reason: String,
}

/// The stripped remainder as it goes on the wire: empty becomes `/`, and a
/// remainder like `abc` (prefix `/api/users` matched `/api/usersabc`) gets a
/// leading slash.
pub fn forward_path(remainder: &str) -> Cow<'_, str> {
    if remainder.is_empty() {
        Cow::Borrowed("/")
    } else if remainder.starts_with('/') {
        Cow::Borrowed(remainder)
    } else {
        Cow::Owned(format!("/{remainder}"))
    }
}

/// `base_url` (trailing `/` trimmed) + forwarded remainder + original query.
pub fn build_target_uri(
    base_url: &str,
    remainder: &str,
    query: Option<&str>,
) -> Result<Uri, InvalidTarget> {
    let mut target = format!(
        "{}{}",
        base_url.trim_end_matches('/'),
        forward_path(remainder)
    );
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push('?');
        target.push_str(query);
    }

    let uri = target.parse::<Uri>().map_err(|e| InvalidTarget {
        target: target.clone(),
        reason: e.to_string(),
    })?;

    if uri.scheme().is_none() || uri.authority().is_none() {
        return Err(InvalidTarget {
            target,
            reason: "target must be absolute".to_string(),
        });
    }
    Ok(uri)
}

/// Where an inbound request came from, for the `X-Forwarded-*` headers.
#[derive(Debug, Clone, Default)]
pub struct ForwardedInfo {
    pub client_ip: Option<IpAddr>,
    /// Host the caller addressed
    pub host: Option<String>,
    pub proto: &'static str,
}

impl ForwardedInfo {
    pub fn from_request(headers: &HeaderMap, uri: &Uri, peer: Option<IpAddr>) -> Self {
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| uri.authority().map(|a| a.to_string()));

        Self {
            client_ip: peer.or_else(|| client_ip_from_headers(headers)),
            host,
            proto: if uri.scheme_str() == Some("https") {
                "https"
            } else {
                "http"
            },
        }
    }
}

/// First address from `X-Forwarded-For`, else `X-Real-IP`.
pub fn client_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(ip) = headers
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
    {
        return Some(ip);
    }

    headers
        .get(&X_REAL_IP)
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok())
}

fn is_hop_by_hop(name: &HeaderName, connection_tokens: &[String]) -> bool {
    HOP_BY_HOP.contains(&name.as_str()) || connection_tokens.iter().any(|t| t == name.as_str())
}

/// Extra hop-by-hop names listed in the `Connection` header.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Headers for the upstream request.
///
/// Drops hop-by-hop headers and the caller's `Host`, points `Host` at the target
/// authority, carries `Authorization` and `Content-Type` over explicitly and
/// appends to the `X-Forwarded-*` chain.
pub fn rewrite_request_headers(
    original: &HeaderMap,
    target: &Uri,
    forwarded: &ForwardedInfo,
) -> HeaderMap {
    let tokens = connection_tokens(original);
    let mut headers = HeaderMap::with_capacity(original.len() + 4);

    for (name, value) in original {
        if *name == header::HOST || is_hop_by_hop(name, &tokens) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(host) = target
        .authority()
        .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    {
        headers.insert(header::HOST, host);
    }

    for name in [header::AUTHORIZATION, header::CONTENT_TYPE] {
        if let Some(value) = original.get(&name) {
            headers.insert(name, value.clone());
        }
    }

    if let Some(ip) = forwarded.client_ip {
        let chain = match original.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
            _ => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR.clone(), value);
        }
    }

    headers.insert(
        X_FORWARDED_PROTO.clone(),
        HeaderValue::from_static(forwarded.proto),
    );

    if let Some(host) = forwarded
        .host
        .as_deref()
        .and_then(|h| HeaderValue::from_str(h).ok())
    {
        headers.insert(X_FORWARDED_HOST.clone(), host);
    }

    headers
}

/// Headers relayed back to the caller: upstream headers minus hop-by-hop ones, plus
/// the permissive CORS set.
pub fn rewrite_response_headers(upstream: &HeaderMap) -> HeaderMap {
    let tokens = connection_tokens(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len() + 3);

    for (name, value) in upstream {
        if is_hop_by_hop(name, &tokens) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(CORS_ALLOW_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(CORS_ALLOW_HEADERS),
    );
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_normalises_remainder() {
        assert_eq!(forward_path(""), "/");
        assert_eq!(forward_path("/42"), "/42");
        assert_eq!(forward_path("abc"), "/abc");
    }

    #[test]
    fn target_uri_joins_base_remainder_and_query() {
        let uri = build_target_uri("http://localhost:3001/", "/42", Some("x=1&y=2")).unwrap();
        assert_eq!(uri.to_string(), "http://localhost:3001/42?x=1&y=2");

        let uri = build_target_uri("http://localhost:3001", "", None).unwrap();
        assert_eq!(uri.to_string(), "http://localhost:3001/");

        let uri = build_target_uri("http://localhost:3001", "/42", Some("")).unwrap();
        assert_eq!(uri.to_string(), "http://localhost:3001/42");
    }

    #[test]
    fn target_uri_must_be_absolute() {
        assert!(build_target_uri("localhost:3001", "/x", None).is_err());
        assert!(build_target_uri("http://exa mple.com", "/x", None).is_err());
    }

    fn inbound() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local:3000"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=x"),
        );
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-trace"));
        headers.insert("x-trace", HeaderValue::from_static("1"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        headers
    }

    #[test]
    fn request_headers_change_origin_and_keep_credentials() {
        let target: Uri = "http://localhost:3002/materials".parse().unwrap();
        let forwarded = ForwardedInfo {
            client_ip: Some("10.0.0.7".parse().unwrap()),
            host: Some("gateway.local:3000".to_string()),
            proto: "http",
        };

        let headers = rewrite_request_headers(&inbound(), &target, &forwarded);

        assert_eq!(headers[header::HOST], "localhost:3002");
        assert_eq!(headers[header::AUTHORIZATION], "Bearer tok");
        assert_eq!(
            headers[header::CONTENT_TYPE],
            "multipart/form-data; boundary=x"
        );
        assert_eq!(headers["x-custom"], "kept");
        assert_eq!(headers["x-forwarded-for"], "10.0.0.7");
        assert_eq!(headers["x-forwarded-proto"], "http");
        assert_eq!(headers["x-forwarded-host"], "gateway.local:3000");
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key("x-trace"));
    }

    #[test]
    fn forwarded_for_chain_is_extended() {
        let mut original = HeaderMap::new();
        original.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.9"));
        let target: Uri = "http://localhost:3003/".parse().unwrap();
        let forwarded = ForwardedInfo {
            client_ip: Some("10.0.0.1".parse().unwrap()),
            host: None,
            proto: "http",
        };

        let headers = rewrite_request_headers(&original, &target, &forwarded);
        assert_eq!(headers["x-forwarded-for"], "203.0.113.9, 10.0.0.1");
        assert!(!headers.contains_key("x-forwarded-host"));
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.0.2.2"));
        assert_eq!(
            client_ip_from_headers(&headers),
            Some("192.0.2.2".parse().unwrap())
        );
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.0.2.1, 10.0.0.1"),
        );
        assert_eq!(
            client_ip_from_headers(&headers),
            Some("192.0.2.1".parse().unwrap())
        );
    }

    #[test]
    fn response_headers_gain_cors_and_lose_hop_by_hop() {
        let mut upstream = HeaderMap::new();
        upstream.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        upstream.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        upstream.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("https://app.example"),
        );
        upstream.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        upstream.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let headers = rewrite_response_headers(&upstream);

        assert!(!headers.contains_key(header::TRANSFER_ENCODING));
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], CORS_ALLOW_METHODS);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], CORS_ALLOW_HEADERS);
        assert_eq!(headers.get_all(header::SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn outcome_status_mapping() {
        assert_eq!(
            ProxyOutcome::Forwarded(StatusCode::IM_A_TEAPOT).status(),
            StatusCode::IM_A_TEAPOT
        );
        assert_eq!(
            ProxyOutcome::UpstreamUnreachable { refused: true }.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyOutcome::UpstreamTimeout.status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyOutcome::NoMatchingService.status(),
            StatusCode::NOT_FOUND
        );
    }
}
