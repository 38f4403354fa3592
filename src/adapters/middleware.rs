//! Axum middleware attached to the gateway router.
//!
//! Outermost first: CORS, request context (id, span, timing), auth gate. All of
//! them are plain `async fn(Request, Next) -> Response` functions wired with
//! `axum::middleware::from_fn[_with_state]`.
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::{
        HeaderName, HeaderValue, Method, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
            ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
        },
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::Instrument;

use crate::{
    core::{
        auth_gate::{AuthGate, extract_bearer_token},
        error::GatewayError,
        principal::AccessToken,
        proxy::{CORS_ALLOW_HEADERS, CORS_ALLOW_METHODS},
    },
    metrics, tracing_setup,
};

pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Allowed origin for gateway-generated responses.
#[derive(Clone, Debug)]
pub struct CorsSettings {
    allow_origin: HeaderValue,
}

impl CorsSettings {
    /// Falls back to `*` when `origin` is not a valid header value.
    pub fn new(origin: &str) -> Self {
        let allow_origin = HeaderValue::from_str(origin).unwrap_or_else(|_| {
            tracing::warn!("Invalid CORS origin '{}', using '*'", origin);
            HeaderValue::from_static("*")
        });
        Self { allow_origin }
    }

    pub fn allow_origin(&self) -> &HeaderValue {
        &self.allow_origin
    }
}

/// Answer preflight requests directly and add CORS headers to everything else.
///
/// Headers already set further in (the dispatcher injects its own for proxied
/// responses) are left alone.
pub async fn cors_middleware(
    State(cors): State<CorsSettings>,
    req: Request,
    next: Next,
) -> Response {
    let preflight = req.method() == Method::OPTIONS;
    let mut response = if preflight {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if !headers.contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, cors.allow_origin.clone());
    }
    if preflight {
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    }

    response
}

/// Per-request id, `request` span, completion log and request metrics.
///
/// An incoming `X-Request-ID` is reused, otherwise a UUID v4 is generated. The id
/// is echoed on the response.
pub async fn request_context_middleware(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let span = tracing_setup::create_request_span(method.as_str(), &path, &request_id);

    let start = Instant::now();
    let mut response = next.run(req).instrument(span.clone()).await;
    let duration = start.elapsed();

    let status = response.status();
    span.record("http.status_code", status.as_u16());
    span.record("duration_ms", duration.as_millis() as u64);
    span.in_scope(|| {
        tracing::info!("Completed {} {} - {}", method, path, status);
    });
    metrics::increment_request_total(method.as_str(), status.as_u16());
    metrics::record_request_duration(method.as_str(), duration);

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID.clone(), header_value);
    }

    response
}

/// Run the auth gate for every request, local endpoints and proxy alike.
///
/// Admitted requests carry the [`Principal`](crate::core::principal::Principal)
/// and the raw [`AccessToken`] as extensions. Preflight requests are never gated.
pub async fn auth_gate_layer(
    State(gate): State<AuthGate>,
    mut req: Request,
    next: Next,
) -> Response {
    if req.method() == Method::OPTIONS {
        return next.run(req).await;
    }

    let path = req.uri().path().to_string();
    match gate.authorize(req.method(), &path, req.headers()).await {
        Ok(Some(principal)) => {
            let token = extract_bearer_token(req.headers()).map(str::to_string);
            tracing::debug!(
                subject = %principal.subject_id,
                role = %principal.role,
                "Request authenticated"
            );
            if let Some(token) = token {
                req.extensions_mut().insert(AccessToken(token));
            }
            req.extensions_mut().insert(principal);
            next.run(req).await
        }
        Ok(None) => next.run(req).await,
        Err(err) => {
            tracing::info!(%path, reason = err.reason(), "Request rejected by auth gate");
            metrics::increment_auth_rejection(err.reason());
            GatewayError::from(err).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, header},
        middleware,
        routing::get,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt; // for oneshot

    use super::*;
    use crate::core::{
        auth_gate::tests::StubIdentity,
        error::ErrorBody,
        principal::{Principal, Role},
        route_policy::RouteTable,
    };

    fn gated_app(identity: Arc<StubIdentity>) -> Router {
        let gate = AuthGate::new(identity, Arc::new(RouteTable::with_defaults(&[]).unwrap()));
        Router::new()
            .route("/status", get(|| async { "public" }))
            .route(
                "/auth/me",
                get(
                    |Extension(principal): Extension<Principal>,
                     Extension(token): Extension<AccessToken>| async move {
                        format!("{}:{}", principal.email, token.0)
                    },
                ),
            )
            .layer(middleware::from_fn_with_state(gate, auth_gate_layer))
    }

    #[tokio::test]
    async fn public_route_passes_without_token() {
        let identity = Arc::new(StubIdentity::default());
        let response = gated_app(identity.clone())
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn protected_route_without_token_is_json_401() {
        let response = gated_app(Arc::new(StubIdentity::default()))
            .oneshot(Request::builder().uri("/auth/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Unauthorized");
        assert_eq!(body.message, "Access token required");
        assert_eq!(body.status_code, 401);
    }

    #[tokio::test]
    async fn admitted_request_carries_principal_and_token() {
        let identity = Arc::new(StubIdentity::default().with_user("tok", Role::Tutor));
        let response = gated_app(identity)
            .oneshot(
                Request::builder()
                    .uri("/auth/me")
                    .header(header::AUTHORIZATION, "Bearer tok")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"tok@uni.edu:tok");
    }

    #[tokio::test]
    async fn preflight_is_answered_without_auth() {
        let identity = Arc::new(StubIdentity::default());
        let app = gated_app(identity.clone()).layer(middleware::from_fn_with_state(
            CorsSettings::new("http://localhost:5173"),
            cors_middleware,
        ));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/users/1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );
        assert_eq!(
            headers.get(ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            CORS_ALLOW_METHODS
        );
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn cors_keeps_origin_set_by_inner_handler() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { ([(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], "proxied") }),
            )
            .layer(middleware::from_fn_with_state(
                CorsSettings::new("https://app.example"),
                cors_middleware,
            ));

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "*");
    }

    #[test]
    fn invalid_origin_falls_back_to_wildcard() {
        assert_eq!(CorsSettings::new("bad\norigin").allow_origin(), "*");
    }

    #[tokio::test]
    async fn request_id_is_generated_or_propagated() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_context_middleware));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let request_id = response.headers().get(&X_REQUEST_ID).unwrap().to_str().unwrap();
        assert!(uuid::Uuid::parse_str(request_id).is_ok());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header("x-request-id", "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.headers().get(&X_REQUEST_ID).unwrap(), "abc-123");
    }
}
