//! Router assembly: local endpoints, `/auth/*`, the proxy fallback and the
//! middleware stack.
use std::{any::Any, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{ConnectInfo, Request, State},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use eyre::WrapErr;
use serde_json::Value;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

use crate::{
    adapters::{
        auth_routes,
        health_checker::HealthChecker,
        http_client::HttpClientAdapter,
        http_handler::HttpHandler,
        middleware::{
            CorsSettings, auth_gate_layer, cors_middleware, request_context_middleware,
        },
    },
    config::models::GatewayConfig,
    core::{
        auth_gate::AuthGate, error::GatewayError, registry::ServiceRegistry,
        route_policy::RouteTable,
    },
    ports::{http_client::HttpClient, identity_provider::IdentityProvider},
};

/// Everything the handlers share. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub handler: HttpHandler,
    pub identity: Arc<dyn IdentityProvider>,
    pub gate: AuthGate,
    pub cors: CorsSettings,
}

impl AppState {
    /// Wire the production adapters for `config`. The identity provider is injected
    /// so callers decide which implementation (or stub) to use.
    pub fn from_config(
        config: &GatewayConfig,
        identity: Arc<dyn IdentityProvider>,
    ) -> eyre::Result<Self> {
        let registry = Arc::new(ServiceRegistry::new(config.services.clone()));
        let request_timeout = Duration::from_secs(config.proxy.request_timeout_secs);
        let http_client: Arc<dyn HttpClient> = Arc::new(HttpClientAdapter::new(
            request_timeout,
            Duration::from_secs(config.proxy.connect_timeout_secs),
        )?);
        let health_checker = Arc::new(HealthChecker::new(
            registry.clone(),
            http_client.clone(),
            Duration::from_secs(config.health_check.timeout_secs),
        ));
        let routes = RouteTable::with_defaults(&config.route_policies)
            .wrap_err("Invalid route policy table")?;

        Ok(Self {
            handler: HttpHandler::new(registry, http_client, health_checker, request_timeout),
            gate: AuthGate::new(identity.clone(), Arc::new(routes)),
            identity,
            cors: CorsSettings::new(&config.cors_origin),
        })
    }
}

/// Build the gateway router.
///
/// Layers, outermost first: CORS, request context, HTTP trace, panic guard,
/// auth gate. The auth gate therefore sees every routed request, including the
/// proxy fallback.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/status", get(status))
        .route("/health", get(health))
        .route("/services", get(services))
        .merge(auth_routes::routes())
        .fallback(dispatch)
        .method_not_allowed_fallback(method_not_allowed)
        .layer(middleware::from_fn_with_state(
            state.gate.clone(),
            auth_gate_layer,
        ))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn_with_state(
            state.cors.clone(),
            cors_middleware,
        ))
        .with_state(state)
}

async fn welcome(State(state): State<AppState>) -> Json<Value> {
    Json(state.handler.welcome())
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(state.handler.status())
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(state.handler.health().await)
}

async fn services(State(state): State<AppState>) -> Json<Value> {
    Json(state.handler.services())
}

/// Anything not served locally goes to the dispatcher. The peer address is absent
/// when the router is driven without connect info (tests, embedding).
async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    state.handler.dispatch(req, peer).await
}

async fn method_not_allowed() -> GatewayError {
    GatewayError::MethodNotAllowed
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    GatewayError::Internal(format!("handler panicked: {detail}")).into_response()
}
