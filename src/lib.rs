//! TutorMatch Gateway - the single HTTP entry point in front of the TutorMatch
//! services.
//!
//! The gateway routes requests by path prefix to the user, classroom and chat
//! services, authenticates callers against a hosted identity provider (a
//! GoTrue compatible auth API plus a PostgREST data API) and exposes a small set
//! of local endpoints for discovery and health.
//!
//! # Features
//! - Prefix routing with prefix stripping (`/api/users/42` → `user-service` `/42`)
//! - Bearer-token auth gate with an explicit public / protected / role-gated
//!   route table
//! - Streaming reverse proxy with forwarded headers and a bounded upstream timeout
//! - Structured JSON errors: `{ "error", "message", "statusCode" }`
//! - Concurrent on-demand health checks of every registered service
//! - `/auth/*` account endpoints delegated to the identity provider
//! - Structured logging via `tracing` and a `metrics` facade
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use tutormatch_gateway::{
//!     AppState, SupabaseIdentityProvider, build_router, config::load_config,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config(Some("gateway.toml")).await?;
//! let identity = Arc::new(SupabaseIdentityProvider::new(&config.identity)?);
//! let app = build_router(AppState::from_config(&config, identity)?);
//! let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! Business rules live in `core` (registry, route table, auth gate, proxy
//! transforms, error taxonomy). `ports` defines the traits the core depends on
//! (upstream HTTP client, identity provider) and `adapters` implements them and
//! assembles the axum router.
//!
//! # Error Handling
//! Request-path errors are typed (`core::error`) and rendered as JSON at the
//! boundary where they occur. Startup code returns `eyre::Result<T>` with
//! `WrapErr` context.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{
        AppState, HealthChecker, HttpClientAdapter, HttpHandler, SupabaseIdentityProvider,
        build_router,
    },
    config::GatewayConfig,
    core::{AuthGate, GatewayError, RouteTable, ServiceRegistry},
    ports::{http_client::HttpClient, identity_provider::IdentityProvider},
    utils::GracefulShutdown,
};
