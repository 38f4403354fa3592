pub mod auth_routes;
pub mod health_checker;
pub mod http_client;
pub mod http_handler;
pub mod identity_provider;
pub mod middleware;
pub mod router;

/// Re-export commonly used types from adapters
pub use health_checker::HealthChecker;
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use identity_provider::SupabaseIdentityProvider;
pub use middleware::CorsSettings;
pub use router::{AppState, build_router};
