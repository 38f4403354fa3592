pub mod auth_gate;
pub mod error;
pub mod principal;
pub mod proxy;
pub mod registry;
pub mod route_policy;

pub use auth_gate::AuthGate;
pub use error::{AuthError, GatewayError, RoutingError, UpstreamError};
pub use principal::{AccessToken, Principal, Role};
pub use registry::ServiceRegistry;
pub use route_policy::RouteTable;
