//! Configuration data structures for the gateway.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and to the
//! `GATEWAY__*` environment variables. Every field has a default so an empty file (or no
//! file at all) yields the stock three-service deployment on port 3000.
use serde::{Deserialize, Serialize};

use crate::core::{principal::Role, route_policy::RouteVisibility};

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cors_origin() -> String {
    "*".to_string()
}

fn default_health_path() -> String {
    "/health".to_string()
}

/// A backend service reachable behind a path prefix.
///
/// The registry matches `path_prefix` against the inbound path and forwards the
/// remainder to `base_url`. Entries are immutable once the process has started.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub name: String,
    /// Absolute `http://` or `https://` URL including the host
    pub base_url: String,
    /// Must start with `/`
    pub path_prefix: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub description: String,
}

impl ServiceEntry {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            path_prefix: path_prefix.into(),
            health_path: default_health_path(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_health_path(mut self, health_path: impl Into<String>) -> Self {
        self.health_path = health_path.into();
        self
    }
}

/// The stock service table: user, classroom and chat services on ports 3001-3003.
pub fn default_services() -> Vec<ServiceEntry> {
    vec![
        ServiceEntry::new("user-service", "http://localhost:3001", "/api/users")
            .with_description("User accounts and profiles"),
        ServiceEntry::new("classroom-service", "http://localhost:3002", "/api/classroom")
            .with_description("Virtual classrooms, materials and video calls"),
        ServiceEntry::new("chat-service", "http://localhost:3003", "/api/chat")
            .with_description("Real-time chat"),
    ]
}

/// Upstream forwarding limits.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Time allowed for the upstream to produce a response head, and then for
    /// each following body frame; a relayed body that stalls longer is aborted
    pub request_timeout_secs: u64,
    /// Time allowed for the TCP (and TLS) connect
    pub connect_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 10,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

/// Connection details for the hosted identity / data provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IdentityProviderConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Public (anon) API key, used for user-scoped calls
    pub anon_key: String,
    /// Service-role key, used for token validation and admin calls
    pub service_role_key: String,
    pub timeout_secs: u64,
    /// Frontend base URL; password reset mails redirect to `<url>/reset-password`
    pub frontend_url: Option<String>,
}

impl Default for IdentityProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            service_role_key: String::new(),
            timeout_secs: 5,
            frontend_url: None,
        }
    }
}

/// Extra route policy registered on top of the built-in table.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoutePolicyConfig {
    /// `matchit` pattern, e.g. `/api/users/admin/{*rest}`
    pub path: String,
    /// Upper-case HTTP methods; empty means any method
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub visibility: RouteVisibility,
    /// Roles allowed through; empty means any authenticated principal
    #[serde(default)]
    pub allowed_roles: Vec<Role>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    /// Value of `Access-Control-Allow-Origin` for gateway-generated responses
    pub cors_origin: String,
    pub proxy: ProxyConfig,
    pub health_check: HealthCheckConfig,
    /// Ordered; on overlapping prefixes the first entry wins
    pub services: Vec<ServiceEntry>,
    pub identity: IdentityProviderConfig,
    pub route_policies: Vec<RoutePolicyConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_origin: default_cors_origin(),
            proxy: ProxyConfig::default(),
            health_check: HealthCheckConfig::default(),
            services: default_services(),
            identity: IdentityProviderConfig::default(),
            route_policies: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    pub fn service(&self, name: &str) -> Option<&ServiceEntry> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_mut(&mut self, name: &str) -> Option<&mut ServiceEntry> {
        self.services.iter_mut().find(|s| s.name == name)
    }
}

/// Builder for GatewayConfig, mostly used by tests and embedders
#[derive(Default)]
pub struct GatewayConfigBuilder {
    listen_addr: Option<String>,
    cors_origin: Option<String>,
    proxy: Option<ProxyConfig>,
    health_check: Option<HealthCheckConfig>,
    services: Option<Vec<ServiceEntry>>,
    identity: Option<IdentityProviderConfig>,
    route_policies: Vec<RoutePolicyConfig>,
}

impl GatewayConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = Some(origin.into());
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn health_check(mut self, health_check: HealthCheckConfig) -> Self {
        self.health_check = Some(health_check);
        self
    }

    /// Append a service; the first call replaces the default service table.
    pub fn service(mut self, entry: ServiceEntry) -> Self {
        self.services.get_or_insert_with(Vec::new).push(entry);
        self
    }

    pub fn identity(mut self, identity: IdentityProviderConfig) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn route_policy(mut self, policy: RoutePolicyConfig) -> Self {
        self.route_policies.push(policy);
        self
    }

    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            cors_origin: self.cors_origin.unwrap_or_else(default_cors_origin),
            proxy: self.proxy.unwrap_or_default(),
            health_check: self.health_check.unwrap_or_default(),
            services: self.services.unwrap_or_else(default_services),
            identity: self.identity.unwrap_or_default(),
            route_policies: self.route_policies,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "unhealthy")]
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_three_services_in_order() {
        let config = GatewayConfig::default();
        let names: Vec<_> = config.services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["user-service", "classroom-service", "chat-service"]);
        assert_eq!(config.proxy.request_timeout_secs, 10);
        assert_eq!(config.health_check.timeout_secs, 5);
    }

    #[test]
    fn builder_replaces_default_services() {
        let config = GatewayConfig::builder()
            .listen_addr("127.0.0.1:0")
            .service(ServiceEntry::new("only", "http://127.0.0.1:9000", "/api/only"))
            .build();

        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].health_path, "/health");
        assert_eq!(config.listen_addr, "127.0.0.1:0");
    }

    #[test]
    fn route_policy_defaults_to_protected() {
        let policy: RoutePolicyConfig =
            serde_json::from_str(r#"{"path": "/api/users/admin/{*rest}"}"#).unwrap();
        assert_eq!(policy.visibility, RouteVisibility::Protected);
        assert!(policy.methods.is_empty());
        assert!(policy.allowed_roles.is_empty());
    }
}
