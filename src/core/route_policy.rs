//! Route visibility table consulted by the auth gate.
//!
//! Every endpoint the gateway knows about is registered here with its visibility and
//! optional role allow-list. Lookups use `matchit` patterns; anything that matches no
//! pattern, or matches a pattern but not its methods, gets the fallback policy
//! (protected, no role restriction).
use http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{config::models::RoutePolicyConfig, core::principal::Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteVisibility {
    Public,
    #[default]
    Protected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    /// Empty matches every method
    pub methods: Vec<Method>,
    pub visibility: RouteVisibility,
    /// Empty admits any authenticated principal
    pub allowed_roles: Vec<Role>,
}

impl RoutePolicy {
    pub fn public(methods: &[Method]) -> Self {
        Self {
            methods: methods.to_vec(),
            visibility: RouteVisibility::Public,
            allowed_roles: Vec::new(),
        }
    }

    pub fn protected(methods: &[Method]) -> Self {
        Self {
            methods: methods.to_vec(),
            visibility: RouteVisibility::Protected,
            allowed_roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.allowed_roles = roles.to_vec();
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == RouteVisibility::Public
    }

    pub fn admits(&self, role: Role) -> bool {
        self.allowed_roles.is_empty() || self.allowed_roles.contains(&role)
    }

    fn matches_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    fn overlaps(&self, other: &RoutePolicy) -> bool {
        self.methods.is_empty()
            || other.methods.is_empty()
            || self.methods.iter().any(|m| other.methods.contains(m))
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouteTableError {
    #[error("Route '{path}' is registered twice for overlapping methods")]
    Duplicate { path: String },

    #[error("Route '{path}' conflicts with an existing pattern: {source}")]
    Conflict {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("Route '{path}' must start with '/'")]
    InvalidPath { path: String },

    #[error("Invalid HTTP method '{0}'")]
    InvalidMethod(String),
}

/// Builder collecting policies before they are frozen into a [`RouteTable`].
#[derive(Default)]
pub struct RouteTableBuilder {
    buckets: Vec<(String, Vec<RoutePolicy>)>,
}

impl RouteTableBuilder {
    pub fn register(
        mut self,
        path: impl Into<String>,
        policy: RoutePolicy,
    ) -> Result<Self, RouteTableError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(RouteTableError::InvalidPath { path });
        }

        match self.buckets.iter_mut().find(|(p, _)| *p == path) {
            Some((_, policies)) => {
                if policies.iter().any(|p| p.overlaps(&policy)) {
                    return Err(RouteTableError::Duplicate { path });
                }
                policies.push(policy);
            }
            None => self.buckets.push((path, vec![policy])),
        }
        Ok(self)
    }

    pub fn register_config(self, config: &RoutePolicyConfig) -> Result<Self, RouteTableError> {
        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| RouteTableError::InvalidMethod(m.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.register(
            config.path.clone(),
            RoutePolicy {
                methods,
                visibility: config.visibility,
                allowed_roles: config.allowed_roles.clone(),
            },
        )
    }

    pub fn build(self) -> Result<RouteTable, RouteTableError> {
        let mut router = matchit::Router::new();
        let mut buckets = Vec::with_capacity(self.buckets.len());

        for (index, (path, policies)) in self.buckets.into_iter().enumerate() {
            router
                .insert(path.clone(), index)
                .map_err(|source| RouteTableError::Conflict { path, source })?;
            buckets.push(policies);
        }

        Ok(RouteTable {
            router,
            buckets,
            fallback: RoutePolicy::protected(&[]),
        })
    }
}

pub struct RouteTable {
    router: matchit::Router<usize>,
    buckets: Vec<Vec<RoutePolicy>>,
    fallback: RoutePolicy,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// The gateway's own endpoints plus any configured extras.
    pub fn with_defaults(extra: &[RoutePolicyConfig]) -> Result<Self, RouteTableError> {
        let mut builder = Self::builder()
            .register("/", RoutePolicy::public(&[Method::GET]))?
            .register("/status", RoutePolicy::public(&[Method::GET]))?
            .register("/health", RoutePolicy::public(&[Method::GET]))?
            .register("/services", RoutePolicy::public(&[Method::GET]))?
            .register("/auth/signup", RoutePolicy::public(&[Method::POST]))?
            .register("/auth/signin", RoutePolicy::public(&[Method::POST]))?
            .register("/auth/refresh-token", RoutePolicy::public(&[Method::POST]))?
            .register("/auth/reset-password", RoutePolicy::public(&[Method::POST]))?
            .register("/auth/update-password", RoutePolicy::public(&[Method::POST]))?
            .register("/auth/signout", RoutePolicy::protected(&[Method::POST]))?
            .register("/auth/me", RoutePolicy::protected(&[Method::GET]))?
            .register("/auth/profile", RoutePolicy::protected(&[Method::GET]))?
            .register("/api/{*rest}", RoutePolicy::protected(&[]))?;

        for policy in extra {
            builder = builder.register_config(policy)?;
        }

        builder.build()
    }

    /// Policy governing `method path`. HEAD is looked up as GET.
    pub fn policy_for(&self, method: &Method, path: &str) -> &RoutePolicy {
        let method = if *method == Method::HEAD {
            &Method::GET
        } else {
            method
        };

        self.router
            .at(path)
            .ok()
            .and_then(|matched| self.buckets.get(*matched.value))
            .and_then(|policies| policies.iter().find(|p| p.matches_method(method)))
            .unwrap_or(&self.fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable {
        RouteTable::with_defaults(&[RoutePolicyConfig {
            path: "/api/users/admin/{*rest}".to_string(),
            methods: vec![],
            visibility: RouteVisibility::Protected,
            allowed_roles: vec![Role::Admin],
        }])
        .unwrap()
    }

    #[test]
    fn gateway_endpoints_are_public() {
        let table = table();
        for path in ["/", "/status", "/health", "/services"] {
            assert!(table.policy_for(&Method::GET, path).is_public(), "{path}");
        }
        assert!(table.policy_for(&Method::HEAD, "/health").is_public());
        assert!(table.policy_for(&Method::POST, "/auth/signin").is_public());
    }

    #[test]
    fn unknown_and_unlisted_routes_fail_closed() {
        let table = table();
        assert!(!table.policy_for(&Method::GET, "/unknown").is_public());
        // method not registered for a public path
        assert!(!table.policy_for(&Method::DELETE, "/status").is_public());
        assert!(!table.policy_for(&Method::GET, "/auth/signin").is_public());
        assert!(!table.policy_for(&Method::POST, "/auth/signout").is_public());
    }

    #[test]
    fn api_routes_are_protected_and_role_gates_apply() {
        let table = table();
        let classroom = table.policy_for(&Method::GET, "/api/classroom/materials");
        assert!(!classroom.is_public());
        assert!(classroom.admits(Role::Student));

        let admin = table.policy_for(&Method::DELETE, "/api/users/admin/42");
        assert!(!admin.admits(Role::Student));
        assert!(!admin.admits(Role::Tutor));
        assert!(admin.admits(Role::Admin));
    }

    #[test]
    fn method_specific_policies_share_a_path() {
        let table = RouteTable::builder()
            .register("/api/catalog", RoutePolicy::public(&[Method::GET]))
            .unwrap()
            .register(
                "/api/catalog",
                RoutePolicy::protected(&[Method::POST]).with_roles(&[Role::Tutor]),
            )
            .unwrap()
            .build()
            .unwrap();

        assert!(table.policy_for(&Method::GET, "/api/catalog").is_public());
        let post = table.policy_for(&Method::POST, "/api/catalog");
        assert!(!post.is_public());
        assert_eq!(post.allowed_roles, vec![Role::Tutor]);
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let result = RouteTable::builder()
            .register("/x", RoutePolicy::public(&[Method::GET]))
            .unwrap()
            .register("/x", RoutePolicy::protected(&[]));
        assert!(matches!(result, Err(RouteTableError::Duplicate { .. })));
    }

    #[test]
    fn invalid_method_in_config_is_rejected() {
        let result = RouteTable::with_defaults(&[RoutePolicyConfig {
            path: "/api/x".to_string(),
            methods: vec!["NOT A METHOD".to_string()],
            visibility: RouteVisibility::Public,
            allowed_roles: vec![],
        }]);
        assert!(matches!(result, Err(RouteTableError::InvalidMethod(_))));
    }
}
