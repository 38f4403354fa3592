//! Allow / deny decision for every inbound request.
use std::sync::Arc;

use axum::http::{HeaderMap, Method, header};

use crate::{
    core::{error::AuthError, principal::Principal, route_policy::RouteTable},
    ports::identity_provider::{IdentityError, IdentityProvider},
};

/// Token from `Authorization: Bearer <token>`. The scheme is matched exactly and
/// an empty token counts as absent.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[derive(Clone)]
pub struct AuthGate {
    identity: Arc<dyn IdentityProvider>,
    routes: Arc<RouteTable>,
}

impl AuthGate {
    pub fn new(identity: Arc<dyn IdentityProvider>, routes: Arc<RouteTable>) -> Self {
        Self { identity, routes }
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// `Ok(None)` for public routes, `Ok(Some(principal))` for admitted protected
    /// ones. Public routes never read headers or call the provider.
    pub async fn authorize(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
    ) -> Result<Option<Principal>, AuthError> {
        let policy = self.routes.policy_for(method, path);
        if policy.is_public() {
            return Ok(None);
        }

        let token = extract_bearer_token(headers).ok_or(AuthError::MissingToken)?;

        let principal = self
            .identity
            .validate_token(token)
            .await
            .map_err(|e| match e {
                IdentityError::Unavailable(reason) => {
                    tracing::warn!(%reason, "Identity provider unavailable during token validation");
                    AuthError::ProviderUnavailable
                }
                other => {
                    tracing::debug!(error = %other, "Token rejected");
                    AuthError::InvalidToken
                }
            })?;

        if !policy.admits(principal.role) {
            tracing::debug!(
                subject = %principal.subject_id,
                role = %principal.role,
                %path,
                "Role not allowed for route"
            );
            return Err(AuthError::Forbidden);
        }

        Ok(Some(principal))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use async_trait::async_trait;
    use axum::http::HeaderValue;

    use super::*;
    use crate::{
        config::models::RoutePolicyConfig,
        core::{principal::Role, route_policy::RouteVisibility},
        ports::identity_provider::*,
    };

    /// Token → principal map; counts calls. Shared with other test modules.
    #[derive(Default)]
    pub(crate) struct StubIdentity {
        pub users: HashMap<String, Principal>,
        pub unavailable: bool,
        pub delay: Option<Duration>,
        pub calls: AtomicUsize,
    }

    impl StubIdentity {
        pub fn with_user(mut self, token: &str, role: Role) -> Self {
            let principal = Principal::new(
                format!("id-{token}"),
                format!("{token}@uni.edu"),
                role,
            );
            self.users.insert(token.to_string(), principal);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IdentityProvider for StubIdentity {
        async fn validate_token(&self, token: &str) -> IdentityResult<Principal> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.unavailable {
                return Err(IdentityError::Unavailable("stub down".into()));
            }
            self.users
                .get(token)
                .cloned()
                .ok_or(IdentityError::InvalidToken)
        }

        async fn sign_up(&self, _: SignUpRequest) -> IdentityResult<SignUpResponse> {
            Err(IdentityError::Rejected("not supported by stub".into()))
        }

        async fn sign_in(&self, _: SignInRequest) -> IdentityResult<SignInResponse> {
            Err(IdentityError::InvalidCredentials)
        }

        async fn sign_out(&self, _: &str) -> IdentityResult<MessageResponse> {
            Ok(MessageResponse::new("Signed out"))
        }

        async fn refresh_token(&self, _: &str) -> IdentityResult<Session> {
            Err(IdentityError::InvalidToken)
        }

        async fn reset_password(
            &self,
            _: ResetPasswordRequest,
        ) -> IdentityResult<MessageResponse> {
            Ok(MessageResponse::new("Reset email sent"))
        }

        async fn update_password(
            &self,
            _: UpdatePasswordRequest,
        ) -> IdentityResult<MessageResponse> {
            Ok(MessageResponse::new("Password updated"))
        }

        async fn current_user(&self, token: &str) -> IdentityResult<AuthUser> {
            let principal = self.validate_token(token).await?;
            Ok(AuthUser {
                id: principal.subject_id,
                email: principal.email,
                role: principal.role,
                profile: None,
            })
        }
    }

    fn gate(identity: Arc<StubIdentity>) -> AuthGate {
        let routes = RouteTable::with_defaults(&[RoutePolicyConfig {
            path: "/api/users/admin/{*rest}".to_string(),
            methods: vec![],
            visibility: RouteVisibility::Protected,
            allowed_roles: vec![Role::Admin],
        }])
        .unwrap();
        AuthGate::new(identity, Arc::new(routes))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn bearer_scheme_is_exact() {
        assert_eq!(extract_bearer_token(&bearer("abc")), Some("abc"));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn public_route_skips_provider_even_with_garbage_token() {
        let identity = Arc::new(StubIdentity::default());
        let gate = gate(identity.clone());

        let result = gate
            .authorize(&Method::GET, "/health", &bearer("garbage"))
            .await;
        assert_eq!(result, Ok(None));
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn missing_token_never_reaches_provider() {
        let identity = Arc::new(StubIdentity::default());
        let gate = gate(identity.clone());

        let result = gate
            .authorize(&Method::GET, "/api/users/42", &HeaderMap::new())
            .await;
        assert_eq!(result, Err(AuthError::MissingToken));
        assert_eq!(identity.calls(), 0);
    }

    #[tokio::test]
    async fn valid_token_yields_principal_with_one_call() {
        let identity = Arc::new(StubIdentity::default().with_user("t1", Role::Tutor));
        let gate = gate(identity.clone());

        let principal = gate
            .authorize(&Method::POST, "/api/classroom/sessions", &bearer("t1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(principal.role, Role::Tutor);
        assert_eq!(identity.calls(), 1);
    }

    #[tokio::test]
    async fn rejected_and_unavailable_both_deny() {
        let identity = Arc::new(StubIdentity::default());
        let result = gate(identity)
            .authorize(&Method::GET, "/api/chat/rooms", &bearer("unknown"))
            .await;
        assert_eq!(result, Err(AuthError::InvalidToken));

        let identity = Arc::new(StubIdentity {
            unavailable: true,
            ..StubIdentity::default()
        });
        let result = gate(identity)
            .authorize(&Method::GET, "/api/chat/rooms", &bearer("t1"))
            .await;
        assert_eq!(result, Err(AuthError::ProviderUnavailable));
        assert_eq!(result.unwrap_err().status_code(), 401);
    }

    #[tokio::test]
    async fn role_gate_forbids_other_roles() {
        let identity = Arc::new(
            StubIdentity::default()
                .with_user("student", Role::Student)
                .with_user("admin", Role::Admin),
        );
        let gate = gate(identity);

        let result = gate
            .authorize(&Method::DELETE, "/api/users/admin/7", &bearer("student"))
            .await;
        assert_eq!(result, Err(AuthError::Forbidden));

        let result = gate
            .authorize(&Method::DELETE, "/api/users/admin/7", &bearer("admin"))
            .await;
        assert!(matches!(result, Ok(Some(p)) if p.role == Role::Admin));
    }
}
