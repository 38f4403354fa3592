//! Supabase-style identity provider: GoTrue for auth, PostgREST for the `profiles`
//! table.
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};

use crate::{
    config::models::IdentityProviderConfig,
    core::principal::{Principal, Role},
    ports::identity_provider::{
        AuthUser, IdentityError, IdentityProvider, IdentityResult, MessageResponse,
        ResetPasswordRequest, Session, SignInRequest, SignInResponse, SignUpRequest,
        SignUpResponse, UpdatePasswordRequest,
    },
};

const PROFILES_TABLE: &str = "profiles";

/// User record as returned by GoTrue.
#[derive(Debug, Clone, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: Map<String, Value>,
    #[serde(default)]
    app_metadata: Map<String, Value>,
}

impl ProviderUser {
    fn into_principal(self) -> Principal {
        let role = Principal::role_from_metadata(&self.user_metadata, &self.app_metadata);
        Principal::new(self.id, self.email.unwrap_or_default(), role)
            .with_attributes(self.user_metadata)
    }
}

#[derive(Debug, Deserialize)]
struct TokenGrant {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: Option<ProviderUser>,
}

impl TokenGrant {
    fn session(&self) -> Session {
        Session {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            expires_in: self.expires_in,
        }
    }
}

/// Best human-readable message in a GoTrue / PostgREST error body.
fn provider_message(body: &Value) -> String {
    ["msg", "error_description", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .unwrap_or("unknown error")
        .to_string()
}

fn profile_role(profile: &Value) -> Option<Role> {
    profile
        .get("role")
        .and_then(Value::as_str)
        .and_then(|r| r.parse().ok())
}

pub struct SupabaseIdentityProvider {
    client: Client,
    base_url: String,
    anon_key: String,
    service_role_key: String,
    frontend_url: Option<String>,
}

impl SupabaseIdentityProvider {
    pub fn new(config: &IdentityProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build identity provider HTTP client")?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            service_role_key: config.service_role_key.clone(),
            frontend_url: config
                .frontend_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
        })
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.base_url, path)
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Key sent as `apikey` on user-scoped calls.
    fn public_key(&self) -> &str {
        if self.anon_key.is_empty() {
            &self.service_role_key
        } else {
            &self.anon_key
        }
    }

    /// Request authenticated as the service role.
    fn admin(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .bearer_auth(&self.service_role_key)
    }

    /// Request on behalf of the user owning `token`.
    fn as_user(&self, builder: RequestBuilder, token: &str) -> RequestBuilder {
        builder.header("apikey", self.public_key()).bearer_auth(token)
    }

    /// Send and read the JSON body. Transport failures and 5xx answers become
    /// [`IdentityError::Unavailable`]; other statuses are returned for the caller
    /// to interpret.
    async fn send(&self, builder: RequestBuilder) -> IdentityResult<(StatusCode, Value)> {
        let response = builder.send().await.map_err(|e| {
            tracing::warn!("Identity provider request failed: {}", e);
            IdentityError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| IdentityError::Unavailable(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "Identity provider error response");
            return Err(IdentityError::Unavailable(format!(
                "{}: {}",
                status,
                provider_message(&body)
            )));
        }
        Ok((status, body))
    }

    fn parse<T: DeserializeOwned>(body: Value, what: &str) -> IdentityResult<T> {
        serde_json::from_value(body).map_err(|e| {
            IdentityError::Unavailable(format!("Unexpected {what} response from provider: {e}"))
        })
    }

    /// The user owning `token`. The service key goes in `apikey`; the token itself
    /// identifies whom to look up.
    async fn fetch_user(&self, token: &str) -> IdentityResult<ProviderUser> {
        let request = self
            .client
            .get(self.auth_url("/user"))
            .header("apikey", &self.service_role_key)
            .bearer_auth(token);
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Provider rejected token");
            return Err(IdentityError::InvalidToken);
        }
        Self::parse(body, "user")
    }

    async fn fetch_profile(&self, column: &str, value: &str) -> IdentityResult<Option<Value>> {
        let filter = format!("eq.{value}");
        let request = self.admin(
            self.client
                .get(self.rest_url(PROFILES_TABLE))
                .query(&[("select", "*"), (column, filter.as_str())]),
        );
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(IdentityError::Rejected(format!(
                "Profile lookup failed: {}",
                provider_message(&body)
            )));
        }

        match body {
            Value::Array(mut rows) if !rows.is_empty() => Ok(Some(rows.swap_remove(0))),
            _ => Ok(None),
        }
    }

    async fn insert_profile(&self, profile: &Value) -> IdentityResult<()> {
        let request = self.admin(
            self.client
                .post(self.rest_url(PROFILES_TABLE))
                .header("Prefer", "return=minimal")
                .json(profile),
        );
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(IdentityError::Rejected(format!(
                "Failed to create profile: {}",
                provider_message(&body)
            )));
        }
        Ok(())
    }

    async fn delete_auth_user(&self, id: &str) {
        let request = self.admin(
            self.client
                .delete(self.auth_url(&format!("/admin/users/{id}"))),
        );
        match self.send(request).await {
            Ok((status, _)) if status.is_success() => {
                tracing::info!(user_id = %id, "Rolled back auth user after profile failure");
            }
            Ok((status, body)) => tracing::error!(
                user_id = %id,
                status = status.as_u16(),
                "Failed to roll back auth user: {}",
                provider_message(&body)
            ),
            Err(e) => tracing::error!(user_id = %id, "Failed to roll back auth user: {}", e),
        }
    }
}

#[async_trait]
impl IdentityProvider for SupabaseIdentityProvider {
    async fn validate_token(&self, token: &str) -> IdentityResult<Principal> {
        Ok(self.fetch_user(token).await?.into_principal())
    }

    async fn sign_up(&self, request: SignUpRequest) -> IdentityResult<SignUpResponse> {
        if self.fetch_profile("email", &request.email).await?.is_some() {
            return Err(IdentityError::Conflict(
                "A user with this email already exists".to_string(),
            ));
        }

        let create = self.admin(self.client.post(self.auth_url("/admin/users")).json(&json!({
            "email": request.email,
            "password": request.password,
            "email_confirm": true,
            "user_metadata": {
                "first_name": request.first_name,
                "last_name": request.last_name,
                "role": request.role,
            },
        })));
        let (status, body) = self.send(create).await?;
        if !status.is_success() {
            let message = provider_message(&body);
            return Err(
                if status == StatusCode::UNPROCESSABLE_ENTITY
                    && message.to_ascii_lowercase().contains("already")
                {
                    IdentityError::Conflict("A user with this email already exists".to_string())
                } else {
                    IdentityError::Rejected(format!("Failed to create user: {message}"))
                },
            );
        }
        let user: ProviderUser = Self::parse(body, "user")?;
        let email = user.email.clone().unwrap_or_else(|| request.email.clone());

        let profile = json!({
            "id": user.id,
            "email": email,
            "first_name": request.first_name,
            "last_name": request.last_name,
            "role": request.role,
            "gender": request.gender,
            "semester_number": request.semester_number,
            "academic_year": request.academic_year,
            "status": "active",
        });

        if let Err(e) = self.insert_profile(&profile).await {
            self.delete_auth_user(&user.id).await;
            return Err(e);
        }

        tracing::info!(user_id = %user.id, role = %request.role, "User registered");
        Ok(SignUpResponse {
            user: AuthUser {
                id: user.id,
                email,
                role: request.role,
                profile: None,
            },
            message: "User registered successfully".to_string(),
        })
    }

    async fn sign_in(&self, request: SignInRequest) -> IdentityResult<SignInResponse> {
        let grant = self
            .client
            .post(self.auth_url("/token"))
            .query(&[("grant_type", "password")])
            .header("apikey", self.public_key())
            .json(&json!({ "email": request.email, "password": request.password }));
        let (status, body) = self.send(grant).await?;
        if !status.is_success() {
            let message = provider_message(&body);
            return Err(
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
                    tracing::debug!("Sign-in rejected: {}", message);
                    IdentityError::InvalidCredentials
                } else {
                    IdentityError::Rejected(format!("Sign-in failed: {message}"))
                },
            );
        }
        let grant: TokenGrant = Self::parse(body, "token")?;
        let user = grant.user.clone().ok_or_else(|| {
            IdentityError::Unavailable("Token response did not include a user".to_string())
        })?;

        let profile = self
            .fetch_profile("id", &user.id)
            .await?
            .ok_or_else(|| IdentityError::NotFound("User profile not found".to_string()))?;

        if profile.get("status").and_then(Value::as_str) != Some("active") {
            return Err(IdentityError::AccountDisabled);
        }

        let role = profile_role(&profile).unwrap_or_else(|| {
            Principal::role_from_metadata(&user.user_metadata, &user.app_metadata)
        });

        Ok(SignInResponse {
            session: grant.session(),
            user: AuthUser {
                id: user.id,
                email: user.email.unwrap_or_default(),
                role,
                profile: Some(profile),
            },
        })
    }

    async fn sign_out(&self, access_token: &str) -> IdentityResult<MessageResponse> {
        let request = self.as_user(self.client.post(self.auth_url("/logout")), access_token);
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            return Err(IdentityError::Rejected(format!(
                "Sign-out failed: {}",
                provider_message(&body)
            )));
        }
        Ok(MessageResponse::new("Signed out successfully"))
    }

    async fn refresh_token(&self, refresh_token: &str) -> IdentityResult<Session> {
        let request = self
            .client
            .post(self.auth_url("/token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", self.public_key())
            .json(&json!({ "refresh_token": refresh_token }));
        let (status, body) = self.send(request).await?;
        if !status.is_success() {
            tracing::debug!("Refresh rejected: {}", provider_message(&body));
            return Err(IdentityError::InvalidToken);
        }
        let grant: TokenGrant = Self::parse(body, "token")?;
        Ok(Session {
            expires_in: None,
            ..grant.session()
        })
    }

    async fn reset_password(
        &self,
        request: ResetPasswordRequest,
    ) -> IdentityResult<MessageResponse> {
        let mut builder = self
            .client
            .post(self.auth_url("/recover"))
            .header("apikey", self.public_key())
            .json(&json!({ "email": request.email }));
        if let Some(frontend) = &self.frontend_url {
            builder = builder.query(&[("redirect_to", format!("{frontend}/reset-password"))]);
        }

        let (status, body) = self.send(builder).await?;
        if !status.is_success() {
            return Err(IdentityError::Rejected(format!(
                "Failed to send reset email: {}",
                provider_message(&body)
            )));
        }
        Ok(MessageResponse::new("Password reset email sent"))
    }

    async fn update_password(
        &self,
        request: UpdatePasswordRequest,
    ) -> IdentityResult<MessageResponse> {
        let builder = self.as_user(
            self.client
                .put(self.auth_url("/user"))
                .json(&json!({ "password": request.password })),
            &request.access_token,
        );
        let (status, body) = self.send(builder).await?;
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(IdentityError::InvalidToken);
        }
        if !status.is_success() {
            return Err(IdentityError::Rejected(format!(
                "Failed to update password: {}",
                provider_message(&body)
            )));
        }
        Ok(MessageResponse::new("Password updated successfully"))
    }

    async fn current_user(&self, access_token: &str) -> IdentityResult<AuthUser> {
        let user = self.fetch_user(access_token).await?;
        let profile = self
            .fetch_profile("id", &user.id)
            .await?
            .ok_or_else(|| IdentityError::NotFound("User profile not found".to_string()))?;

        let role = profile_role(&profile).unwrap_or_else(|| {
            Principal::role_from_metadata(&user.user_metadata, &user.app_metadata)
        });

        Ok(AuthUser {
            id: user.id,
            email: user.email.unwrap_or_default(),
            role,
            profile: Some(profile),
        })
    }
}
