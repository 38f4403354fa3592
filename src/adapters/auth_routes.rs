//! `/auth/*` endpoints. Thin handlers: decode, validate, delegate to the
//! [`IdentityProvider`](crate::ports::identity_provider::IdentityProvider).
use axum::{
    Extension, Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use validator::Validate;

use crate::{
    adapters::router::AppState,
    core::{
        error::{AuthError, GatewayError},
        principal::{AccessToken, Principal},
    },
    ports::identity_provider::{
        AuthUser, IdentityError, MessageResponse, RefreshTokenRequest, ResetPasswordRequest, Session,
        SignInRequest, SignInResponse, SignUpRequest, SignUpResponse, UpdatePasswordRequest,
    },
};

type AuthResult<T> = Result<T, GatewayError>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/signout", post(sign_out))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/update-password", post(update_password))
        .route("/auth/me", get(me))
        .route("/auth/profile", get(profile))
}

/// Unwrap and validate a JSON body. Decode and field failures are both a 400.
fn json_body<T: DeserializeOwned + Validate>(
    payload: Result<Json<T>, JsonRejection>,
) -> AuthResult<T> {
    let Json(body) = payload.map_err(|rejection| {
        tracing::debug!("Rejected request body: {}", rejection.body_text());
        GatewayError::BadRequest(rejection.body_text())
    })?;
    body.validate().map_err(IdentityError::from)?;
    Ok(body)
}

async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> AuthResult<(StatusCode, Json<SignUpResponse>)> {
    let request = json_body(payload)?;
    let response = state.identity.sign_up(request).await?;
    tracing::info!(user = %response.user.id, role = %response.user.role, "User signed up");
    Ok((StatusCode::CREATED, Json(response)))
}

async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> AuthResult<Json<SignInResponse>> {
    let request = json_body(payload)?;
    Ok(Json(state.identity.sign_in(request).await?))
}

async fn refresh_token(
    State(state): State<AppState>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> AuthResult<Json<Session>> {
    let request = json_body(payload)?;
    Ok(Json(state.identity.refresh_token(&request.refresh_token).await?))
}

async fn sign_out(
    State(state): State<AppState>,
    token: Option<Extension<AccessToken>>,
) -> AuthResult<Json<MessageResponse>> {
    let Extension(AccessToken(token)) = token.ok_or(AuthError::MissingToken)?;
    Ok(Json(state.identity.sign_out(&token).await?))
}

async fn reset_password(
    State(state): State<AppState>,
    payload: Result<Json<ResetPasswordRequest>, JsonRejection>,
) -> AuthResult<Json<MessageResponse>> {
    let request = json_body(payload)?;
    Ok(Json(state.identity.reset_password(request).await?))
}

async fn update_password(
    State(state): State<AppState>,
    payload: Result<Json<UpdatePasswordRequest>, JsonRejection>,
) -> AuthResult<Json<MessageResponse>> {
    let request = json_body(payload)?;
    Ok(Json(state.identity.update_password(request).await?))
}

async fn me(
    State(state): State<AppState>,
    token: Option<Extension<AccessToken>>,
) -> AuthResult<Json<AuthUser>> {
    let Extension(AccessToken(token)) = token.ok_or(AuthError::MissingToken)?;
    Ok(Json(state.identity.current_user(&token).await?))
}

/// The principal resolved by the auth gate; no provider call.
async fn profile(principal: Option<Extension<Principal>>) -> AuthResult<Json<Value>> {
    let Extension(principal) = principal.ok_or(AuthError::MissingToken)?;
    Ok(Json(json!({
        "id": principal.subject_id,
        "email": principal.email,
        "user_metadata": principal.attributes,
    })))
}
