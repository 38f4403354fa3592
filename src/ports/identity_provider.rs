//! Port to the external identity provider.
//!
//! The gateway never verifies tokens itself. Every protected request costs one
//! `validate_token` call; the `/auth/*` endpoints delegate the rest of the account
//! lifecycle through the same trait.
use std::borrow::Cow;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::core::principal::{Principal, Role};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdentityError {
    /// The provider did not accept the presented token
    #[error("Token rejected by identity provider")]
    InvalidToken,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is disabled")]
    AccountDisabled,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Request failed local validation before reaching the provider
    #[error("{0}")]
    Validation(String),

    /// The provider answered with a 4xx we have no better mapping for
    #[error("Identity provider rejected the request: {0}")]
    Rejected(String),

    /// Network failure, timeout or provider 5xx
    #[error("Identity provider unavailable: {0}")]
    Unavailable(String),
}

impl IdentityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            IdentityError::InvalidToken
            | IdentityError::InvalidCredentials
            | IdentityError::AccountDisabled => StatusCode::UNAUTHORIZED,
            IdentityError::NotFound(_) => StatusCode::NOT_FOUND,
            IdentityError::Conflict(_) => StatusCode::CONFLICT,
            IdentityError::Validation(_) | IdentityError::Rejected(_) => StatusCode::BAD_REQUEST,
            IdentityError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            IdentityError::InvalidToken => "Invalid token".to_string(),
            IdentityError::InvalidCredentials => "Invalid credentials".to_string(),
            IdentityError::AccountDisabled => {
                "Account disabled. Contact the administrator.".to_string()
            }
            IdentityError::NotFound(msg)
            | IdentityError::Conflict(msg)
            | IdentityError::Validation(msg)
            | IdentityError::Rejected(msg) => msg.clone(),
            IdentityError::Unavailable(_) => {
                "Identity provider is temporarily unavailable".to_string()
            }
        }
    }
}

pub type IdentityResult<T> = Result<T, IdentityError>;

impl From<ValidationErrors> for IdentityError {
    /// Flatten field errors into one message, ordered by field name.
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by(|a, b| a.0.cmp(&b.0));
        let messages: Vec<String> = fields
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| match &error.message {
                    Some(message) => message.to_string(),
                    None => format!("{field} is invalid"),
                })
            })
            .collect();
        IdentityError::Validation(messages.join("; "))
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

fn first_name_not_blank(value: &str) -> Result<(), ValidationError> {
    not_blank(value).map_err(|_| invalid("blank", "firstName must not be empty"))
}

fn last_name_not_blank(value: &str) -> Result<(), ValidationError> {
    not_blank(value).map_err(|_| invalid("blank", "lastName must not be empty"))
}

fn password_not_blank(value: &str) -> Result<(), ValidationError> {
    not_blank(value).map_err(|_| invalid("blank", "password must not be empty"))
}

fn access_token_not_blank(value: &str) -> Result<(), ValidationError> {
    not_blank(value).map_err(|_| invalid("blank", "accessToken must not be empty"))
}

fn refresh_token_not_blank(value: &str) -> Result<(), ValidationError> {
    not_blank(value).map_err(|_| invalid("blank", "refreshToken must not be empty"))
}

/// Admins are provisioned out of band.
fn self_service_role(role: &Role) -> Result<(), ValidationError> {
    match role {
        Role::Student | Role::Tutor => Ok(()),
        Role::Admin => Err(invalid("role", "role must be one of: student, tutor")),
    }
}

fn known_gender(gender: &str) -> Result<(), ValidationError> {
    match gender {
        "M" | "F" | "O" => Ok(()),
        _ => Err(invalid("gender", "gender must be one of: M, F, O")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must be at least 6 characters long"))]
    pub password: String,
    #[validate(custom(function = first_name_not_blank))]
    pub first_name: String,
    #[validate(custom(function = last_name_not_blank))]
    pub last_name: String,
    #[validate(custom(function = self_service_role))]
    pub role: Role,
    /// `M`, `F` or `O`
    #[validate(custom(function = known_gender))]
    pub gender: String,
    #[validate(range(min = 1, max = 12, message = "semesterNumber must be between 1 and 12"))]
    pub semester_number: i64,
    #[serde(default)]
    pub academic_year: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SignInRequest {
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
    #[validate(custom(function = password_not_blank))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(email(message = "email must be a valid email address"))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    #[validate(length(min = 6, message = "password must be at least 6 characters long"))]
    pub password: String,
    #[validate(custom(function = access_token_not_blank))]
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[validate(custom(function = refresh_token_not_blank))]
    pub refresh_token: String,
}

/// Tokens issued by the provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

/// A user as reported by `/auth/me` and sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignUpResponse {
    pub user: AuthUser,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignInResponse {
    #[serde(flatten)]
    pub session: Session,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// IdentityProvider defines the port (interface) to the hosted auth / data service
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Resolve a bearer token into a principal. One provider round trip, no caching.
    async fn validate_token(&self, token: &str) -> IdentityResult<Principal>;

    /// Create the auth user and its profile row. A failed profile insert removes the
    /// auth user again.
    async fn sign_up(&self, request: SignUpRequest) -> IdentityResult<SignUpResponse>;

    /// Password grant; the profile must exist and be active.
    async fn sign_in(&self, request: SignInRequest) -> IdentityResult<SignInResponse>;

    async fn sign_out(&self, access_token: &str) -> IdentityResult<MessageResponse>;

    async fn refresh_token(&self, refresh_token: &str) -> IdentityResult<Session>;

    async fn reset_password(&self, request: ResetPasswordRequest)
    -> IdentityResult<MessageResponse>;

    async fn update_password(
        &self,
        request: UpdatePasswordRequest,
    ) -> IdentityResult<MessageResponse>;

    /// The token's user merged with its profile row.
    async fn current_user(&self, access_token: &str) -> IdentityResult<AuthUser>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn signup() -> SignUpRequest {
        serde_json::from_value(json!({
            "email": "ana@uni.edu",
            "password": "secret1",
            "firstName": "Ana",
            "lastName": "Ruiz",
            "role": "student",
            "gender": "F",
            "semesterNumber": 3
        }))
        .unwrap()
    }

    #[test]
    fn signup_accepts_camel_case_payload() {
        let req = signup();
        assert_eq!(req.first_name, "Ana");
        assert!(req.academic_year.is_none());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn signup_rejects_each_invalid_field() {
        let cases: Vec<(&str, Box<dyn Fn(&mut SignUpRequest)>)> = vec![
            ("email", Box::new(|r: &mut SignUpRequest| r.email = "not-an-email".into())),
            ("password", Box::new(|r: &mut SignUpRequest| r.password = "12345".into())),
            ("firstName", Box::new(|r: &mut SignUpRequest| r.first_name = "  ".into())),
            ("lastName", Box::new(|r: &mut SignUpRequest| r.last_name = String::new())),
            ("role", Box::new(|r: &mut SignUpRequest| r.role = Role::Admin)),
            ("gender", Box::new(|r: &mut SignUpRequest| r.gender = "X".into())),
            ("semesterNumber", Box::new(|r: &mut SignUpRequest| r.semester_number = 13)),
            ("semesterNumber", Box::new(|r: &mut SignUpRequest| r.semester_number = 0)),
        ];

        for (field, mutate) in cases {
            let mut req = signup();
            mutate(&mut req);
            let err = IdentityError::from(req.validate().unwrap_err());
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert!(err.to_string().contains(field), "{field}: {err}");
        }
    }

    #[test]
    fn every_failing_field_is_reported() {
        let mut req = signup();
        req.gender = "X".into();
        req.semester_number = 0;

        let err = IdentityError::from(req.validate().unwrap_err());
        assert_eq!(
            err,
            IdentityError::Validation(
                "gender must be one of: M, F, O; semesterNumber must be between 1 and 12"
                    .to_string()
            )
        );
    }

    #[test]
    fn sign_in_requires_email_and_password() {
        let req: SignInRequest =
            serde_json::from_value(json!({"email": "ana@uni.edu", "password": " "})).unwrap();
        let err = IdentityError::from(req.validate().unwrap_err());
        assert_eq!(err.public_message(), "password must not be empty");

        let req: SignInRequest =
            serde_json::from_value(json!({"email": "ana@", "password": "pw"})).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn update_password_requires_token_and_length() {
        let req = UpdatePasswordRequest {
            password: "longenough".into(),
            access_token: String::new(),
        };
        assert!(req.validate().is_err());

        let req: UpdatePasswordRequest =
            serde_json::from_value(json!({"password": "abcdef", "accessToken": "tok"})).unwrap();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            IdentityError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            IdentityError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            IdentityError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            IdentityError::Unavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            IdentityError::Rejected("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn sign_in_response_flattens_session() {
        let response = SignInResponse {
            session: Session {
                access_token: "a".into(),
                refresh_token: "r".into(),
                expires_at: Some(1),
                expires_in: None,
            },
            user: AuthUser {
                id: "u1".into(),
                email: "ana@uni.edu".into(),
                role: Role::Student,
                profile: None,
            },
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["access_token"], "a");
        assert_eq!(json["user"]["role"], "student");
        assert!(json.get("expires_in").is_none());
    }
}
