//! Authenticated identity attached to a request by the auth gate.
use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Application role of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Tutor,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Tutor => "tutor",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Ok(Role::Student),
            "tutor" => Ok(Role::Tutor),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// The identity resolved for one request. Owned by the request's extensions and
/// dropped with it; the gateway never stores principals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub subject_id: String,
    pub email: String,
    pub role: Role,
    /// Provider-side user metadata, passed through untouched
    pub attributes: Map<String, Value>,
}

impl Principal {
    pub fn new(subject_id: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            email: email.into(),
            role,
            attributes: Map::new(),
        }
    }

    pub fn with_attributes(mut self, attributes: Map<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Role named in the provider metadata. Missing or unrecognised roles fall back to
    /// [`Role::Student`], the least privileged one.
    pub fn role_from_metadata(
        user_metadata: &Map<String, Value>,
        app_metadata: &Map<String, Value>,
    ) -> Role {
        user_metadata
            .get("role")
            .or_else(|| app_metadata.get("role"))
            .and_then(Value::as_str)
            .and_then(|r| r.parse().ok())
            .unwrap_or(Role::Student)
    }
}

/// Raw bearer token of the authenticated request, kept next to the [`Principal`] for
/// handlers that call the provider on the user's behalf.
#[derive(Debug, Clone)]
pub struct AccessToken(pub String);
