use std::{collections::HashSet, net::SocketAddr};

use eyre::Result;

use crate::{
    config::models::{GatewayConfig, IdentityProviderConfig, ServiceEntry},
    core::{registry::ServiceRegistry, route_policy::RouteTable},
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Route policy conflict: {message}")]
    RouteConflict { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, collecting every error found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.services.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "services".to_string(),
            });
        }

        let mut seen_names = HashSet::new();
        for (i, service) in config.services.iter().enumerate() {
            if !seen_names.insert(service.name.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("services[{i}].name"),
                    message: format!("Duplicate service name '{}'", service.name),
                });
            }
            if let Err(mut service_errors) = Self::validate_service(i, service) {
                errors.append(&mut service_errors);
            }
        }

        if let Err(mut identity_errors) = Self::validate_identity(&config.identity) {
            errors.append(&mut identity_errors);
        }

        if config.proxy.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "proxy.request_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Err(e) = RouteTable::with_defaults(&config.route_policies) {
            errors.push(ValidationError::RouteConflict {
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Non-fatal findings. Overlapping prefixes resolve to the first registered service.
    pub fn warnings(config: &GatewayConfig) -> Vec<String> {
        let registry = ServiceRegistry::new(config.services.clone());
        registry
            .overlapping_prefixes()
            .into_iter()
            .map(|(first, shadowed)| {
                format!(
                    "Prefix '{}' of '{}' overlaps '{}' of '{}'; matching paths go to '{}'",
                    first.path_prefix,
                    first.name,
                    shadowed.path_prefix,
                    shadowed.name,
                    first.name
                )
            })
            .collect()
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:3000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_service(index: usize, service: &ServiceEntry) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let field = |name: &str| format!("services[{index}].{name}");

        if service.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: field("name"),
            });
        }

        if let Err(e) = Self::validate_url(&service.base_url, &field("base_url")) {
            errors.push(e);
        }

        if !service.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: field("path_prefix"),
                message: "Path prefixes must start with '/'".to_string(),
            });
        }

        if !service.health_path.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: field("health_path"),
                message: "Health paths must start with '/'".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_identity(identity: &IdentityProviderConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if identity.url.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "identity.url (SUPABASE_URL)".to_string(),
            });
        } else if let Err(e) = Self::validate_url(&identity.url, "identity.url") {
            errors.push(e);
        }

        if identity.service_role_key.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "identity.service_role_key (SUPABASE_SERVICE_ROLE_KEY)".to_string(),
            });
        }

        if identity.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "identity.timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::models::{IdentityProviderConfig, RoutePolicyConfig},
        core::{principal::Role, route_policy::RouteVisibility},
    };

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig::builder()
            .listen_addr("127.0.0.1:3000")
            .identity(IdentityProviderConfig {
                url: "https://project.supabase.co".to_string(),
                anon_key: "anon".to_string(),
                service_role_key: "service".to_string(),
                ..IdentityProviderConfig::default()
            })
            .build()
    }

    #[test]
    fn validate_accepts_default_services() {
        assert!(GatewayConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_requires_identity_url() {
        let mut config = minimal_valid_config();
        config.identity.url = String::new();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_base_url_without_scheme() {
        let mut config = minimal_valid_config();
        config.services[0].base_url = "localhost:3001".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_relative_prefix_and_health_path() {
        let mut config = minimal_valid_config();
        config.services[1].path_prefix = "api/classroom".to_string();
        config.services[2].health_path = "health".to_string();

        let err = GatewayConfigValidator::validate(&config).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("services[1].path_prefix"));
        assert!(message.contains("services[2].health_path"));
    }

    #[test]
    fn validate_rejects_duplicate_service_names() {
        let mut config = minimal_valid_config();
        config.services[2].name = "user-service".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_rejects_conflicting_route_policies() {
        let mut config = minimal_valid_config();
        config.route_policies.push(RoutePolicyConfig {
            path: "/api/{*rest}".to_string(),
            methods: vec![],
            visibility: RouteVisibility::Public,
            allowed_roles: vec![],
        });
        assert!(GatewayConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn validate_accepts_role_gated_policy() {
        let mut config = minimal_valid_config();
        config.route_policies.push(RoutePolicyConfig {
            path: "/api/users/admin/{*rest}".to_string(),
            methods: vec![],
            visibility: RouteVisibility::Protected,
            allowed_roles: vec![Role::Admin],
        });
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn overlapping_prefixes_are_warnings_not_errors() {
        let mut config = minimal_valid_config();
        config.services.push(ServiceEntry::new(
            "user-admin",
            "http://localhost:3004",
            "/api/users/admin",
        ));

        assert!(GatewayConfigValidator::validate(&config).is_ok());
        let warnings = GatewayConfigValidator::warnings(&config);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("'user-service'"));
    }
}
