use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Prefix for structured overrides, e.g. `GATEWAY__PROXY__REQUEST_TIMEOUT_SECS=20`
pub const ENV_PREFIX: &str = "GATEWAY";

/// Load configuration from an optional file plus the environment.
///
/// Sources, lowest precedence first: built-in defaults, the file (YAML, JSON, TOML or INI
/// by extension), `GATEWAY__*` variables, then the deployment variables handled by
/// [`apply_env_overrides`].
pub async fn load_config(config_path: Option<&str>) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: Option<&str>) -> Result<GatewayConfig> {
    let mut config = load_config_unchecked(config_path)?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// File and `GATEWAY__*` sources only, without the deployment variable overrides
pub fn load_config_unchecked(config_path: Option<&str>) -> Result<GatewayConfig> {
    let mut builder = Config::builder();

    if let Some(config_path) = config_path {
        let path = Path::new(config_path);
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            Some("ini") => FileFormat::Ini,
            _ => FileFormat::Toml,
        };
        builder = builder.add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ));
    }

    let settings = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| match config_path {
            Some(p) => format!("Failed to build config from {p}"),
            None => "Failed to build config from environment".to_string(),
        })?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .wrap_err("Failed to deserialize gateway configuration")?;

    Ok(gateway_config)
}

/// Apply the deployment environment variables the services were historically started
/// with. `lookup` abstracts `std::env::var` so tests can feed a fixed map.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(port) = lookup("API_GATEWAY_PORT") {
        let host = config
            .listen_addr
            .rsplit_once(':')
            .map_or("0.0.0.0", |(host, _)| host);
        config.listen_addr = format!("{host}:{}", port.trim());
    }

    for (service, key) in [
        ("user-service", "USER_SERVICE_URL"),
        ("classroom-service", "CLASSROOM_SERVICE_URL"),
        ("chat-service", "CHAT_SERVICE_URL"),
    ] {
        if let Some(url) = lookup(key) {
            match config.service_mut(service) {
                Some(entry) => entry.base_url = url,
                None => tracing::warn!("{} is set but no '{}' is configured", key, service),
            }
        }
    }

    if let Some(url) = lookup("SUPABASE_URL") {
        config.identity.url = url;
    }
    if let Some(key) = lookup("SUPABASE_ANON_KEY") {
        config.identity.anon_key = key;
    }
    if let Some(key) = lookup("SUPABASE_SERVICE_ROLE_KEY") {
        config.identity.service_role_key = key;
    }
    if let Some(url) = lookup("FRONTEND_URL") {
        config.identity.frontend_url = Some(url);
    }
    if let Some(origin) = lookup("CORS_ORIGIN") {
        config.cors_origin = origin;
    }
}
