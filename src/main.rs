use std::{future::IntoFuture, net::SocketAddr, path::Path, sync::Arc};

use clap::{Parser, ValueEnum};
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use tutormatch_gateway::{
    AppState, SupabaseIdentityProvider, build_router,
    config::{GatewayConfig, GatewayConfigValidator, load_config},
    metrics, tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file; environment variables alone are enough when omitted
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Log output format
    #[clap(long, value_enum, default_value_t = LogFormat::Json, global = true)]
    log_format: LogFormat,

    /// Log filter directive (e.g. `debug` or `tutormatch_gateway=trace`); overrides RUST_LOG
    #[clap(long, global = true)]
    log_level: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve,
    /// Validate the configuration and exit
    Validate,
    /// Write a starter configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "gateway.toml")]
        output: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Validate => validate_config_command(config_path).await,
        Commands::Init { output } => init_config_command(&output).await,
        Commands::Serve => serve(config_path, args.log_format, args.log_level.as_deref()).await,
    }
}

async fn serve(
    config_path: Option<&str>,
    log_format: LogFormat,
    log_level: Option<&str>,
) -> Result<()> {
    let tracing_init = match (log_level, log_format) {
        (Some(level), format) => {
            tracing_setup::init_tracing_with_config(level, format == LogFormat::Json)
        }
        (None, LogFormat::Json) => tracing_setup::init_tracing(),
        (None, LogFormat::Pretty) => tracing_setup::init_console_tracing(),
    };
    tracing_init.map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    // Both the upstream client and the identity client use rustls
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    match config_path {
        Some(path) => tracing::info!("Loading configuration from {path}"),
        None => tracing::info!("Loading configuration from environment"),
    }
    let config = load_config(config_path)
        .await
        .wrap_err("Failed to load configuration")?;

    GatewayConfigValidator::validate(&config)
        .map_err(|e| eyre!("Configuration validation failed: {}", e))?;
    for warning in GatewayConfigValidator::warnings(&config) {
        tracing::warn!("{}", warning);
    }

    let identity = Arc::new(
        SupabaseIdentityProvider::new(&config.identity)
            .wrap_err("Failed to create identity provider client")?,
    );
    let state = AppState::from_config(&config, identity)?;
    let app = build_router(state);

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", config.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    log_startup(&config);

    let graceful_shutdown = GracefulShutdown::new();
    let signal_handler = {
        let shutdown = graceful_shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await })
    };

    let shutdown_signal = {
        let shutdown = graceful_shutdown.clone();
        async move {
            let reason = shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}, draining connections", reason);
        }
    };

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .into_future();

    // Bound the drain: once the signal fired, in-flight requests get `drain_timeout`
    let drain_deadline = {
        let shutdown = graceful_shutdown.clone();
        async move {
            shutdown.wait_for_shutdown_signal().await;
            tokio::time::sleep(shutdown.drain_timeout()).await;
        }
    };

    tokio::select! {
        result = server => result.context("Server error")?,
        _ = drain_deadline => {
            tracing::warn!(
                "Drain timeout of {:?} exceeded, exiting with requests in flight",
                graceful_shutdown.drain_timeout()
            );
        }
    }

    signal_handler.abort();
    tracing::info!("Gateway stopped");
    Ok(())
}

fn log_startup(config: &GatewayConfig) {
    tracing::info!(
        listen_addr = %config.listen_addr,
        services = config.services.len(),
        request_timeout_secs = config.proxy.request_timeout_secs,
        "TutorMatch API Gateway listening"
    );
    for service in &config.services {
        tracing::info!(
            service = %service.name,
            prefix = %service.path_prefix,
            target = %service.base_url,
            "Configured route"
        );
    }
}

/// Validate configuration and exit
async fn validate_config_command(config_path: Option<&str>) -> Result<()> {
    if let Some(path) = config_path {
        println!("🔍 Validating configuration file: {path}");
        if !Path::new(path).exists() {
            eprintln!("❌ Error: Configuration file '{path}' not found");
            std::process::exit(1);
        }
    } else {
        println!("🔍 Validating configuration from environment");
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            for warning in GatewayConfigValidator::warnings(&config) {
                println!("⚠️  {warning}");
            }
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Identity Provider: {}", config.identity.url);
            println!("   • Upstream Timeout: {}s", config.proxy.request_timeout_secs);
            println!("   • Services:");
            for service in &config.services {
                println!(
                    "       {} -> {} ({})",
                    service.path_prefix, service.base_url, service.name
                );
            }
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure all service URLs start with http:// or https://");
            println!("   • Set SUPABASE_URL and the identity provider keys");
            println!("   • Verify listen address format (e.g., '0.0.0.0:3000')");
            println!("   • Path prefixes and health paths must start with '/'");
            std::process::exit(1);
        }
    }
}

const STARTER_CONFIG: &str = r#"# TutorMatch API Gateway configuration
#
# Every value can also be set through the environment, e.g.
# GATEWAY__PROXY__REQUEST_TIMEOUT_SECS=20, or the deployment variables
# API_GATEWAY_PORT, USER_SERVICE_URL, CLASSROOM_SERVICE_URL, CHAT_SERVICE_URL,
# SUPABASE_URL, SUPABASE_ANON_KEY, SUPABASE_SERVICE_ROLE_KEY, FRONTEND_URL and
# CORS_ORIGIN.

listen_addr = "0.0.0.0:3000"
cors_origin = "*"

[proxy]
request_timeout_secs = 10
connect_timeout_secs = 10

[health_check]
timeout_secs = 5

[identity]
url = "https://your-project.supabase.co"
anon_key = ""
service_role_key = ""
timeout_secs = 5
# frontend_url = "http://localhost:5173"

[[services]]
name = "user-service"
base_url = "http://localhost:3001"
path_prefix = "/api/users"
description = "User accounts and profiles"

[[services]]
name = "classroom-service"
base_url = "http://localhost:3002"
path_prefix = "/api/classroom"
description = "Virtual classrooms, materials and video calls"

[[services]]
name = "chat-service"
base_url = "http://localhost:3003"
path_prefix = "/api/chat"
description = "Real-time chat"

# Role-gated prefix example
# [[route_policies]]
# path = "/api/users/admin/{*rest}"
# visibility = "protected"
# allowed_roles = ["admin"]
"#;

/// Write a starter configuration file
async fn init_config_command(output: &str) -> Result<()> {
    let path = Path::new(output);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{output}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, STARTER_CONFIG)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {output}");
    println!("   Run 'tutormatch-gateway serve --config {output}' to start the gateway");
    Ok(())
}
