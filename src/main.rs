use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use ugjb_gateway::{
    GatewayService, HttpClient, HttpClientAdapter, HttpHandler,
    config::{GatewayConfig, ServerConfigValidator, load_config},
    metrics, tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

const SAMPLE_CONFIG: &str = include_str!("../gateway.toml");

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "gateway.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        #[clap(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Write a sample configuration file
    Init {
        #[clap(short, long, default_value = "gateway.toml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        #[clap(short, long, default_value = "gateway.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve(&config).await,
        None => serve(&args.config).await,
    }
}

async fn serve(config_path: &str) -> Result<()> {
    let config: GatewayConfig = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;
    tracing::info!("Loaded configuration from {config_path}");

    ServerConfigValidator::validate(&config).context("Invalid gateway configuration")?;
    for warning in ServerConfigValidator::warnings(&config) {
        tracing::warn!("Configuration warning: {}", warning);
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was probably installed already; continuing.",
            e
        );
    }

    let metrics_handle = if config.metrics.enabled {
        let handle =
            metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;
        let upkeep = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            loop {
                interval.tick().await;
                upkeep.run_upkeep();
            }
        });
        Some(handle)
    } else {
        None
    };

    let config = Arc::new(config);
    let http_client: Arc<dyn HttpClient> = Arc::new(
        HttpClientAdapter::new(&config.client).context("Failed to create HTTP client adapter")?,
    );
    let gateway = Arc::new(GatewayService::new(&config, http_client));
    let mut handler = HttpHandler::new(gateway, config.clone());
    if let Some(handle) = metrics_handle {
        handler = handler.with_metrics(handle);
    }
    let app = handler.router();

    let addr: SocketAddr = config
        .listen_addr
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    tracing::info!(
        listen_addr = %addr,
        routes = config.routes.len(),
        metrics_path = ?config.metrics.enabled.then_some(config.metrics.path.as_str()),
        fallback = ?config.fallback.as_ref().map(|f| f.service.as_str()),
        "UGJB API Gateway listening"
    );

    let server_shutdown = graceful_shutdown.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let reason = server_shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}, draining connections", reason);
        })
        .await
    });

    tokio::select! {
        result = &mut server => {
            return result.context("Server task panicked")?.context("Server error");
        }
        _ = graceful_shutdown.wait_for_shutdown_signal() => {}
    }

    match tokio::time::timeout(config.shutdown_timeout, server).await {
        Ok(result) => {
            result.context("Server task panicked")?.context("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        Err(_) => {
            tracing::warn!(
                "Connections still open after {:?}, forcing shutdown",
                config.shutdown_timeout
            );
        }
    }
    Ok(())
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            let warnings = ServerConfigValidator::warnings(&config);
            if !warnings.is_empty() {
                println!();
                println!("⚠️  Warnings:");
                for warning in &warnings {
                    println!("   • {warning}");
                }
            }
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr);
            println!("   • Default Timeout: {:?}", config.default_timeout);
            println!("   • Internal Services: {}", config.services.len());
            println!("   • External Services: {}", config.external_services.len());
            println!("   • Routes: {}", config.routes.len());
            println!(
                "   • Fallback: {}",
                config
                    .fallback
                    .as_ref()
                    .map_or("none", |f| f.service.as_str())
            );
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Route paths and targets must start with '/'");
            println!("   • Each method + path pair may only be declared once");
            println!("   • Verify listen address format (e.g., '127.0.0.1:8080')");
            println!("   • Durations use humantime units (e.g., '30s', '2m')");
            std::process::exit(1);
        }
    }
}

/// Write the sample configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    tokio::fs::write(path, SAMPLE_CONFIG)
        .await
        .context("Failed to write config file")?;

    println!("✅ Created sample configuration at: {config_path}");
    println!("   Run 'ugjb-gateway serve --config {config_path}' to start the gateway");
    Ok(())
}
