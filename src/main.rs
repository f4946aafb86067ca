use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use preview_server::{
    adapters::{ControlChannel, control_api},
    config::{PreviewConfig, PreviewConfigValidator, load_config, load_config_or_default},
    core::{ServerManager, StaticServerProvider},
    ports::server_control::ServerControl,
    tracing_setup,
    utils::GracefulShutdown,
};
use tokio::net::TcpListener;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "preview.toml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "preview.toml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "preview.toml")]
        config: String,
    },
    /// Serve folders until interrupted (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "preview.toml")]
        config: String,
        /// Folders to serve in addition to the configured roots
        roots: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config, roots }) => serve(&config, roots).await,
        None => serve(&args.config, Vec::new()).await,
    }
}

async fn serve(config_path: &str, extra_roots: Vec<String>) -> Result<()> {
    let config = load_config_or_default(config_path)
        .await?
        .into_builder()
        .roots(extra_roots)
        .build();

    PreviewConfigValidator::validate(&config)
        .map_err(|e| eyre!("Invalid configuration in {}: {}", config_path, e))?;

    tracing_setup::init_from_config(&config.logging)?;

    let manager = Arc::new(ServerManager::from_config(&config));
    let control = ControlChannel::spawn(manager.clone(), config.control.command_buffer);

    for root in &config.roots {
        match control.get_server(root).await {
            Ok(info) => tracing::info!("Serving {} at {}", root, info.base_url()),
            Err(e) => tracing::error!("Failed to serve {}: {}", root, e),
        }
    }

    let provider = StaticServerProvider::from_config(Arc::new(control.clone()), &config.project)
        .wrap_err("Failed to set project root")?;
    if provider.project_root().is_some() {
        let info = provider
            .ready_to_serve()
            .await
            .wrap_err("Failed to start the project server")?;
        tracing::info!("Project preview available at {}", info.base_url());
    }

    let shutdown = Arc::new(GracefulShutdown::new());

    let control_api_task = match &config.control.listen_addr {
        Some(addr) => Some(spawn_control_api(addr, &control, &shutdown).await?),
        None => None,
    };

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.run_signal_handler().await });
    }

    let reason = shutdown.wait_for_shutdown_signal().await;
    tracing::info!("Shutting down ({:?})", reason);

    control.disconnect();
    if let Some(task) = control_api_task {
        if let Err(e) = task.await {
            tracing::warn!("Control API task ended abnormally: {}", e);
        }
    }

    let closed = manager.close_all().await;
    tracing::info!("Closed {} server(s), bye", closed);
    Ok(())
}

async fn spawn_control_api(
    addr: &str,
    control: &preview_server::adapters::ControlHandle,
    shutdown: &GracefulShutdown,
) -> Result<tokio::task::JoinHandle<()>> {
    let addr: SocketAddr = addr
        .parse()
        .wrap_err_with(|| format!("Invalid control address: {addr}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind control API on {addr}"))?;
    tracing::info!("Control API listening on http://{}", addr);

    let app = control_api::router(Arc::new(control.clone()));
    let mut shutdown_rx = shutdown.subscribe();
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await;
        if let Err(e) = result {
            tracing::error!("Control API stopped with error: {}", e);
        }
    }))
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config: PreviewConfig = match load_config(config_path).await {
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

    match PreviewConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Bind Address: {}", config.bind_address);
            println!("   • Roots: {}", config.roots.len());
            println!("   • Interception Timeout: {}", config.interception.timeout());
            println!(
                "   • Project Root: {}",
                config.project.root.as_deref().unwrap_or("(none)")
            );
            println!(
                "   • Control API: {}",
                config.control.listen_addr.as_deref().unwrap_or("(disabled)")
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
            println!("   • Use a bare IP for bind_address (e.g., '127.0.0.1')");
            println!("   • Check that every root folder exists");
            println!("   • Write preview extensions without the leading dot");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Preview server configuration

# Every static server binds an ephemeral port on this address
bind_address = "127.0.0.1"

# Folders to serve at startup
roots = []

[interception]
# How long a filtered request waits for a subscriber (0 disables the timeout)
timeout_ms = 5000

[server]
drain_timeout_ms = 5000
append_index_html = true

[project]
# root = "./site"
preview_extensions = ["htm", "html"]

[control]
# listen_addr = "127.0.0.1:7070"
command_buffer = 64

[logging]
level = "info"
json = false
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'preview-server serve --config {config_path}' to start serving");
    Ok(())
}
