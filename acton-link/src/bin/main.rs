//! acton-link service binary

use acton_link::prelude::*;
use acton_reactive::prelude::ActonApp;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "acton-link")]
#[command(version)]
#[command(about = "Link OAuth2 sign-ins to chat conversations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the callback and messaging endpoints
    Serve {
        /// Configuration file; XDG locations are searched when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print configured providers and their callback URLs
    Providers {
        /// Configuration file; XDG locations are searched when omitted
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<LinkConfig> {
    match path {
        Some(path) => {
            let path = path.to_str().context("configuration path is not valid UTF-8")?;
            LinkConfig::load_from(path)
        }
        None => LinkConfig::load_for_service("acton-link"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => serve(load_config(config.as_ref())?).await,
        Commands::Providers { config } => {
            let config = load_config(config.as_ref())?;
            for (name, provider) in &config.providers {
                println!(
                    "{name}\t{:?}\t{}",
                    provider.kind,
                    config.redirect_uri_for(name, provider)
                );
            }
            Ok(())
        }
    }
}

async fn serve(config: LinkConfig) -> Result<()> {
    let observability = ObservabilityConfig::new(config.service.name.clone());
    acton_link::observability::init(&observability)?;

    let providers = ProviderRegistry::from_config(&config).context("invalid provider configuration")?;
    if providers.is_empty() {
        tracing::warn!("No providers configured; sign-in commands will be rejected");
    }

    let mut runtime = ActonApp::launch();
    let state = LinkAppState::new(
        &mut runtime,
        config.clone(),
        providers,
        Arc::new(TracingConversationSink),
    )
    .await?;

    let listener = tokio::net::TcpListener::bind(&config.service.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.service.bind_address))?;
    tracing::info!(
        address = %config.service.bind_address,
        base_uri = %config.service.base_uri,
        "Listening"
    );

    axum::serve(listener, routes(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    state.stop_background_tasks();
    runtime.shutdown_all().await?;
    Ok(())
}
