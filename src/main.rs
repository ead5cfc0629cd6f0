use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use a3s_killfeed::feed::ws::WsConnector;
use a3s_killfeed::provider::discord::DiscordSink;
use a3s_killfeed::provider::http::HttpDetailProvider;
use a3s_killfeed::provider::log::LogSink;
use a3s_killfeed::provider::NotificationSink;
use a3s_killfeed::{KillfeedService, Settings};

/// A3S Killfeed - real-time killmail filter and notifier
#[derive(Debug, Parser)]
#[command(name = "a3s-killfeed", version, about)]
struct Cli {
    /// Path to the JSON settings file
    #[arg(long, env = "KILLFEED_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Process the feed but log notifications instead of posting them
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&settings.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    tracing::debug!(
        path = %cli.config.display(),
        feed = %settings.feed.url,
        map_api = %settings.map_api.slug,
        "Settings loaded"
    );

    let provider = Arc::new(HttpDetailProvider::from_settings(&settings)?);
    let sink: Arc<dyn NotificationSink> = if cli.dry_run {
        tracing::info!("Dry run: notifications are logged, not posted");
        Arc::new(LogSink::new())
    } else {
        Arc::new(DiscordSink::new(settings.request_timeout())?)
    };
    let connector = Arc::new(WsConnector::new(settings.feed.url.clone()));

    let service = KillfeedService::new(settings, provider, sink, connector);
    let cancel = service.cancellation_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Shutdown signal received");
        cancel.cancel();
    });

    tracing::info!(config = %cli.config.display(), "Started killfeed");
    service.run().await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
