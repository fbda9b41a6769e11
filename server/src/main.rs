mod api;
mod config;

use std::sync::Arc;

use axum::Router;
use nfcctl_sim::{LoopbackChip, SimDevice};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub device: Arc<SimDevice>,
    /// Simulated controller behind the device, for fault injection
    pub chip: LoopbackChip,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let bench = nfcctl_sim::bench(config.driver_config());
        Self {
            config,
            device: bench.device,
            chip: bench.chip,
        }
    }
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", api::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "nfcctl_server=debug,nfcctl_driver=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();

    // Attach the simulated controller
    let state = Arc::new(AppState::new(config.clone()));
    tracing::info!(
        settle = ?state.device.config().settle_time,
        "simulated nfc controller attached"
    );

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!("nfcctl server listening on {}", config.bind_address);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
