use anyhow::Context;
use mt5_fleet::{FleetConfig, FleetManager};
use mt5_fleet_server::config::ServerConfig;
use mt5_fleet_server::{create_app, AppState};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mt5_fleet=debug")),
        )
        .init();

    let server_config = ServerConfig::from_env();
    let fleet_config = FleetConfig::from_env();
    info!(image = %fleet_config.image, network = %fleet_config.network, "Fleet configuration loaded");

    let fleet = FleetManager::connect(fleet_config)
        .await
        .context("Docker daemon is not reachable")?;
    let http = mt5_api_client::build_http_client(server_config.api_timeout)?;

    let state = AppState {
        fleet,
        http,
        api_host: server_config.api_host.clone(),
    };
    let app = create_app(state);

    let addr = server_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("MT5 fleet server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
