use anyhow::Result;
use kube::Client;
use lb_cloud::init_cloud_provider;
use lb_controller::{Controller, ControllerConfig, ControllerMetrics};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod metrics_server;

const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var(LOG_FORMAT_ENV).is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting service-controller...");

    let config = ControllerConfig::load()?;
    info!(
        provider = %config.cloud_provider,
        workers = config.workers,
        "Configuration loaded"
    );

    let cloud = init_cloud_provider(&config.cloud_provider)?;
    let metrics = ControllerMetrics::new()?;

    let metrics_addr = config.metrics_socket_addr()?;
    let server_metrics = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics_server::serve(metrics_addr, server_metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = Client::try_default().await?;
    let controller = Controller::new(client, Some(cloud), &config, metrics)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received");
    };
    controller.run(shutdown, config.workers).await?;

    info!("service-controller stopped");
    Ok(())
}
