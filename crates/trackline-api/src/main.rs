use std::time::Duration;

use trackline_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let app = trackline_api::setup::initialize_app(&config).await?;

    // Connects in the background; uploads are buffered until the broker is reachable.
    let supervisor = app.pipeline.start();

    let served = trackline_api::setup::server::start_server(&config, app.router).await;

    app.pipeline
        .shutdown(Duration::from_secs(config.shutdown_grace_secs()))
        .await;
    match supervisor.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Broker supervisor stopped with an error"),
        Err(e) => tracing::error!(error = %e, "Broker supervisor task panicked"),
        Ok(Ok(())) => {}
    }
    trackline_infra::shutdown_telemetry().await;

    served
}
