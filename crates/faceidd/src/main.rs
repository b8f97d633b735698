use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use faceid_core::ServiceConfig;

mod camera;
mod engine;
mod service;

/// Configuration path: first CLI argument, then `FACEIDD_CONFIG`, then the
/// conventional system location.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("FACEIDD_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/faceid/config.json"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let path = config_path();
    tracing::info!(config = %path.display(), "faceidd starting");

    // Validation happens before any model loads; a bad enum value or a
    // missing camera name stops activation here.
    let config = ServiceConfig::load(&path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    let validated = config.validate().context("validating configuration")?;
    let camera_name = validated.camera_name.clone();

    let engine = engine::spawn_engine(validated).context("starting inference engine")?;

    let connection = zbus::Connection::session()
        .await
        .context("connecting to the bus")?;
    let camera = camera::CameraClient::connect(&connection, &camera_name)
        .await
        .context("connecting to the camera service")?;

    connection
        .object_server()
        .at(
            "/org/faceid/Identification1",
            service::IdentificationService::new(engine, camera),
        )
        .await
        .context("registering the identification interface")?;
    connection
        .request_name("org.faceid.Identification1")
        .await
        .context("acquiring the service bus name")?;

    tracing::info!("faceidd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("faceidd shutting down");

    Ok(())
}
