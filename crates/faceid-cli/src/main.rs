use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use zbus::proxy;

use faceid_core::ServiceConfig;

#[proxy(
    interface = "org.faceid.Identification1",
    default_service = "org.faceid.Identification1",
    default_path = "/org/faceid/Identification1"
)]
trait Identification {
    async fn get_detections(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn get_detections_from_camera(&self) -> zbus::Result<String>;
    async fn reconfigure(&self, config_path: String) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "faceid", about = "Face identification service CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Identify faces in an image file
    Detect {
        /// Path to the image
        image: PathBuf,
    },
    /// Identify faces in a frame fetched from the configured camera
    Camera,
    /// Validate a configuration file without touching the daemon
    Check {
        /// Path to the JSON configuration
        config: PathBuf,
    },
    /// Apply a configuration file to the running daemon
    Reconfigure {
        /// Path to the JSON configuration
        config: PathBuf,
    },
    /// Show daemon status
    Status,
}

async fn connect() -> Result<IdentificationProxy<'static>> {
    let connection = zbus::Connection::session()
        .await
        .context("connecting to the bus")?;
    IdentificationProxy::new(&connection)
        .await
        .context("connecting to faceidd — is the daemon running?")
}

fn print_detections(json: &str) -> Result<()> {
    let detections: serde_json::Value = serde_json::from_str(json)?;
    println!("{}", serde_json::to_string_pretty(&detections)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Detect { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("reading {}", image.display()))?;
            let proxy = connect().await?;
            let json = proxy.get_detections(bytes).await?;
            print_detections(&json)?;
        }
        Commands::Camera => {
            let proxy = connect().await?;
            let json = proxy.get_detections_from_camera().await?;
            print_detections(&json)?;
        }
        Commands::Check { config } => {
            let loaded = ServiceConfig::load(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let validated = loaded.validate()?;
            println!(
                "ok: camera '{}', backend '{}', encoder '{}', {} label(s)",
                validated.camera_name,
                validated.identifier.detector_backend,
                validated.identifier.encoder_model,
                validated.labels.len()
            );
        }
        Commands::Reconfigure { config } => {
            let absolute = std::fs::canonicalize(&config)
                .with_context(|| format!("resolving {}", config.display()))?;
            let proxy = connect().await?;
            let labels = proxy
                .reconfigure(absolute.to_string_lossy().into_owned())
                .await?;
            println!("reconfigured: {labels} gallery label(s)");
        }
        Commands::Status => {
            let proxy = connect().await?;
            let status: serde_json::Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
