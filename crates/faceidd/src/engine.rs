//! The inference engine thread.
//!
//! One dedicated OS thread owns the loaded pipeline and the gallery; D-Bus
//! handlers talk to it over a bounded request queue with oneshot replies.
//! The queue serializes inference, so no model lock ever exists to hold
//! across a suspension point. Reconfiguration builds the complete new
//! (config, pipeline, gallery) in isolation and only then swaps it in — a
//! request never observes a partially rebuilt gallery.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use faceid_core::{
    build_gallery, Detection, Gallery, IdentificationPipeline, IdentifyError, ValidatedConfig,
};
use image::RgbImage;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Identify(#[from] IdentifyError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot reported by `Status`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStatus {
    pub camera_name: String,
    pub detector_backend: String,
    pub encoder_model: String,
    pub distance_metric: String,
    pub gallery_labels: usize,
}

enum EngineRequest {
    Infer {
        frame: RgbImage,
        reply: oneshot::Sender<Result<Vec<Detection>, EngineError>>,
    },
    Reconfigure {
        config: Box<ValidatedConfig>,
        reply: oneshot::Sender<Result<usize, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Identify every face in a frame against the current gallery.
    pub async fn infer(&self, frame: RgbImage) -> Result<Vec<Detection>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Infer {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Rebuild pipeline and gallery from a validated configuration and swap
    /// them in atomically. Returns the number of gallery labels.
    pub async fn reconfigure(&self, config: ValidatedConfig) -> Result<usize, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Reconfigure {
                config: Box::new(config),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }
}

/// Loaded pipeline plus its gallery, built together and replaced together.
struct EngineState {
    pipeline: IdentificationPipeline,
    gallery: Gallery,
    config: ValidatedConfig,
}

impl EngineState {
    /// Load every model and synchronously build the whole gallery.
    /// Fails fast: the engine never activates half-loaded.
    fn build(config: ValidatedConfig) -> Result<Self, EngineError> {
        let mut pipeline =
            IdentificationPipeline::load(config.identifier, &config.model_dir)?;
        let gallery = build_gallery(&config.labels, &mut pipeline)?;
        tracing::info!(
            labels = gallery.len(),
            backend = %config.identifier.detector_backend,
            encoder = %config.identifier.encoder_model,
            "gallery built"
        );
        Ok(Self {
            pipeline,
            gallery,
            config,
        })
    }

    fn status(&self) -> EngineStatus {
        EngineStatus {
            camera_name: self.config.camera_name.clone(),
            detector_backend: self.config.identifier.detector_backend.to_string(),
            encoder_model: self.config.identifier.encoder_model.to_string(),
            distance_metric: self.config.identifier.distance_metric.to_string(),
            gallery_labels: self.gallery.len(),
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Model loading and the initial gallery build happen before this returns,
/// so a misconfigured service fails at activation, not on first call.
pub fn spawn_engine(config: ValidatedConfig) -> Result<EngineHandle, EngineError> {
    let mut state = EngineState::build(config)?;

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceid-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(request) = rx.blocking_recv() {
                match request {
                    EngineRequest::Infer { frame, reply } => {
                        let result = state
                            .pipeline
                            .infer(&frame, &state.gallery)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Reconfigure { config, reply } => {
                        // Build the replacement fully before touching the
                        // live state; on failure the old snapshot keeps
                        // serving.
                        match EngineState::build(*config) {
                            Ok(new_state) => {
                                state = new_state;
                                let _ = reply.send(Ok(state.gallery.len()));
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "reconfiguration failed; keeping previous state");
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(state.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
