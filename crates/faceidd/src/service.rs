//! D-Bus vision interface for the face identification daemon.
//!
//! Bus name: org.faceid.Identification1
//! Object path: /org/faceid/Identification1
//!
//! Unsupported capabilities report NotSupported instead of silently
//! succeeding.

use std::path::Path;

use zbus::interface;

use faceid_core::{decode_image, IdentifyError, ServiceConfig};

use crate::camera::CameraClient;
use crate::engine::{EngineError, EngineHandle};

pub struct IdentificationService {
    engine: EngineHandle,
    camera: CameraClient,
}

impl IdentificationService {
    pub fn new(engine: EngineHandle, camera: CameraClient) -> Self {
        Self { engine, camera }
    }

    async fn infer_json(&self, image: &[u8]) -> zbus::fdo::Result<String> {
        let frame = decode_image(image).map_err(invalid_image)?;
        let detections = self.engine.infer(frame).await.map_err(engine_error)?;
        serde_json::to_string(&detections)
            .map_err(|e| zbus::fdo::Error::Failed(format!("serializing detections: {e}")))
    }
}

#[interface(name = "org.faceid.Identification1")]
impl IdentificationService {
    /// Identify faces in a caller-supplied encoded image. Returns a JSON
    /// array of detections.
    async fn get_detections(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::debug!(bytes = image.len(), "get_detections");
        self.infer_json(&image).await
    }

    /// Fetch a frame from the configured camera, then identify faces in it.
    async fn get_detections_from_camera(&self) -> zbus::fdo::Result<String> {
        tracing::debug!(camera = self.camera.name(), "get_detections_from_camera");
        let image = self
            .camera
            .fetch_frame()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(format!("camera fetch: {e}")))?;
        self.infer_json(&image).await
    }

    /// Classification is not part of this service's capability set.
    async fn get_classifications(&self, _image: Vec<u8>, _count: u32) -> zbus::fdo::Result<String> {
        Err(zbus::fdo::Error::NotSupported(
            "classification is not implemented by the face identification service".into(),
        ))
    }

    /// Point clouds are not part of this service's capability set.
    async fn get_object_point_clouds(&self, _camera_name: String) -> zbus::fdo::Result<String> {
        Err(zbus::fdo::Error::NotSupported(
            "point cloud objects are not implemented by the face identification service".into(),
        ))
    }

    /// Arbitrary commands are not part of this service's capability set.
    async fn do_command(&self, _command: String) -> zbus::fdo::Result<String> {
        Err(zbus::fdo::Error::NotSupported(
            "do_command is not implemented by the face identification service".into(),
        ))
    }

    /// Load, validate and apply a new configuration file. The gallery is
    /// rebuilt before the swap; on failure the previous state keeps
    /// serving. Returns the number of gallery labels.
    async fn reconfigure(&self, config_path: String) -> zbus::fdo::Result<u32> {
        tracing::info!(path = %config_path, "reconfigure requested");
        let validated = ServiceConfig::load(Path::new(&config_path))
            .and_then(|config| config.validate())
            .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        let labels = self
            .engine
            .reconfigure(validated)
            .await
            .map_err(engine_error)?;
        Ok(labels as u32)
    }

    /// Daemon status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(engine_error)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "camera": status.camera_name,
            "detector_backend": status.detector_backend,
            "encoder_model": status.encoder_model,
            "distance_metric": status.distance_metric,
            "gallery_labels": status.gallery_labels,
        })
        .to_string())
    }
}

fn invalid_image(e: IdentifyError) -> zbus::fdo::Error {
    zbus::fdo::Error::InvalidArgs(e.to_string())
}

fn engine_error(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Identify(IdentifyError::NoFaceDetected) => {
            zbus::fdo::Error::Failed("no face detected".into())
        }
        EngineError::Identify(IdentifyError::InvalidImage(msg)) => {
            zbus::fdo::Error::InvalidArgs(format!("invalid image: {msg}"))
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}
