//! Camera collaborator proxy.
//!
//! The camera is an external service on the bus; fetching a frame is the
//! only suspending step of an inference call and happens before the request
//! reaches the engine queue, so nothing inference-related is held while
//! waiting on device I/O.

use std::time::Duration;

use thiserror::Error;

const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("camera fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("camera bus error: {0}")]
    Bus(#[from] zbus::Error),
}

/// Proxy to one named camera service.
pub struct CameraClient {
    proxy: zbus::Proxy<'static>,
    name: String,
}

impl CameraClient {
    /// Connect to the camera service registered as
    /// `org.faceid.Camera.<camera_name>`.
    pub async fn connect(
        connection: &zbus::Connection,
        camera_name: &str,
    ) -> Result<Self, CameraError> {
        let proxy = zbus::Proxy::new(
            connection,
            format!("org.faceid.Camera.{camera_name}"),
            "/org/faceid/Camera",
            "org.faceid.Camera1",
        )
        .await?;

        tracing::info!(camera = camera_name, "camera proxy connected");
        Ok(Self {
            proxy,
            name: camera_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch one encoded frame (any raster format the decoder accepts).
    pub async fn fetch_frame(&self) -> Result<Vec<u8>, CameraError> {
        let call = self.proxy.call::<_, _, Vec<u8>>("GetImage", &());
        match tokio::time::timeout(FETCH_TIMEOUT, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CameraError::Timeout(FETCH_TIMEOUT)),
        }
    }
}
