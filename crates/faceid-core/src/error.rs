use thiserror::Error;

/// Error taxonomy for the identification engine.
///
/// `Configuration` and `UnsupportedModel` are fatal at activation time and
/// prevent the service from starting; the rest surface per inference call.
#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    #[error("no face detected")]
    NoFaceDetected,

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("embedding space mismatch: expected {expected}, got {actual}")]
    SpaceMismatch { expected: String, actual: String },

    #[error("model file not found: {0} — place checkpoints in the configured model directory")]
    ModelNotFound(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    #[error("ort: {0}")]
    Ort(#[from] ort::Error),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl IdentifyError {
    /// True for errors that must abort a whole frame rather than a single
    /// face: configuration-class failures and the enforce-detection signal.
    pub fn aborts_frame(&self) -> bool {
        matches!(
            self,
            IdentifyError::Configuration(_)
                | IdentifyError::UnsupportedModel(_)
                | IdentifyError::NoFaceDetected
        )
    }
}
