#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<image::ImageError> for EngineError {
    fn from(err: image::ImageError) -> Self {
        EngineError::ImageError(err.to_string())
    }
}

/// Why a frame produced no detections without being an error.
///
/// Per-frame conditions never abort a batch or live loop, so they are reported
/// next to the (empty) result instead of through `EngineError`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Completed,
    InvalidRoi,
    DegenerateMask,
}

impl DetectionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, DetectionStatus::Completed)
    }
}
