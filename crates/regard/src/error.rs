//! Error taxonomy.
//!
//! Only structural failures surface as errors: inadequate training data and
//! corrupt model artefacts. Per-frame anomalies (blinks, low confidence,
//! velocity outliers, non-finite predictions) are absorbed silently and show
//! up in the aggregate counters instead.

/// Errors surfaced by the gaze analysis core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Too few usable calibration samples survived cleansing; the model is
    /// left unchanged and the calibration session transitions to `Failed`.
    #[error("insufficient calibration data: {got} usable samples, need {need}")]
    InsufficientCalibrationData { got: usize, need: usize },

    /// Non-finite values poisoned the training matrices.
    #[error("non-finite values encountered while training the gaze model")]
    NonFiniteTraining,

    /// A model artefact could not be parsed or failed validation; the model
    /// state is left exactly as before the import.
    #[error("invalid gaze model artefact: {0}")]
    ModelImportInvalid(String),

    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
