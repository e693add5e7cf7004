use thiserror::Error;

pub type Result<T> = std::result::Result<T, PitError>;

#[derive(Error, Debug)]
pub enum PitError {
    #[error("unknown track: {track}")]
    InvalidTrack { track: String },
    #[error("unknown tire compound: {compound} (expected SOFT, MEDIUM or HARD)")]
    InvalidCompound { compound: String },
    #[error("invalid {field} = {value}: {reason}")]
    Validation {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("insufficient training data for {track}: {reason}")]
    InsufficientData { track: String, reason: String },
    #[error("no trained model for {track} and heuristic fallback is disabled")]
    UntrainedModel { track: String },
    #[error("feature schema mismatch: expected {expected}, model has {found}")]
    SchemaMismatch { expected: String, found: String },
    #[error("regression fit failed: {0}")]
    Regression(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PitError {
    pub(crate) fn validation(
        field: &'static str,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        PitError::Validation {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
