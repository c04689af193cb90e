use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum CallRecordError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Call record not found: {0}")]
    NotFound(String),

    #[error("Call record {0} kept changing underneath the update")]
    Contention(String),

    #[error("Caller identity for {call_id} could not be resolved: {reason}")]
    IdentityResolution { call_id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CallRecordError {
    pub fn is_insert_conflict(&self) -> bool {
        matches!(self, CallRecordError::Storage(e) if e.is_conflict())
    }
}
