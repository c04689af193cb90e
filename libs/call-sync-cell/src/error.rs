use thiserror::Error;

use call_record_cell::CallRecordError;

#[derive(Error, Debug)]
pub enum CallSyncError {
    #[error("Telephony provider is not configured")]
    NotConfigured,

    #[error("Telephony provider returned HTTP {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Call {0} carries no practice id in its metadata")]
    MissingPractice(String),

    #[error("Invalid call payload: {0}")]
    InvalidPayload(String),

    #[error("Call cache error: {0}")]
    Cache(#[from] CallRecordError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CallSyncError {
    /// Retrying the same call will fail the same way.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            CallSyncError::NotConfigured
                | CallSyncError::MissingPractice(_)
                | CallSyncError::InvalidPayload(_)
                | CallSyncError::Cache(CallRecordError::Validation(_))
        )
    }
}
