use thiserror::Error;
use uuid::Uuid;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("No timezone configured for practice {0}")]
    MissingTimezone(Uuid),

    #[error("Availability window not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(#[from] AppError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AvailabilityError {
    /// Configuration problems are fatal for the operation and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(self, AvailabilityError::InvalidTimezone(_) | AvailabilityError::MissingTimezone(_))
    }
}
