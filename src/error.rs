use thiserror::Error;

use crate::engine::Registration;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid RUN in scanned payload")]
    InvalidIdentity,
    #[error("attendance record not found")]
    RecordNotFound,
    #[error("student not found")]
    StudentNotFound,
    #[error("guardian name is required")]
    MissingGuardianName,
    #[error("invalid phone number: {0}")]
    InvalidPhone(String),
    #[error("record is already justified")]
    AlreadyJustified,
    #[error("no contact data was given")]
    NothingToUpdate,
    #[error("backend call failed: {0}")]
    Backend(#[from] StoreError),
    /// The primary write is committed; a secondary write failed afterwards.
    #[error("registration saved but log write failed: {source}")]
    PartialFailure {
        committed: Box<Registration>,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidIdentity => "invalid_identity",
            EngineError::RecordNotFound => "record_not_found",
            EngineError::StudentNotFound => "student_not_found",
            EngineError::MissingGuardianName => "missing_guardian_name",
            EngineError::InvalidPhone(_) => "invalid_phone",
            EngineError::AlreadyJustified => "already_justified",
            EngineError::NothingToUpdate => "nothing_to_update",
            EngineError::Backend(_) => "backend_failure",
            EngineError::PartialFailure { .. } => "partial_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
