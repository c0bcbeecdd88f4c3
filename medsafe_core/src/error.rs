//! Error types for the medsafe_core library.

use serde::{Deserialize, Serialize};
use std::io;
use uuid::Uuid;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Why an add or update was refused outright.
///
/// These are integrity/safety violations: each one is audited before the
/// error reaches the caller.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    MissingName,
    MissingDosage,
    MaliciousInput,
    NonNumericDosage,
    DosageOutOfRange,
    InvalidName,
    InvalidFrequency,
    DuplicateMedication,
}

impl RejectionKind {
    /// Security violations are audited separately from plain validation failures
    pub fn is_security_violation(self) -> bool {
        matches!(self, RejectionKind::MaliciousInput)
    }
}

/// Core error type for medsafe_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Regulatory catalog validation error
    #[error("Catalog validation error: {0}")]
    CatalogValidation(String),

    /// Input could not be parsed at all
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Medication data refused by validation
    #[error("Rejected ({kind:?}): {reason}")]
    Rejected { kind: RejectionKind, reason: String },

    /// No medication with the given id
    #[error("Medication not found: {0}")]
    NotFound(Uuid),

    /// Operation not allowed in the record's current state
    #[error("State error: {0}")]
    State(String),

    /// External interaction service failure
    #[error("Interaction service error: {0}")]
    InteractionService(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn rejected(kind: RejectionKind, reason: impl Into<String>) -> Self {
        Error::Rejected {
            kind,
            reason: reason.into(),
        }
    }

    /// The rejection kind, if this error is a validation rejection
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Error::Rejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
