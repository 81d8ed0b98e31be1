// src/error.rs
use std::fmt;

/// Error kinds surfaced by the fund core. The API layer is responsible for
/// translating these into HTTP statuses; this crate only carries the raw
/// kind plus a short message.
#[derive(Debug)]
pub enum FundError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    InsufficientUnits { requested: String, available: String },
    NotReversible(String),
    StaleConfirmation,
    PreconditionFailed(String),
    Busy,
    Storage(String),
    Corrupted(String),
    Internal(String),
}

impl fmt::Display for FundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::InsufficientUnits {
                requested,
                available,
            } => write!(
                f,
                "insufficient units: requested {requested}, available {available}"
            ),
            Self::NotReversible(msg) => write!(f, "not reversible: {msg}"),
            Self::StaleConfirmation => write!(f, "stale confirmation token"),
            Self::PreconditionFailed(msg) => write!(f, "precondition failed: {msg}"),
            Self::Busy => write!(f, "write lock busy"),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
            Self::Corrupted(msg) => write!(f, "corrupted archive: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for FundError {}

impl From<sqlx::Error> for FundError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Conflict(db_err.to_string())
            }
            _ => Self::Storage(err.to_string()),
        }
    }
}
