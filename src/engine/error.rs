use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::model::*;

/// The overlap that rejected a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationConflict {
    pub device_id: DeviceId,
    pub start_time: Timestamp,
    pub duration_minutes: i64,
    pub conflicts: Vec<Reservation>,
}

impl std::fmt::Display for ReservationConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "device {} already reserved at {} for {} minutes; conflicts with {} reservation(s)",
            self.device_id,
            self.start_time.to_rfc3339(),
            self.duration_minutes,
            self.conflicts.len()
        )
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid duration: {duration} minutes")]
    InvalidDuration { duration: i64 },
    #[error("{0}")]
    Conflict(Box<ReservationConflict>),
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("test directory error: {0}")]
    Directory(String),
    #[error("WAL error: {0}")]
    WalError(String),
}

/// Coarse classification for callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Conflict,
    NotFound,
    Internal,
}

/// `{message, details}` payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub details: Value,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDuration { .. }
            | EngineError::Validation(_)
            | EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Directory(_) | EngineError::WalError(_) => ErrorKind::Internal,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            EngineError::Conflict(c) => ErrorBody {
                message: "Device is already reserved during this time.".into(),
                details: json!({
                    "device_id": c.device_id,
                    "start_time": c.start_time.to_rfc3339(),
                    "duration": c.duration_minutes,
                    "conflicted_reservations": c
                        .conflicts
                        .iter()
                        .map(Reservation::to_record)
                        .collect::<Vec<_>>(),
                }),
            },
            EngineError::InvalidDuration { duration } => ErrorBody {
                message: "Invalid duration.".into(),
                details: json!({ "duration": duration }),
            },
            EngineError::NotFound(id) => ErrorBody {
                message: "Device reservation not found".into(),
                details: json!({ "reservation_id": id.to_string() }),
            },
            EngineError::Validation(msg) => ErrorBody {
                message: msg.clone(),
                details: json!({}),
            },
            EngineError::LimitExceeded(what) => ErrorBody {
                message: format!("limit exceeded: {what}"),
                details: json!({}),
            },
            // Storage internals stay out of the payload.
            EngineError::Directory(_) | EngineError::WalError(_) => ErrorBody {
                message: "Internal error.".into(),
                details: json!({}),
            },
        }
    }

    /// The conflicting set, if this is a conflict.
    pub fn conflicts(&self) -> Option<&[Reservation]> {
        match self {
            EngineError::Conflict(c) => Some(&c.conflicts),
            _ => None,
        }
    }
}
