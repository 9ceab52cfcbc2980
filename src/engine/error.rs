use ulid::Ulid;

use crate::model::{InvalidTime, InvalidWeekday};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: bad time format, end <= start, missing required field.
    Validation(&'static str),
    /// Overlapping interval or duplicate pending appointment. Retryable with
    /// different input.
    Conflict(Ulid),
    /// Ownership mismatch. Never retried.
    Authorization(Ulid),
    NotFound(Ulid),
    /// Slot full at acceptance or move time. Expected under concurrency —
    /// callers should treat it as "try another slot".
    SlotFull(Ulid),
    LimitExceeded(&'static str),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict(id) => write!(f, "conflict with: {id}"),
            EngineError::Authorization(id) => write!(f, "not authorized for: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::SlotFull(id) => write!(f, "slot full: {id}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<InvalidTime> for EngineError {
    fn from(_: InvalidTime) -> Self {
        EngineError::Validation("time must be HH:MM (00:00-23:59)")
    }
}

impl From<InvalidWeekday> for EngineError {
    fn from(_: InvalidWeekday) -> Self {
        EngineError::Validation("weekday must be monday..friday")
    }
}
