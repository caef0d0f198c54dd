use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

/// Domain error taxonomy. Every branch of the booking lifecycle is a
/// first-class return value; only `WalError` is infrastructure.
#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidDates(&'static str),
    RoomInactive(Ulid),
    CapacityExceeded { requested: u32, capacity: u32 },
    NightsOutOfRange { nights: i64, min: u32, max: u32 },
    PropertyClosed(NaiveDate),
    RoomUnavailable,
    IllegalTransition { from: BookingStatus, action: &'static str },
    CancellationNotAllowed(&'static str),
    /// Optimistic-concurrency loss: the entity moved under the caller.
    Conflict(Ulid),
    InvalidInput(&'static str),
    WalError(String),
}

impl EngineError {
    /// Distinguishes "the request is invalid" from "the system is
    /// unavailable" so callers can pick a retry strategy.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::WalError(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidDates(msg) => write!(f, "invalid dates: {msg}"),
            EngineError::RoomInactive(id) => write!(f, "room {id} is not active"),
            EngineError::CapacityExceeded { requested, capacity } => {
                write!(f, "{requested} guests exceed room capacity {capacity}")
            }
            EngineError::NightsOutOfRange { nights, min, max } => {
                write!(f, "{nights} nights outside allowed range [{min}, {max}]")
            }
            EngineError::PropertyClosed(date) => {
                write!(f, "property is closed on {date}")
            }
            EngineError::RoomUnavailable => write!(f, "room unavailable for requested dates"),
            EngineError::IllegalTransition { from, action } => {
                write!(f, "cannot {action} a booking in status {from}")
            }
            EngineError::CancellationNotAllowed(msg) => {
                write!(f, "cancellation not allowed: {msg}")
            }
            EngineError::Conflict(id) => write!(f, "concurrent update conflict on {id}"),
            EngineError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
