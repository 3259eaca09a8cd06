use ulid::Ulid;

use crate::clock::ClockError;
use crate::model::{Slot, SlotSpan};

#[derive(Debug)]
pub enum EngineError {
    OutOfWindow { slot: Slot, open: Slot, close: Slot },
    InvalidDuration(String),
    /// Overlaps the given committed reservation.
    Conflict { with: Ulid, span: SlotSpan },
    NotFound(Ulid),
    /// Requester does not own the reservation.
    Forbidden(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::OutOfWindow { slot, open, close } => {
                write!(f, "slot {slot} outside operating window [{open}, {close})")
            }
            EngineError::InvalidDuration(d) => write!(f, "invalid duration: {d}"),
            EngineError::Conflict { with, span } => write!(
                f,
                "slot no longer available: [{}, {}) overlaps reservation {with}",
                span.start, span.end
            ),
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => {
                write!(f, "reservation {id} belongs to another user")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ClockError> for EngineError {
    fn from(e: ClockError) -> Self {
        match e {
            ClockError::OutOfWindow { slot, open, close } => {
                EngineError::OutOfWindow { slot, open, close }
            }
            ClockError::InvalidDuration(d) => EngineError::InvalidDuration(d),
            ClockError::InvalidWindow { open, close } => {
                EngineError::OutOfWindow { slot: open, open, close }
            }
        }
    }
}
