//! Error types for agri-market.

use agri_proto::{BookingId, EquipmentId, ProtoError, UserId};
use thiserror::Error;

/// Result alias for marketplace operations.
pub type MarketResult<T> = Result<T, MarketError>;

/// Errors that can occur in marketplace operations.
#[derive(Debug, Error)]
pub enum MarketError {
    /// Referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind, e.g. "booking".
        kind: &'static str,
        /// The missing identifier.
        id: String,
    },

    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The acting user may not perform this operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The requested dates overlap an active booking on the same unit.
    #[error("equipment {equipment_id} is already booked by {conflicting} for overlapping dates")]
    DoubleBooking {
        /// Equipment being booked.
        equipment_id: EquipmentId,
        /// The active booking holding the dates.
        conflicting: BookingId,
    },

    /// The requested dates fall in an owner-declared blackout.
    #[error("equipment {equipment_id} is unavailable: {reason}")]
    Unavailable {
        /// Equipment being booked.
        equipment_id: EquipmentId,
        /// Why the unit cannot be booked.
        reason: String,
    },

    /// The operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Invalid state machine transition.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// The reviewer already reviewed this booking.
    #[error("user {reviewer} already reviewed booking {booking_id}")]
    DuplicateReview {
        /// Booking under review.
        booking_id: BookingId,
        /// Author of the earlier review.
        reviewer: UserId,
    },

    /// A payout was released before its booking completed.
    #[error("payout for booking {booking_id} cannot be released while booking is {status}")]
    PayoutNotReleasable {
        /// The booking the payout belongs to.
        booking_id: BookingId,
        /// The booking's current status.
        status: String,
    },

    /// Snapshot storage failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] agri_persist::PersistError),
}

impl MarketError {
    /// Shorthand for [`MarketError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<ProtoError> for MarketError {
    fn from(e: ProtoError) -> Self {
        Self::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = MarketError::not_found("booking", "abc");
        assert_eq!(err.to_string(), "booking not found: abc");
    }

    #[test]
    fn proto_errors_become_validation() {
        let err = MarketError::from(ProtoError::InvalidBasisPoints(20_000));
        assert!(matches!(err, MarketError::Validation(_)));
    }

    #[test]
    fn transition_display() {
        let err = MarketError::InvalidStateTransition {
            from: "completed".to_string(),
            to: "confirmed".to_string(),
        };
        assert_eq!(err.to_string(), "invalid state transition: completed -> confirmed");
    }
}
