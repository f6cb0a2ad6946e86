//! Strongly typed identifiers for marketplace records.
//!
//! Every record kind gets its own UUID newtype so a booking ID can never be
//! passed where an equipment ID is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::ProtoError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an identifier from its string form.
            ///
            /// # Errors
            ///
            /// Returns an error if the string is not a valid UUID.
            pub fn parse(s: &str) -> Result<Self, ProtoError> {
                Uuid::parse_str(s).map(Self).map_err(|_| ProtoError::InvalidId {
                    kind: $kind,
                    value: s.to_string(),
                })
            }

            /// Get the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique identifier for a platform user (farmer, operator or admin).
    UserId,
    "user"
);
define_id!(
    /// Unique identifier for an equipment category.
    CategoryId,
    "category"
);
define_id!(
    /// Unique identifier for a listed equipment unit.
    EquipmentId,
    "equipment"
);
define_id!(
    /// Unique identifier for a rental booking.
    BookingId,
    "booking"
);
define_id!(
    /// Unique identifier for an inbound payment.
    PaymentId,
    "payment"
);
define_id!(
    /// Unique identifier for an operator payout.
    PayoutId,
    "payout"
);
define_id!(
    /// Unique identifier for a review.
    ReviewId,
    "review"
);
define_id!(
    /// Unique identifier for a notification.
    NotificationId,
    "notification"
);
define_id!(
    /// Unique identifier for a support ticket.
    TicketId,
    "ticket"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(BookingId::new(), BookingId::new());
    }

    #[test]
    fn parse_roundtrips_display() {
        let id = EquipmentId::new();
        let parsed = EquipmentId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = UserId::parse("not-a-uuid").unwrap_err();
        assert_eq!(err.to_string(), "invalid user ID: not-a-uuid");
    }

    #[test]
    fn serializes_transparently() {
        let uuid = Uuid::new_v4();
        let id = PaymentId::from(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }
}
