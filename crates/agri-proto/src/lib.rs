//! # agri-proto
//!
//! Identifiers and value types shared by every AgriRent crate: typed record
//! IDs, geographic points, inclusive date ranges and fixed-point money.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calendar;
pub mod error;
pub mod geo;
pub mod ids;
pub mod money;

pub use calendar::DateRange;
pub use error::ProtoError;
pub use geo::GeoPoint;
pub use ids::{
    BookingId, CategoryId, EquipmentId, NotificationId, PaymentId, PayoutId, ReviewId, TicketId,
    UserId,
};
pub use money::{Amount, BasisPoints, FeeSplit};
