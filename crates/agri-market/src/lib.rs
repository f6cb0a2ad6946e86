//! # agri-market
//!
//! Marketplace core for AgriRent, connecting smallholder farmers with
//! equipment operators.
//!
//! This crate provides:
//!
//! - User directory with farmer and operator profiles
//! - Equipment catalog with availability calendars and maintenance logs
//! - Proximity discovery
//! - Booking ledger that never double-books a unit
//! - Payment ledger driven by idempotent gateway callbacks
//! - Operator payouts net of the platform fee
//! - Two-way reviews and per-user notifications
//! - Support tickets worked by platform staff
//!
//! [`Marketplace`] ties the ledgers together and is the entry point for
//! every operation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod booking;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod marketplace;
pub mod notification;
pub mod payment;
pub mod payout;
pub mod review;
pub mod support;
pub mod users;

pub use booking::{Booking, BookingStatus, JobDetails, NewBooking, PaymentStatus, Quote};
pub use catalog::{
    Blackout, Equipment, EquipmentCategory, EquipmentFilter, EquipmentPatch, EquipmentStatus,
    FuelType, MaintenanceRecord, NewEquipment,
};
pub use config::MarketConfig;
pub use discovery::{SearchHit, SearchQuery};
pub use error::{MarketError, MarketResult};
pub use events::MarketEvent;
pub use marketplace::{DisputeResolution, MarketStats, Marketplace, PendingSnapshot};
pub use notification::{Channel, Notification};
pub use payment::{
    CallbackOutcome, GatewayCallback, Payment, PaymentKind, PaymentMethod, PaymentState,
};
pub use payout::{Payout, PayoutMethod, PayoutState};
pub use review::{NewReview, Review, ReviewDirection};
pub use support::{NewTicket, SupportTicket, TicketPriority, TicketStatus};
pub use users::{
    FarmerProfile, NewUser, OperatorDetails, OperatorProfile, Role, ServiceArea, User,
};
