//! Marketplace events for live subscribers.

use agri_proto::{
    Amount, BookingId, EquipmentId, PaymentId, PayoutId, ReviewId, TicketId, UserId,
};
use serde::{Deserialize, Serialize};

use crate::booking::BookingStatus;
use crate::catalog::EquipmentStatus;
use crate::payment::{PaymentKind, PaymentState};
use crate::payout::PayoutState;
use crate::support::{TicketPriority, TicketStatus};

/// Something observable happened in the marketplace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum MarketEvent {
    /// A user registered.
    UserRegistered {
        /// New user.
        user_id: UserId,
    },

    /// An operator listed equipment.
    EquipmentListed {
        /// New listing.
        equipment_id: EquipmentId,
        /// Owner.
        owner: UserId,
    },

    /// A listing's status changed.
    EquipmentStatusChanged {
        /// Listing.
        equipment_id: EquipmentId,
        /// New status.
        status: EquipmentStatus,
    },

    /// A listing was removed.
    EquipmentRemoved {
        /// Listing.
        equipment_id: EquipmentId,
    },

    /// A farmer requested a booking.
    BookingRequested {
        /// New booking.
        booking_id: BookingId,
        /// Equipment requested.
        equipment_id: EquipmentId,
        /// Quoted total.
        total: Amount,
    },

    /// A booking moved to a new status.
    BookingStatusChanged {
        /// Booking.
        booking_id: BookingId,
        /// Previous status.
        from: BookingStatus,
        /// New status.
        to: BookingStatus,
    },

    /// A payment was created or settled.
    PaymentUpdated {
        /// Payment.
        payment_id: PaymentId,
        /// Booking paid for.
        booking_id: BookingId,
        /// Purpose.
        kind: PaymentKind,
        /// Current state.
        state: PaymentState,
        /// Amount.
        amount: Amount,
    },

    /// A payout was created or moved.
    PayoutUpdated {
        /// Payout.
        payout_id: PayoutId,
        /// Booking earned on.
        booking_id: BookingId,
        /// Current state.
        state: PayoutState,
        /// Amount the operator receives.
        net: Amount,
    },

    /// A review was submitted.
    ReviewSubmitted {
        /// Review.
        review_id: ReviewId,
        /// Booking reviewed.
        booking_id: BookingId,
        /// Subject of the review.
        reviewee: UserId,
        /// Overall score.
        rating: u8,
    },

    /// A user raised a support ticket.
    TicketOpened {
        /// Ticket.
        ticket_id: TicketId,
        /// Booking it concerns.
        booking_id: Option<BookingId>,
        /// Urgency.
        priority: TicketPriority,
    },

    /// A support ticket was assigned or changed status.
    TicketUpdated {
        /// Ticket.
        ticket_id: TicketId,
        /// Current status.
        status: TicketStatus,
        /// Staff member working it.
        assigned_to: Option<UserId>,
    },
}

impl MarketEvent {
    /// Short event name, used as the SSE event field.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::UserRegistered { .. } => "user_registered",
            Self::EquipmentListed { .. } => "equipment_listed",
            Self::EquipmentStatusChanged { .. } => "equipment_status_changed",
            Self::EquipmentRemoved { .. } => "equipment_removed",
            Self::BookingRequested { .. } => "booking_requested",
            Self::BookingStatusChanged { .. } => "booking_status_changed",
            Self::PaymentUpdated { .. } => "payment_updated",
            Self::PayoutUpdated { .. } => "payout_updated",
            Self::ReviewSubmitted { .. } => "review_submitted",
            Self::TicketOpened { .. } => "ticket_opened",
            Self::TicketUpdated { .. } => "ticket_updated",
        }
    }
}
