//! Rental bookings and the reservation ledger.
//!
//! A booking walks a small state machine:
//!
//! ```text
//! requested ──► confirmed ──► in_progress ──► completed
//!     │             │  │           │              ▲
//!     │             │  └─► disputed ◄┘              │
//!     │             │        ├─────────────────────┘
//!     ▼             ▼        ▼
//!   cancelled_by_farmer / cancelled_by_operator
//! ```
//!
//! Bookings in `confirmed`, `in_progress` or `disputed` are *active*: they
//! hold their dates, and no two active bookings on one unit may overlap.

use std::collections::HashMap;

use agri_proto::{Amount, BasisPoints, BookingId, DateRange, EquipmentId, GeoPoint, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::Equipment;
use crate::error::{MarketError, MarketResult};
use crate::payment::PaymentMethod;

/// Lifecycle state of a booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    /// Farmer asked; operator has not answered.
    Requested,
    /// Operator accepted; dates are held.
    Confirmed,
    /// Work under way.
    InProgress,
    /// Work finished.
    Completed,
    /// Farmer withdrew.
    CancelledByFarmer,
    /// Operator declined or withdrew, or a dispute was resolved against the job.
    CancelledByOperator,
    /// Under dispute resolution.
    Disputed,
}

impl BookingStatus {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        use BookingStatus::{
            CancelledByFarmer, CancelledByOperator, Completed, Confirmed, Disputed, InProgress,
            Requested,
        };

        matches!(
            (self, target),
            (Requested, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress | Disputed, Completed)
                | (Requested | Confirmed, CancelledByFarmer)
                | (Requested | Confirmed | Disputed, CancelledByOperator)
                | (Confirmed | InProgress, Disputed)
        )
    }

    /// Whether the booking holds its dates against other bookings.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Confirmed | Self::InProgress | Self::Disputed)
    }

    /// Whether the booking ended in a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::CancelledByFarmer | Self::CancelledByOperator)
    }

    /// Parse the snake-case wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "requested" => Some(Self::Requested),
            "confirmed" => Some(Self::Confirmed),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled_by_farmer" => Some(Self::CancelledByFarmer),
            "cancelled_by_operator" => Some(Self::CancelledByOperator),
            "disputed" => Some(Self::Disputed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Requested => "requested",
            Self::Confirmed => "confirmed",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::CancelledByFarmer => "cancelled_by_farmer",
            Self::CancelledByOperator => "cancelled_by_operator",
            Self::Disputed => "disputed",
        };
        f.write_str(s)
    }
}

/// How much of the booking has been paid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Nothing received.
    #[default]
    Unpaid,
    /// Deposit received.
    DepositPaid,
    /// Total received.
    FullyPaid,
    /// Money returned to the farmer.
    Refunded,
}

/// What the farmer needs done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    /// e.g. "plough 5 acres of maize".
    pub description: String,
    /// Area to work.
    pub land_size_acres: f64,
    /// Crop on the land.
    #[serde(default)]
    pub crop_type: Option<String>,
    /// County the farm is in; drives the transport fee.
    pub farm_county: String,
    /// Farm GPS position.
    #[serde(default)]
    pub farm_location: Option<GeoPoint>,
    /// Directions for the operator.
    #[serde(default)]
    pub farm_directions: Option<String>,
    /// Machine hours the farmer expects the job to take.
    #[serde(default)]
    pub estimated_hours: Option<f64>,
}

impl JobDetails {
    fn validate(&self) -> MarketResult<()> {
        if self.description.trim().is_empty() {
            return Err(MarketError::Validation("job description is required".to_string()));
        }
        if !self.land_size_acres.is_finite() || self.land_size_acres <= 0.0 {
            return Err(MarketError::Validation("land size must be positive".to_string()));
        }
        if self.farm_county.trim().is_empty() {
            return Err(MarketError::Validation("farm county is required".to_string()));
        }
        if let Some(location) = &self.farm_location {
            location.validate()?;
        }
        if let Some(hours) = self.estimated_hours {
            validate_hours(hours)?;
        }
        Ok(())
    }
}

/// Machine hours must be positive and finite.
pub(crate) fn validate_hours(hours: f64) -> MarketResult<()> {
    if !hours.is_finite() || hours <= 0.0 {
        return Err(MarketError::Validation(format!("hours must be positive, got {hours}")));
    }
    Ok(())
}

/// Price breakdown for a rental.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Days rented, both ends inclusive.
    pub days: u64,
    /// Daily rate at quote time.
    pub daily_rate: Amount,
    /// `days × daily_rate`.
    pub rental_amount: Amount,
    /// Operator's service-area charge for the farm county.
    pub transport_fee: Amount,
    /// `rental_amount + transport_fee`.
    pub total: Amount,
    /// Share due on confirmation, rounded up.
    pub deposit: Amount,
}

/// Prices a rental of `equipment` over `dates`.
pub fn quote(
    equipment: &Equipment,
    dates: &DateRange,
    transport_fee: Amount,
    deposit_rate: BasisPoints,
) -> MarketResult<Quote> {
    dates.validate()?;
    let days = dates.days();
    let overflow = || MarketError::Validation("booking amount overflows".to_string());
    let rental_amount = equipment.daily_rate.checked_mul(days).ok_or_else(overflow)?;
    let total = rental_amount.checked_add(transport_fee).ok_or_else(overflow)?;
    Ok(Quote {
        days,
        daily_rate: equipment.daily_rate,
        rental_amount,
        transport_fee,
        total,
        deposit: deposit_rate.apply_ceil(total),
    })
}

/// Input for a booking request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    /// Equipment wanted.
    pub equipment_id: EquipmentId,
    /// Days wanted.
    pub dates: DateRange,
    /// Job details.
    pub job: JobDetails,
    /// How the farmer intends to pay.
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Note for the operator.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A rental booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    /// Identifier.
    pub id: BookingId,
    /// Renting farmer.
    pub farmer: UserId,
    /// Equipment owner at request time.
    pub operator: UserId,
    /// Equipment rented.
    pub equipment: EquipmentId,
    /// Work requested.
    pub job: JobDetails,
    /// Days reserved.
    pub dates: DateRange,
    /// Price agreed at request time.
    pub quote: Quote,
    /// Farmer's chosen payment method.
    pub payment_method: PaymentMethod,
    /// Lifecycle state.
    pub status: BookingStatus,
    /// Money state.
    pub payment_status: PaymentStatus,
    /// Note from the farmer.
    pub farmer_notes: Option<String>,
    /// Note from the operator.
    pub operator_notes: Option<String>,
    /// Why the booking was cancelled.
    pub cancellation_reason: Option<String>,
    /// Why the booking was disputed.
    pub dispute_reason: Option<String>,
    /// Day work actually started.
    pub actual_start: Option<NaiveDate>,
    /// Day work actually finished.
    pub actual_end: Option<NaiveDate>,
    /// Machine hours the operator reported on completion.
    #[serde(default)]
    pub actual_hours: Option<f64>,
    /// Request time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Whether the user is the farmer or the operator on this booking.
    #[must_use]
    pub fn is_party(&self, user: UserId) -> bool {
        self.farmer == user || self.operator == user
    }

    /// The other party on the booking.
    #[must_use]
    pub fn counterparty(&self, user: UserId) -> UserId {
        if user == self.farmer {
            self.operator
        } else {
            self.farmer
        }
    }
}

/// All bookings, indexed for overlap checks.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BookingLedger {
    bookings: HashMap<BookingId, Booking>,
}

impl BookingLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bookings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bookings.len()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bookings.is_empty()
    }

    /// Creates a `requested` booking. Callers check availability first.
    pub fn create(
        &mut self,
        farmer: UserId,
        equipment: &Equipment,
        input: NewBooking,
        quote: Quote,
    ) -> MarketResult<Booking> {
        input.dates.validate()?;
        input.job.validate()?;

        let now = Utc::now();
        let booking = Booking {
            id: BookingId::new(),
            farmer,
            operator: equipment.owner,
            equipment: equipment.id,
            job: input.job,
            dates: input.dates,
            quote,
            payment_method: input.payment_method,
            status: BookingStatus::Requested,
            payment_status: PaymentStatus::Unpaid,
            farmer_notes: input.notes,
            operator_notes: None,
            cancellation_reason: None,
            dispute_reason: None,
            actual_start: None,
            actual_end: None,
            actual_hours: None,
            created_at: now,
            updated_at: now,
        };
        self.bookings.insert(booking.id, booking.clone());
        Ok(booking)
    }

    /// Gets a booking by ID.
    pub fn get(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.get(&id)
    }

    /// Gets a booking, failing when absent.
    pub fn require(&self, id: BookingId) -> MarketResult<&Booking> {
        self.bookings
            .get(&id)
            .ok_or_else(|| MarketError::not_found("booking", id))
    }

    pub(crate) fn require_mut(&mut self, id: BookingId) -> MarketResult<&mut Booking> {
        self.bookings
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("booking", id))
    }

    /// First active booking on `equipment` overlapping `dates`, ignoring
    /// `exclude`.
    pub fn conflicting_active(
        &self,
        equipment: EquipmentId,
        dates: &DateRange,
        exclude: Option<BookingId>,
    ) -> Option<&Booking> {
        self.bookings.values().find(|b| {
            b.equipment == equipment
                && b.status.is_active()
                && Some(b.id) != exclude
                && b.dates.overlaps(dates)
        })
    }

    /// Whether `equipment` has any active booking.
    #[must_use]
    pub fn has_active(&self, equipment: EquipmentId) -> bool {
        self.bookings
            .values()
            .any(|b| b.equipment == equipment && b.status.is_active())
    }

    /// Moves a booking to `target`, enforcing the state machine.
    pub(crate) fn transition(
        &mut self,
        id: BookingId,
        target: BookingStatus,
    ) -> MarketResult<&mut Booking> {
        let booking = self.require_mut(id)?;
        if !booking.status.can_transition_to(&target) {
            return Err(MarketError::InvalidStateTransition {
                from: booking.status.to_string(),
                to: target.to_string(),
            });
        }
        booking.status = target;
        booking.updated_at = Utc::now();
        Ok(booking)
    }

    /// Bookings where `user` is farmer or operator, newest first.
    pub fn for_user(&self, user: UserId, status: Option<BookingStatus>) -> Vec<&Booking> {
        let mut items: Vec<_> = self
            .bookings
            .values()
            .filter(|b| b.is_party(user))
            .filter(|b| status.is_none_or(|s| b.status == s))
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Every booking.
    pub fn iter(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }
}
