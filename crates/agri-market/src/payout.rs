//! Outbound operator payouts.
//!
//! One payout per booking, created when the booking completes. The
//! platform keeps `fee_rate` of the gross and the operator receives the
//! rest.

use std::collections::HashMap;

use agri_proto::{Amount, BasisPoints, BookingId, FeeSplit, PayoutId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::BookingStatus;
use crate::error::{MarketError, MarketResult};

/// Payout lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutState {
    /// Awaiting release.
    Pending,
    /// Sent to the operator's mobile-money account.
    Processing,
    /// Confirmed received.
    Paid,
    /// Transfer failed; may be released again.
    Failed,
}

impl PayoutState {
    /// Checks if a transition to the target state is valid.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending | Self::Failed, Self::Processing)
                | (Self::Processing, Self::Paid | Self::Failed)
        )
    }
}

impl std::fmt::Display for PayoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Paid => write!(f, "paid"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Rail a payout is sent over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    /// M-Pesa or Airtel Money transfer.
    MobileMoney,
    /// Transfer to a bank account.
    BankTransfer,
}

impl std::fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MobileMoney => write!(f, "mobile_money"),
            Self::BankTransfer => write!(f, "bank_transfer"),
        }
    }
}

/// Money owed to an operator for one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Identifier.
    pub id: PayoutId,
    /// Booking earned on.
    pub booking: BookingId,
    /// Receiving operator.
    pub operator: UserId,
    /// Gross, fee and net amounts.
    pub split: FeeSplit,
    /// Fee rate applied.
    pub fee_rate: BasisPoints,
    /// Lifecycle state.
    pub state: PayoutState,
    /// Rail used by the latest release.
    #[serde(default)]
    pub method: Option<PayoutMethod>,
    /// Transfer reference once paid.
    pub reference: Option<String>,
    /// Reason for the last failure.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
    /// Time the transfer was confirmed.
    pub paid_at: Option<DateTime<Utc>>,
}

/// All payouts, one per booking.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PayoutLedger {
    payouts: HashMap<PayoutId, Payout>,
    by_booking: HashMap<BookingId, PayoutId>,
}

impl PayoutLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the payout for a completed booking.
    pub fn create(
        &mut self,
        booking: BookingId,
        operator: UserId,
        gross: Amount,
        fee_rate: BasisPoints,
    ) -> MarketResult<Payout> {
        if let Some(existing) = self.by_booking.get(&booking) {
            return Err(MarketError::Conflict(format!(
                "booking {booking} already has payout {existing}"
            )));
        }
        let now = Utc::now();
        let payout = Payout {
            id: PayoutId::new(),
            booking,
            operator,
            split: FeeSplit::compute(gross, fee_rate),
            fee_rate,
            state: PayoutState::Pending,
            method: None,
            reference: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        };
        self.by_booking.insert(booking, payout.id);
        self.payouts.insert(payout.id, payout.clone());
        Ok(payout)
    }

    /// Gets a payout by ID.
    pub fn get(&self, id: PayoutId) -> Option<&Payout> {
        self.payouts.get(&id)
    }

    /// The payout for a booking, if created.
    pub fn for_booking(&self, booking: BookingId) -> Option<&Payout> {
        self.by_booking
            .get(&booking)
            .and_then(|id| self.payouts.get(id))
    }

    /// Payouts owed to an operator, newest first.
    pub fn for_operator(&self, operator: UserId) -> Vec<&Payout> {
        let mut items: Vec<_> = self
            .payouts
            .values()
            .filter(|p| p.operator == operator)
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// Recomputes a pending payout's split after late money arrives.
    ///
    /// Returns `true` when the payout changed.
    pub fn refresh_gross(&mut self, booking: BookingId, gross: Amount) -> bool {
        let Some(payout) = self
            .by_booking
            .get(&booking)
            .and_then(|id| self.payouts.get_mut(id))
        else {
            return false;
        };
        if payout.state != PayoutState::Pending || payout.split.gross == gross {
            return false;
        }
        payout.split = FeeSplit::compute(gross, payout.fee_rate);
        payout.updated_at = Utc::now();
        true
    }

    fn require_mut(&mut self, id: PayoutId) -> MarketResult<&mut Payout> {
        self.payouts
            .get_mut(&id)
            .ok_or_else(|| MarketError::not_found("payout", id))
    }

    fn transition(&mut self, id: PayoutId, target: PayoutState) -> MarketResult<&mut Payout> {
        let payout = self.require_mut(id)?;
        if !payout.state.can_transition_to(&target) {
            return Err(MarketError::InvalidStateTransition {
                from: payout.state.to_string(),
                to: target.to_string(),
            });
        }
        payout.state = target;
        payout.updated_at = Utc::now();
        Ok(payout)
    }

    /// Starts the transfer. The booking must be completed.
    pub fn release(
        &mut self,
        id: PayoutId,
        booking_status: BookingStatus,
        method: PayoutMethod,
    ) -> MarketResult<&Payout> {
        let payout = self.require_mut(id)?;
        if booking_status != BookingStatus::Completed {
            return Err(MarketError::PayoutNotReleasable {
                booking_id: payout.booking,
                status: booking_status.to_string(),
            });
        }
        let payout = self.transition(id, PayoutState::Processing)?;
        payout.method = Some(method);
        payout.failure_reason = None;
        Ok(payout)
    }

    /// Records a confirmed transfer.
    pub fn mark_paid(&mut self, id: PayoutId, reference: &str) -> MarketResult<&Payout> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MarketError::Validation("payout reference is required".to_string()));
        }
        let payout = self.transition(id, PayoutState::Paid)?;
        payout.reference = Some(reference.to_string());
        payout.paid_at = Some(payout.updated_at);
        Ok(payout)
    }

    /// Records a failed transfer.
    pub fn mark_failed(&mut self, id: PayoutId, reason: &str) -> MarketResult<&Payout> {
        let payout = self.transition(id, PayoutState::Failed)?;
        payout.failure_reason = Some(reason.to_string());
        Ok(payout)
    }
}
