//! Inbound farmer payments.
//!
//! Payments are created `pending` by the marketplace and settled by
//! callbacks from the payment gateway. Gateways retry, so callbacks are
//! idempotent: replaying a settled outcome is a no-op, while contradicting
//! it is a conflict.

use std::collections::HashMap;

use agri_proto::{Amount, BookingId, PaymentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, MarketResult};

/// Why money moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Share due on confirmation.
    Deposit,
    /// Outstanding balance.
    Final,
    /// Money returned to the farmer.
    Refund,
}

impl std::fmt::Display for PaymentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deposit => write!(f, "deposit"),
            Self::Final => write!(f, "final"),
            Self::Refund => write!(f, "refund"),
        }
    }
}

/// Payment rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Safaricom M-Pesa.
    #[default]
    Mpesa,
    /// Airtel Money.
    AirtelMoney,
    /// Bank transfer.
    BankTransfer,
    /// Cash on site.
    Cash,
    /// Card.
    Card,
}

/// Settlement state of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Awaiting the gateway.
    Pending,
    /// Money moved.
    Succeeded,
    /// Gateway reported failure.
    Failed,
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A single money movement tied to a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier.
    pub id: PaymentId,
    /// Booking paid for.
    pub booking: BookingId,
    /// Farmer paying or being refunded.
    pub payer: UserId,
    /// Purpose.
    pub kind: PaymentKind,
    /// Rail.
    pub method: PaymentMethod,
    /// Amount in minor units.
    pub amount: Amount,
    /// Gateway reference, unique across payments once known.
    pub transaction_id: Option<String>,
    /// Settlement state.
    pub state: PaymentState,
    /// Gateway's failure message.
    pub failure_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Settlement time for successful payments.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Settlement notice from the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCallback {
    /// Payment being settled.
    pub payment_id: PaymentId,
    /// Gateway reference.
    pub transaction_id: String,
    /// Whether the money moved.
    pub success: bool,
    /// Failure message.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Effect of a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// The payment was settled by this callback.
    Applied,
    /// The payment was already settled the same way.
    Duplicate,
}

/// All payments.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PaymentLedger {
    payments: HashMap<PaymentId, Payment>,
    transactions: HashMap<String, PaymentId>,
}

impl PaymentLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new pending payment.
    pub fn create(
        &mut self,
        booking: BookingId,
        payer: UserId,
        kind: PaymentKind,
        method: PaymentMethod,
        amount: Amount,
    ) -> MarketResult<Payment> {
        if amount == 0 {
            return Err(MarketError::Validation("payment amount must be positive".to_string()));
        }
        let payment = Payment {
            id: PaymentId::new(),
            booking,
            payer,
            kind,
            method,
            amount,
            transaction_id: None,
            state: PaymentState::Pending,
            failure_reason: None,
            created_at: Utc::now(),
            paid_at: None,
        };
        self.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    /// Gets a payment by ID.
    pub fn get(&self, id: PaymentId) -> Option<&Payment> {
        self.payments.get(&id)
    }

    /// Payments for a booking, oldest first.
    pub fn for_booking(&self, booking: BookingId) -> Vec<&Payment> {
        let mut items: Vec<_> = self
            .payments
            .values()
            .filter(|p| p.booking == booking)
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }

    /// A pending payment of the given kind, if any.
    pub fn pending_of_kind(&self, booking: BookingId, kind: PaymentKind) -> Option<&Payment> {
        self.payments
            .values()
            .find(|p| p.booking == booking && p.kind == kind && p.state == PaymentState::Pending)
    }

    /// Whether a payment of the given kind has succeeded.
    #[must_use]
    pub fn has_succeeded(&self, booking: BookingId, kind: PaymentKind) -> bool {
        self.payments
            .values()
            .any(|p| p.booking == booking && p.kind == kind && p.state == PaymentState::Succeeded)
    }

    /// Sum of succeeded deposits and finals.
    #[must_use]
    pub fn paid_in(&self, booking: BookingId) -> Amount {
        self.sum(booking, |k| matches!(k, PaymentKind::Deposit | PaymentKind::Final))
    }

    /// Sum of succeeded refunds.
    #[must_use]
    pub fn refunded(&self, booking: BookingId) -> Amount {
        self.sum(booking, |k| k == PaymentKind::Refund)
    }

    /// Money held for a booking: paid in minus refunded.
    #[must_use]
    pub fn collected(&self, booking: BookingId) -> Amount {
        self.paid_in(booking).saturating_sub(self.refunded(booking))
    }

    /// Deposits and finals still awaiting the gateway.
    #[must_use]
    pub fn pending_inbound(&self, booking: BookingId) -> Amount {
        self.payments
            .values()
            .filter(|p| {
                p.booking == booking
                    && p.kind != PaymentKind::Refund
                    && p.state == PaymentState::Pending
            })
            .fold(0, |acc: Amount, p| acc.saturating_add(p.amount))
    }

    /// Refunds still awaiting the gateway.
    #[must_use]
    pub fn pending_refunds(&self, booking: BookingId) -> Amount {
        self.payments
            .values()
            .filter(|p| {
                p.booking == booking
                    && p.kind == PaymentKind::Refund
                    && p.state == PaymentState::Pending
            })
            .fold(0, |acc: Amount, p| acc.saturating_add(p.amount))
    }

    fn sum(&self, booking: BookingId, kinds: impl Fn(PaymentKind) -> bool) -> Amount {
        self.payments
            .values()
            .filter(|p| p.booking == booking && p.state == PaymentState::Succeeded && kinds(p.kind))
            .fold(0, |acc: Amount, p| acc.saturating_add(p.amount))
    }

    /// Settles a payment from a gateway callback.
    ///
    /// Returns the payment as stored after the call.
    pub fn apply_callback(
        &mut self,
        callback: &GatewayCallback,
    ) -> MarketResult<(CallbackOutcome, Payment)> {
        let tx = callback.transaction_id.trim();
        if tx.is_empty() {
            return Err(MarketError::Validation("transaction id is required".to_string()));
        }
        if let Some(owner) = self.transactions.get(tx) {
            if *owner != callback.payment_id {
                return Err(MarketError::Conflict(format!(
                    "transaction {tx} already settled payment {owner}"
                )));
            }
        }

        let payment = self
            .payments
            .get_mut(&callback.payment_id)
            .ok_or_else(|| MarketError::not_found("payment", callback.payment_id))?;
        let target = if callback.success {
            PaymentState::Succeeded
        } else {
            PaymentState::Failed
        };

        if payment.state != PaymentState::Pending {
            if payment.state == target && payment.transaction_id.as_deref() == Some(tx) {
                return Ok((CallbackOutcome::Duplicate, payment.clone()));
            }
            return Err(MarketError::Conflict(format!(
                "payment {} already {} with transaction {}",
                payment.id,
                payment.state,
                payment.transaction_id.as_deref().unwrap_or("-")
            )));
        }

        payment.state = target;
        payment.transaction_id = Some(tx.to_string());
        if callback.success {
            payment.paid_at = Some(Utc::now());
        } else {
            payment.failure_reason = callback.reason.clone();
        }
        self.transactions.insert(tx.to_string(), payment.id);
        Ok((CallbackOutcome::Applied, payment.clone()))
    }
}
