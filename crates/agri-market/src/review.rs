//! Two-way reviews on completed bookings.

use std::collections::HashMap;

use agri_proto::{BookingId, ReviewId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{Booking, BookingStatus};
use crate::error::{MarketError, MarketResult};

/// Who is reviewing whom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDirection {
    /// A farmer rating the operator.
    FarmerToOperator,
    /// An operator rating the farmer.
    OperatorToFarmer,
}

/// Review input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReview {
    /// Overall score, 1..=5.
    pub rating: u8,
    /// Timeliness score, 1..=5.
    #[serde(default)]
    pub punctuality: Option<u8>,
    /// Work or equipment quality score, 1..=5.
    #[serde(default)]
    pub quality: Option<u8>,
    /// Free text.
    #[serde(default)]
    pub comment: String,
}

/// An immutable review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Identifier.
    pub id: ReviewId,
    /// Booking reviewed.
    pub booking: BookingId,
    /// Author.
    pub reviewer: UserId,
    /// Subject.
    pub reviewee: UserId,
    /// Author's side of the booking.
    pub direction: ReviewDirection,
    /// Overall score.
    pub rating: u8,
    /// Timeliness score.
    pub punctuality: Option<u8>,
    /// Quality score.
    pub quality: Option<u8>,
    /// Free text.
    pub comment: String,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

fn check_score(field: &str, score: u8) -> MarketResult<()> {
    if (1..=5).contains(&score) {
        Ok(())
    } else {
        Err(MarketError::Validation(format!("{field} must be between 1 and 5")))
    }
}

/// All reviews.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ReviewLedger {
    reviews: HashMap<ReviewId, Review>,
}

impl ReviewLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a review of `booking` by `reviewer`.
    pub fn submit(
        &mut self,
        booking: &Booking,
        reviewer: UserId,
        input: NewReview,
    ) -> MarketResult<Review> {
        let direction = if reviewer == booking.farmer {
            ReviewDirection::FarmerToOperator
        } else if reviewer == booking.operator {
            ReviewDirection::OperatorToFarmer
        } else {
            return Err(MarketError::Forbidden(format!(
                "user {reviewer} is not a party to booking {}",
                booking.id
            )));
        };
        if booking.status != BookingStatus::Completed {
            return Err(MarketError::Validation(format!(
                "booking {} is {}; only completed bookings can be reviewed",
                booking.id, booking.status
            )));
        }
        check_score("rating", input.rating)?;
        if let Some(score) = input.punctuality {
            check_score("punctuality", score)?;
        }
        if let Some(score) = input.quality {
            check_score("quality", score)?;
        }
        if self
            .reviews
            .values()
            .any(|r| r.booking == booking.id && r.reviewer == reviewer)
        {
            return Err(MarketError::DuplicateReview {
                booking_id: booking.id,
                reviewer,
            });
        }

        let review = Review {
            id: ReviewId::new(),
            booking: booking.id,
            reviewer,
            reviewee: booking.counterparty(reviewer),
            direction,
            rating: input.rating,
            punctuality: input.punctuality,
            quality: input.quality,
            comment: input.comment.trim().to_string(),
            created_at: Utc::now(),
        };
        self.reviews.insert(review.id, review.clone());
        Ok(review)
    }

    /// Reviews on one booking, oldest first.
    pub fn for_booking(&self, booking: BookingId) -> Vec<&Review> {
        self.sorted(|r| r.booking == booking)
    }

    /// Reviews a user received, oldest first.
    pub fn received_by(&self, user: UserId) -> Vec<&Review> {
        self.sorted(|r| r.reviewee == user)
    }

    fn sorted(&self, keep: impl Fn(&Review) -> bool) -> Vec<&Review> {
        let mut items: Vec<_> = self.reviews.values().filter(|r| keep(r)).collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        items
    }
}
