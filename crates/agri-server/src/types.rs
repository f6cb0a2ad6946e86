//! Request and response bodies for the HTTP API.
//!
//! The acting user is named by an `actor_id` field; there is no session
//! layer in front of the API.

use agri_market::{
    Blackout, CallbackOutcome, DisputeResolution, EquipmentPatch, EquipmentStatus, FarmerProfile,
    MaintenanceRecord, MarketStats, NewBooking, NewEquipment, NewReview, NewTicket,
    OperatorDetails, Payment, PaymentKind, PaymentMethod, SearchQuery, ServiceArea, TicketStatus,
};
use agri_proto::{Amount, CategoryId, DateRange, EquipmentId, GeoPoint, UserId};
use axum::extract::FromRequest;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

/// JSON body extractor whose rejections use the API error format.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok".
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Record counts.
    pub stats: MarketStats,
}

/// Body naming only the acting user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorRequest {
    /// Acting user.
    pub actor_id: UserId,
}

/// Body for `POST /api/bookings/{id}/complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    /// Operator finishing the job.
    pub actor_id: UserId,
    /// Machine hours worked.
    #[serde(default)]
    pub actual_hours: Option<f64>,
}

/// Body for cancellations and disputes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonRequest {
    /// Acting user.
    pub actor_id: UserId,
    /// Why.
    #[serde(default)]
    pub reason: String,
}

/// Body for settling a dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveRequest {
    /// Admin settling the dispute.
    pub actor_id: UserId,
    /// Outcome.
    pub resolution: DisputeResolution,
}

/// Body for `PUT /api/users/{id}/farmer-profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FarmerProfileRequest {
    /// The user or an admin.
    pub actor_id: UserId,
    /// New farm details.
    #[serde(flatten)]
    pub profile: FarmerProfile,
}

/// Body for `PUT /api/users/{id}/operator-profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorProfileRequest {
    /// The user or an admin.
    pub actor_id: UserId,
    /// New operator details.
    #[serde(flatten)]
    pub details: OperatorDetails,
}

/// Body for `POST /api/users/{id}/service-areas`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAreaRequest {
    /// The operator or an admin.
    pub actor_id: UserId,
    /// County and charge.
    #[serde(flatten)]
    pub area: ServiceArea,
}

/// Body for `POST /api/categories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryRequest {
    /// Unique name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
}

/// Body for `POST /api/equipment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEquipmentRequest {
    /// Owning operator.
    pub actor_id: UserId,
    /// Listing details.
    #[serde(flatten)]
    pub equipment: NewEquipment,
}

/// Body for `PATCH /api/equipment/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEquipmentRequest {
    /// Owner.
    pub actor_id: UserId,
    /// Fields to change.
    #[serde(flatten)]
    pub patch: EquipmentPatch,
}

/// Body for `PUT /api/equipment/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquipmentStatusRequest {
    /// Owner.
    pub actor_id: UserId,
    /// New status.
    pub status: EquipmentStatus,
}

/// Body for `POST /api/equipment/{id}/blackouts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutRequest {
    /// Owner.
    pub actor_id: UserId,
    /// Period to block.
    #[serde(flatten)]
    pub blackout: Blackout,
}

/// Body for `DELETE /api/equipment/{id}/blackouts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveBlackoutRequest {
    /// Owner.
    pub actor_id: UserId,
    /// Exact range to unblock.
    pub range: DateRange,
}

/// Body for `POST /api/equipment/{id}/maintenance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceRequest {
    /// Owner.
    pub actor_id: UserId,
    /// Service entry.
    #[serde(flatten)]
    pub record: MaintenanceRecord,
}

/// Body for `POST /api/quotes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteRequest {
    /// Equipment to price.
    pub equipment_id: EquipmentId,
    /// Days wanted.
    pub dates: DateRange,
    /// County the farm is in.
    pub farm_county: String,
}

/// Body for `POST /api/bookings`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Requesting farmer.
    pub actor_id: UserId,
    /// Booking details.
    #[serde(flatten)]
    pub booking: NewBooking,
}

/// Body for `POST /api/bookings/{id}/payments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Paying farmer.
    pub actor_id: UserId,
    /// Deposit or final balance.
    pub kind: PaymentKind,
    /// Rail to charge.
    #[serde(default)]
    pub method: PaymentMethod,
}

/// Body for `POST /api/bookings/{id}/reviews`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRequest {
    /// Reviewing party.
    pub actor_id: UserId,
    /// Scores and comment.
    #[serde(flatten)]
    pub review: NewReview,
}

/// Body for `POST /api/tickets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketRequest {
    /// Submitting user.
    pub actor_id: UserId,
    /// Ticket details.
    #[serde(flatten)]
    pub ticket: NewTicket,
}

/// Body for `POST /api/tickets/{id}/assign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTicketRequest {
    /// Admin handing out the ticket.
    pub actor_id: UserId,
    /// Admin who will work it.
    pub assignee_id: UserId,
}

/// Body for `POST /api/tickets/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketStatusRequest {
    /// Acting user.
    pub actor_id: UserId,
    /// Target status.
    pub status: TicketStatus,
}

/// Query for `GET /api/tickets`.
#[derive(Debug, Clone, Deserialize)]
pub struct TicketQueueParams {
    /// Admin reading the queue.
    pub actor_id: String,
    /// Only tickets in this status, e.g. `open`.
    pub status: Option<String>,
}

/// Response to a gateway callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    /// Whether this callback changed anything.
    pub outcome: CallbackOutcome,
    /// Payment after the callback.
    pub payment: Payment,
}

/// Body for `POST /api/payouts/{id}/paid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutPaidRequest {
    /// Admin recording the transfer.
    pub actor_id: UserId,
    /// Transfer reference from the payment rail.
    pub reference: String,
}

/// Body for `POST /api/payouts/{id}/failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutFailedRequest {
    /// Admin recording the failure.
    pub actor_id: UserId,
    /// Failure message from the payment rail.
    pub reason: String,
}

/// Query for `GET /api/users/{id}/notifications`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationParams {
    /// Only unread notifications.
    #[serde(default)]
    pub unread_only: bool,
}

/// Query for `GET /api/users/{id}/bookings`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingListParams {
    /// Only bookings in this status, e.g. `confirmed`.
    pub status: Option<String>,
}

/// Query for `GET /api/equipment`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EquipmentListParams {
    /// Only this owner's units.
    pub owner_id: Option<String>,
    /// Only this category.
    pub category_id: Option<String>,
    /// Only this status, e.g. `available`.
    pub status: Option<String>,
    /// Include soft-deleted units.
    #[serde(default)]
    pub include_deleted: bool,
}

/// Query for `GET /api/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    /// Farm latitude.
    pub lat: f64,
    /// Farm longitude.
    pub lon: f64,
    /// Search radius in kilometres.
    pub radius_km: f64,
    /// First day wanted.
    pub start: Option<NaiveDate>,
    /// Last day wanted.
    pub end: Option<NaiveDate>,
    /// Only this category.
    pub category_id: Option<String>,
    /// Only units at or below this daily rate.
    pub max_daily_rate: Option<Amount>,
    /// Only units in this county.
    pub county: Option<String>,
    /// Only inspected listings.
    #[serde(default)]
    pub verified_only: bool,
    /// Result cap.
    pub limit: Option<usize>,
}

impl SearchParams {
    /// Builds the discovery query, validating the point and window.
    pub fn into_query(self) -> ApiResult<SearchQuery> {
        let location = GeoPoint::new(self.lat, self.lon)?;
        let window = match (self.start, self.end) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)?),
            (None, None) => None,
            _ => {
                return Err(ApiError::InvalidRequest(
                    "start and end must be given together".to_string(),
                ));
            }
        };
        let category = self
            .category_id
            .as_deref()
            .map(CategoryId::parse)
            .transpose()?;
        Ok(SearchQuery {
            location,
            radius_km: self.radius_km,
            window,
            category,
            max_daily_rate: self.max_daily_rate,
            county: self.county,
            verified_only: self.verified_only,
            limit: self.limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SearchParams {
        SearchParams {
            lat: -0.3031,
            lon: 36.0800,
            radius_km: 25.0,
            start: None,
            end: None,
            category_id: None,
            max_daily_rate: None,
            county: None,
            verified_only: false,
            limit: None,
        }
    }

    #[test]
    fn test_search_params_into_query() {
        let mut p = params();
        p.start = NaiveDate::from_ymd_opt(2026, 3, 1);
        p.end = NaiveDate::from_ymd_opt(2026, 3, 3);
        p.category_id = Some(CategoryId::new().to_string());

        let query = p.into_query().unwrap();
        assert_eq!(query.window.unwrap().days(), 3);
        assert!(query.category.is_some());
        assert!((query.radius_km - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_search_params_half_window_rejected() {
        let mut p = params();
        p.start = NaiveDate::from_ymd_opt(2026, 3, 1);
        assert!(matches!(p.into_query(), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_search_params_bad_point_rejected() {
        let mut p = params();
        p.lat = 120.0;
        assert!(matches!(p.into_query(), Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_flattened_booking_request() {
        let json = serde_json::json!({
            "actor_id": UserId::new(),
            "equipment_id": EquipmentId::new(),
            "dates": {"start": "2026-03-01", "end": "2026-03-02"},
            "job": {
                "description": "plough maize field",
                "land_size_acres": 4.5,
                "farm_county": "Nakuru"
            }
        });
        let request: BookingRequest = serde_json::from_value(json).unwrap();
        assert_eq!(request.booking.job.farm_county, "Nakuru");
        assert_eq!(request.booking.payment_method, PaymentMethod::Mpesa);
        assert!(request.booking.notes.is_none());
    }
}
