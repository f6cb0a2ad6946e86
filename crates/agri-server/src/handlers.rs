//! HTTP handlers for the AgriRent API.
//!
//! Handlers parse path identifiers, then run one marketplace operation
//! through [`AppState::read`] or [`AppState::mutate`].

use std::sync::Arc;

use agri_market::{
    Booking, BookingStatus, Equipment, EquipmentCategory, EquipmentFilter, EquipmentStatus,
    GatewayCallback, NewUser, Notification, Payment, Payout, Quote, Review, SearchHit,
    SupportTicket, TicketStatus, User,
};
use agri_proto::{BookingId, CategoryId, EquipmentId, NotificationId, PayoutId, TicketId, UserId};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::types::{
    ActorRequest, ApiJson, AssignTicketRequest, BlackoutRequest, BookingListParams,
    BookingRequest, CallbackResponse, CategoryRequest, CompleteRequest, CreateEquipmentRequest,
    EquipmentListParams, EquipmentStatusRequest, FarmerProfileRequest, HealthResponse,
    MaintenanceRequest, NotificationParams, OperatorProfileRequest, PaymentRequest,
    PayoutFailedRequest, PayoutPaidRequest, QuoteRequest, ReasonRequest, RemoveBlackoutRequest,
    ResolveRequest, ReviewRequest, SearchParams, ServiceAreaRequest, TicketQueueParams,
    TicketRequest, TicketStatusRequest, UpdateEquipmentRequest,
};

type Shared = State<Arc<AppState>>;

/// Health check endpoint.
pub async fn health_check(State(state): Shared) -> Json<HealthResponse> {
    let stats = state.read(agri_market::Marketplace::stats).await;
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.uptime_secs(),
        stats,
    })
}

// Users

/// Register a user.
pub async fn register_user(
    State(state): Shared,
    ApiJson(input): ApiJson<NewUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let user = state.mutate(|m| m.register_user(input)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// Get a user with profiles.
pub async fn get_user(State(state): Shared, Path(id): Path<String>) -> ApiResult<Json<User>> {
    let id = UserId::parse(&id)?;
    debug!(user_id = %id, "fetching user");
    Ok(Json(state.read(|m| m.user(id)).await?))
}

/// Set a farmer's farm details.
pub async fn set_farmer_profile(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<FarmerProfileRequest>,
) -> ApiResult<Json<User>> {
    let id = UserId::parse(&id)?;
    let user = state
        .mutate(|m| m.set_farmer_profile(req.actor_id, id, req.profile))
        .await?;
    Ok(Json(user))
}

/// Set an operator's details.
pub async fn set_operator_profile(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<OperatorProfileRequest>,
) -> ApiResult<Json<User>> {
    let id = UserId::parse(&id)?;
    let user = state
        .mutate(|m| m.set_operator_profile(req.actor_id, id, req.details))
        .await?;
    Ok(Json(user))
}

/// Add a county an operator serves.
pub async fn add_service_area(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ServiceAreaRequest>,
) -> ApiResult<Json<User>> {
    let id = UserId::parse(&id)?;
    let user = state
        .mutate(|m| m.add_service_area(req.actor_id, id, req.area))
        .await?;
    Ok(Json(user))
}

/// Mark a user's national ID as checked. Admin only.
pub async fn verify_user(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<User>> {
    let id = UserId::parse(&id)?;
    Ok(Json(state.mutate(|m| m.verify_identity(req.actor_id, id)).await?))
}

/// Reviews a user received.
pub async fn user_reviews(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Review>>> {
    let id = UserId::parse(&id)?;
    Ok(Json(state.read(|m| m.reviews_for_user(id)).await?))
}

/// A user's notifications, newest first.
pub async fn user_notifications(
    State(state): Shared,
    Path(id): Path<String>,
    Query(params): Query<NotificationParams>,
) -> ApiResult<Json<Vec<Notification>>> {
    let id = UserId::parse(&id)?;
    Ok(Json(
        state
            .read(|m| m.notifications(id, params.unread_only))
            .await?,
    ))
}

/// Bookings where the user is farmer or operator.
pub async fn user_bookings(
    State(state): Shared,
    Path(id): Path<String>,
    Query(params): Query<BookingListParams>,
) -> ApiResult<Json<Vec<Booking>>> {
    let id = UserId::parse(&id)?;
    let status = params
        .status
        .as_deref()
        .map(parse_booking_status)
        .transpose()?;
    let bookings = state
        .read(|m| m.user(id).map(|_| m.bookings_for(id, status)))
        .await?;
    Ok(Json(bookings))
}

/// Payouts owed to an operator.
pub async fn user_payouts(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Payout>>> {
    let id = UserId::parse(&id)?;
    let payouts = state
        .read(|m| m.user(id).map(|_| m.payouts_for(id)))
        .await?;
    Ok(Json(payouts))
}

/// Mark a notification read.
pub async fn mark_notification_read(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Notification>> {
    let id = NotificationId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.mark_notification_read(id, req.actor_id))
            .await?,
    ))
}

// Catalog

/// List equipment categories.
pub async fn list_categories(State(state): Shared) -> Json<Vec<EquipmentCategory>> {
    Json(state.read(agri_market::Marketplace::categories).await)
}

/// Get one category.
pub async fn get_category(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<EquipmentCategory>> {
    let id = CategoryId::parse(&id)?;
    Ok(Json(state.read(|m| m.category(id)).await?))
}

/// Add an equipment category.
pub async fn add_category(
    State(state): Shared,
    ApiJson(req): ApiJson<CategoryRequest>,
) -> ApiResult<(StatusCode, Json<EquipmentCategory>)> {
    let category = state
        .mutate(|m| m.add_category(&req.name, &req.description))
        .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

/// List equipment, optionally filtered.
pub async fn list_equipment(
    State(state): Shared,
    Query(params): Query<EquipmentListParams>,
) -> ApiResult<Json<Vec<Equipment>>> {
    let filter = EquipmentFilter {
        owner: params.owner_id.as_deref().map(UserId::parse).transpose()?,
        category: params
            .category_id
            .as_deref()
            .map(CategoryId::parse)
            .transpose()?,
        status: params
            .status
            .as_deref()
            .map(parse_equipment_status)
            .transpose()?,
        include_deleted: params.include_deleted,
    };
    Ok(Json(state.read(|m| m.equipment_list(&filter)).await))
}

/// List a new unit.
pub async fn create_equipment(
    State(state): Shared,
    ApiJson(req): ApiJson<CreateEquipmentRequest>,
) -> ApiResult<(StatusCode, Json<Equipment>)> {
    let equipment = state
        .mutate(|m| m.list_equipment(req.actor_id, req.equipment))
        .await?;
    Ok((StatusCode::CREATED, Json(equipment)))
}

/// Get a listing.
pub async fn get_equipment(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    debug!(equipment_id = %id, "fetching equipment");
    Ok(Json(state.read(|m| m.equipment(id)).await?))
}

/// Update a listing.
pub async fn update_equipment(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateEquipmentRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.update_equipment(id, req.actor_id, req.patch))
            .await?,
    ))
}

/// Soft-delete a listing.
pub async fn delete_equipment(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.remove_equipment(id, req.actor_id))
            .await?,
    ))
}

/// Set a listing's status.
pub async fn set_equipment_status(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<EquipmentStatusRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.set_equipment_status(id, req.actor_id, req.status))
            .await?,
    ))
}

/// Mark a listing as inspected. Admin only.
pub async fn verify_equipment(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.verify_equipment(id, req.actor_id))
            .await?,
    ))
}

/// Block a period on a unit's calendar.
pub async fn add_blackout(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<BlackoutRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.add_blackout(id, req.actor_id, req.blackout))
            .await?,
    ))
}

/// Unblock a period.
pub async fn remove_blackout(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<RemoveBlackoutRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.remove_blackout(id, req.actor_id, req.range))
            .await?,
    ))
}

/// Record a service entry.
pub async fn record_maintenance(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<MaintenanceRequest>,
) -> ApiResult<Json<Equipment>> {
    let id = EquipmentId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.record_maintenance(id, req.actor_id, req.record))
            .await?,
    ))
}

// Discovery

/// Find bookable equipment near a farm.
pub async fn search(
    State(state): Shared,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SearchHit>>> {
    let query = params.into_query()?;
    Ok(Json(state.read(|m| m.search(&query)).await?))
}

/// Price a rental without booking it.
pub async fn create_quote(
    State(state): Shared,
    ApiJson(req): ApiJson<QuoteRequest>,
) -> ApiResult<Json<Quote>> {
    Ok(Json(
        state
            .read(|m| m.quote(req.equipment_id, &req.dates, &req.farm_county))
            .await?,
    ))
}

// Bookings

/// Request a booking.
pub async fn request_booking(
    State(state): Shared,
    ApiJson(req): ApiJson<BookingRequest>,
) -> ApiResult<(StatusCode, Json<Booking>)> {
    let booking = state
        .mutate(|m| m.request_booking(req.actor_id, req.booking))
        .await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

/// Get a booking.
pub async fn get_booking(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    debug!(booking_id = %id, "fetching booking");
    Ok(Json(state.read(|m| m.booking(id)).await?))
}

/// Operator accepts a request.
pub async fn confirm_booking(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(state.mutate(|m| m.confirm(id, req.actor_id)).await?))
}

/// Operator starts the job.
pub async fn start_booking(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(state.mutate(|m| m.start(id, req.actor_id)).await?))
}

/// Operator finishes the job.
pub async fn complete_booking(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<CompleteRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.complete(id, req.actor_id, req.actual_hours))
            .await?,
    ))
}

/// Either party cancels.
pub async fn cancel_booking(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReasonRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.cancel(id, req.actor_id, &req.reason))
            .await?,
    ))
}

/// Either party disputes.
pub async fn dispute_booking(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReasonRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.dispute(id, req.actor_id, &req.reason))
            .await?,
    ))
}

/// Admin settles a dispute.
pub async fn resolve_dispute(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ResolveRequest>,
) -> ApiResult<Json<Booking>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.resolve_dispute(id, req.actor_id, req.resolution))
            .await?,
    ))
}

// Payments

/// Payments recorded against a booking.
pub async fn list_payments(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Payment>>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(state.read(|m| m.payments_for(id)).await?))
}

/// Start a deposit or final payment.
pub async fn initiate_payment(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PaymentRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let id = BookingId::parse(&id)?;
    let payment = state
        .mutate(|m| m.initiate_payment(id, req.actor_id, req.kind, req.method))
        .await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Admin re-issues a refund the gateway failed.
pub async fn retry_refund(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let id = BookingId::parse(&id)?;
    let refund = state.mutate(|m| m.retry_refund(id, req.actor_id)).await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// Gateway settlement webhook. Repeats of a settled callback are accepted
/// and change nothing.
pub async fn payment_callback(
    State(state): Shared,
    ApiJson(callback): ApiJson<GatewayCallback>,
) -> ApiResult<Json<CallbackResponse>> {
    let (outcome, payment) = state
        .mutate(|m| m.handle_callback(&callback))
        .await
        .inspect_err(|e| {
            warn!(payment_id = %callback.payment_id, error = %e, "gateway callback rejected");
        })?;
    Ok(Json(CallbackResponse { outcome, payment }))
}

// Payouts

/// Get a payout.
pub async fn get_payout(State(state): Shared, Path(id): Path<String>) -> ApiResult<Json<Payout>> {
    let id = PayoutId::parse(&id)?;
    Ok(Json(state.read(|m| m.payout(id)).await?))
}

/// Admin releases a payout for transfer.
pub async fn release_payout(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ActorRequest>,
) -> ApiResult<Json<Payout>> {
    let id = PayoutId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.release_payout(id, req.actor_id))
            .await?,
    ))
}

/// The transfer went through.
pub async fn mark_payout_paid(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PayoutPaidRequest>,
) -> ApiResult<Json<Payout>> {
    let id = PayoutId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.mark_payout_paid(id, req.actor_id, &req.reference))
            .await?,
    ))
}

/// The transfer failed; the payout may be released again.
pub async fn mark_payout_failed(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PayoutFailedRequest>,
) -> ApiResult<Json<Payout>> {
    let id = PayoutId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.mark_payout_failed(id, req.actor_id, &req.reason))
            .await?,
    ))
}

// Reviews

/// Reviews written for a booking.
pub async fn list_booking_reviews(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<Review>>> {
    let id = BookingId::parse(&id)?;
    Ok(Json(state.read(|m| m.reviews_for_booking(id)).await?))
}

/// Review the other party of a completed booking.
pub async fn submit_review(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<ReviewRequest>,
) -> ApiResult<(StatusCode, Json<Review>)> {
    let id = BookingId::parse(&id)?;
    let review = state
        .mutate(|m| m.submit_review(id, req.actor_id, req.review))
        .await?;
    Ok((StatusCode::CREATED, Json(review)))
}

// Support

/// Raise a support ticket.
pub async fn open_ticket(
    State(state): Shared,
    ApiJson(req): ApiJson<TicketRequest>,
) -> ApiResult<(StatusCode, Json<SupportTicket>)> {
    let ticket = state
        .mutate(|m| m.open_ticket(req.actor_id, req.ticket))
        .await?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

/// Staff queue, most urgent first.
pub async fn ticket_queue(
    State(state): Shared,
    Query(params): Query<TicketQueueParams>,
) -> ApiResult<Json<Vec<SupportTicket>>> {
    let admin = UserId::parse(&params.actor_id)?;
    let status = params
        .status
        .as_deref()
        .map(parse_ticket_status)
        .transpose()?;
    Ok(Json(state.read(|m| m.ticket_queue(admin, status)).await?))
}

/// Get a ticket.
pub async fn get_ticket(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<SupportTicket>> {
    let id = TicketId::parse(&id)?;
    Ok(Json(state.read(|m| m.ticket(id)).await?))
}

/// Hand a ticket to a staff member.
pub async fn assign_ticket(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AssignTicketRequest>,
) -> ApiResult<Json<SupportTicket>> {
    let id = TicketId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.assign_ticket(id, req.actor_id, req.assignee_id))
            .await?,
    ))
}

/// Move a ticket along its lifecycle.
pub async fn set_ticket_status(
    State(state): Shared,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<TicketStatusRequest>,
) -> ApiResult<Json<SupportTicket>> {
    let id = TicketId::parse(&id)?;
    Ok(Json(
        state
            .mutate(|m| m.set_ticket_status(id, req.actor_id, req.status))
            .await?,
    ))
}

/// Tickets a user raised.
pub async fn user_tickets(
    State(state): Shared,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<SupportTicket>>> {
    let id = UserId::parse(&id)?;
    Ok(Json(state.read(|m| m.user_tickets(id)).await?))
}

// Live feed

/// SSE endpoint streaming marketplace events.
pub async fn stream_events(
    State(state): Shared,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let event_rx = state.subscribe();

    let stream = BroadcastStream::new(event_rx).filter_map(|result| match result {
        Ok(event) => {
            let event_type = event.event_type();
            match serde_json::to_string(&event) {
                Ok(data) => Some(Ok(Event::default().event(event_type).data(data))),
                Err(_) => None,
            }
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn parse_booking_status(s: &str) -> ApiResult<BookingStatus> {
    BookingStatus::parse(s)
        .ok_or_else(|| ApiError::InvalidRequest(format!("invalid booking status: {s}")))
}

fn parse_ticket_status(s: &str) -> ApiResult<TicketStatus> {
    TicketStatus::parse(s)
        .ok_or_else(|| ApiError::InvalidRequest(format!("invalid ticket status: {s}")))
}

fn parse_equipment_status(s: &str) -> ApiResult<EquipmentStatus> {
    match s.to_lowercase().as_str() {
        "available" => Ok(EquipmentStatus::Available),
        "rented" => Ok(EquipmentStatus::Rented),
        "maintenance" => Ok(EquipmentStatus::Maintenance),
        "inactive" => Ok(EquipmentStatus::Inactive),
        _ => Err(ApiError::InvalidRequest(format!(
            "invalid equipment status: {s}"
        ))),
    }
}
