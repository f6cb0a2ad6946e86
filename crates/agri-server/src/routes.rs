//! Route configuration for the AgriRent API.

use std::sync::Arc;

use axum::routing::{get, post, put, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{
    add_blackout, add_category, add_service_area, assign_ticket, cancel_booking,
    complete_booking, confirm_booking, create_equipment, create_quote, delete_equipment,
    dispute_booking, get_booking, get_category, get_equipment, get_payout, get_ticket, get_user,
    health_check, initiate_payment, list_booking_reviews, list_categories, list_equipment,
    list_payments, mark_notification_read, mark_payout_failed, mark_payout_paid, open_ticket,
    payment_callback, record_maintenance, register_user, release_payout, remove_blackout,
    request_booking, resolve_dispute, retry_refund, search, set_equipment_status,
    set_farmer_profile, set_operator_profile, set_ticket_status, start_booking, stream_events,
    submit_review, ticket_queue, update_equipment, user_bookings, user_notifications,
    user_payouts, user_reviews, user_tickets, verify_equipment, verify_user,
};
use crate::state::AppState;
use crate::websocket::ws_upgrade;

/// Create the AgriRent API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(state.config());

    let api_routes = Router::new()
        .route("/health", get(health_check))
        // Users
        .route("/users", post(register_user))
        .route("/users/{id}", get(get_user))
        .route("/users/{id}/farmer-profile", put(set_farmer_profile))
        .route("/users/{id}/operator-profile", put(set_operator_profile))
        .route("/users/{id}/service-areas", post(add_service_area))
        .route("/users/{id}/verify", post(verify_user))
        .route("/users/{id}/reviews", get(user_reviews))
        .route("/users/{id}/notifications", get(user_notifications))
        .route("/users/{id}/bookings", get(user_bookings))
        .route("/users/{id}/payouts", get(user_payouts))
        .route("/users/{id}/tickets", get(user_tickets))
        .route("/notifications/{id}/read", post(mark_notification_read))
        // Catalog
        .route("/categories", get(list_categories).post(add_category))
        .route("/categories/{id}", get(get_category))
        .route("/equipment", get(list_equipment).post(create_equipment))
        .route(
            "/equipment/{id}",
            get(get_equipment)
                .patch(update_equipment)
                .delete(delete_equipment),
        )
        .route("/equipment/{id}/status", put(set_equipment_status))
        .route("/equipment/{id}/verify", post(verify_equipment))
        .route(
            "/equipment/{id}/blackouts",
            post(add_blackout).delete(remove_blackout),
        )
        .route("/equipment/{id}/maintenance", post(record_maintenance))
        // Discovery
        .route("/search", get(search))
        .route("/quotes", post(create_quote))
        // Bookings
        .route("/bookings", post(request_booking))
        .route("/bookings/{id}", get(get_booking))
        .route("/bookings/{id}/confirm", post(confirm_booking))
        .route("/bookings/{id}/start", post(start_booking))
        .route("/bookings/{id}/complete", post(complete_booking))
        .route("/bookings/{id}/cancel", post(cancel_booking))
        .route("/bookings/{id}/dispute", post(dispute_booking))
        .route("/bookings/{id}/refund", post(retry_refund))
        .route("/bookings/{id}/resolve", post(resolve_dispute))
        .route(
            "/bookings/{id}/payments",
            get(list_payments).post(initiate_payment),
        )
        .route(
            "/bookings/{id}/reviews",
            get(list_booking_reviews).post(submit_review),
        )
        // Payments and payouts
        .route("/payments/callback", post(payment_callback))
        .route("/payouts/{id}", get(get_payout))
        .route("/payouts/{id}/release", post(release_payout))
        .route("/payouts/{id}/paid", post(mark_payout_paid))
        .route("/payouts/{id}/failed", post(mark_payout_failed))
        // Support
        .route("/tickets", get(ticket_queue).post(open_ticket))
        .route("/tickets/{id}", get(get_ticket))
        .route("/tickets/{id}/assign", post(assign_ticket))
        .route("/tickets/{id}/status", post(set_ticket_status))
        // Live feeds
        .route("/events", get(stream_events))
        .route("/ws", get(ws_upgrade));

    Router::new()
        .nest("/api", api_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
