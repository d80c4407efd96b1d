use std::any::Any;

use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{bookings, events, health_check, payments, scans, tickets};
use crate::realtime::ws::socket_handler;
use crate::state::AppState;
use crate::utils::response::error;

pub fn create_routes(state: AppState) -> Router {
    let production = state.config.production;
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(socket_handler))
        .route("/book-ticket", post(bookings::book_ticket))
        .route("/payments/create-order", post(payments::create_order))
        .route("/payments/verify-payment", post(payments::verify_payment))
        .route("/scan-ticket", post(scans::scan_ticket))
        .route("/staff/scan-ticket", post(scans::scan_ticket))
        .route("/host/scan-ticket", post(scans::scan_ticket))
        .route("/events", post(events::create_event))
        .route("/events/:id", get(events::get_event).delete(events::delete_event))
        .route("/events/:id/attendees", get(events::list_attendees))
        .route("/events/:id/capacity", patch(events::update_capacity))
        .route("/tickets/:id", get(tickets::get_ticket))
        .route("/tickets/:id/cancel", post(tickets::cancel_ticket))
        .route("/my-tickets", get(tickets::my_tickets))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(create_security_headers_layer(production))
        .layer(cors)
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");

    error(
        "INTERNAL_SERVER_ERROR",
        "An internal error occurred",
        None,
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}
