use axum::extract::State;
use axum::response::Response;
use serde::Serialize;

use crate::state::AppState;
use crate::utils::response::success;

pub mod bookings;
pub mod events;
pub mod payments;
pub mod scans;
pub mod tickets;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
    connections: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "eventpass-api",
        connections: state.registry.connection_count(),
    };

    success(payload, "Health check successful")
}
