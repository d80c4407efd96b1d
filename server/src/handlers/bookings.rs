use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tickets::issued_response;
use crate::auth::AuthUser;
use crate::models::{AttendeeInfo, Embedded};
use crate::services::{BookRequest, BookingOutcome, PaymentRequired};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::{ApiJson, IdempotencyKey};
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookTicketBody {
    pub event_id: Uuid,
    #[serde(default)]
    pub attendee_info: Option<Embedded<AttendeeInfo>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RequiresPayment {
    requires_payment: bool,
    #[serde(flatten)]
    payment: PaymentRequired,
}

/// POST /book-ticket
pub async fn book_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    IdempotencyKey(idempotency_key): IdempotencyKey,
    ApiJson(body): ApiJson<BookTicketBody>,
) -> Result<Response, AppError> {
    let attendee = body
        .attendee_info
        .map(|info| info.into_inner("attendeeInfo"))
        .transpose()?;

    let outcome = state
        .bookings
        .book(
            BookRequest {
                event_id: body.event_id,
                attendee,
                idempotency_key,
            },
            &user,
            Utc::now(),
        )
        .await?;

    Ok(match outcome {
        BookingOutcome::Issued(issued) => issued_response(issued),
        BookingOutcome::RequiresPayment(payment) => success(
            RequiresPayment {
                requires_payment: true,
                payment,
            },
            "Payment required to complete booking",
        ),
    })
}
