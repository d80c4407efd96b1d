use axum::extract::{Path, State};
use axum::response::Response;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::Ticket;
use crate::services::Issued;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

/// A ticket plus the string its QR code encodes.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketView {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub qr_code_data: String,
}

impl From<Ticket> for TicketView {
    fn from(ticket: Ticket) -> Self {
        Self {
            qr_code_data: ticket.qr_payload(),
            ticket,
        }
    }
}

/// 201 for a new ticket, 200 when an earlier call already issued it.
pub fn issued_response(issued: Issued) -> Response {
    if issued.replayed {
        success(TicketView::from(issued.ticket), "Ticket already issued for this order")
    } else {
        created(TicketView::from(issued.ticket), "Ticket booked successfully")
    }
}

pub async fn get_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state.bookings.ticket(ticket_id, &user).await?;
    Ok(success(TicketView::from(ticket), "Ticket retrieved"))
}

pub async fn my_tickets(State(state): State<AppState>, user: AuthUser) -> Result<Response, AppError> {
    let tickets: Vec<TicketView> = state
        .bookings
        .my_tickets(&user)
        .await?
        .into_iter()
        .map(TicketView::from)
        .collect();
    Ok(success(tickets, "Tickets retrieved"))
}

pub async fn cancel_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    Path(ticket_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let ticket = state.bookings.cancel(ticket_id, &user, Utc::now()).await?;
    Ok(success(TicketView::from(ticket), "Ticket cancelled"))
}
