use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::capacity::CapacityLedger;
use super::issuance::{IssueRequest, Issued, TicketIssuer};
use crate::auth::{AuthUser, Capability};
use crate::models::{AttendeeInfo, PaymentStatus, Ticket, TicketStatus};
use crate::realtime::{Broadcaster, DomainEvent, Scope};
use crate::store::TicketStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone)]
pub struct BookRequest {
    pub event_id: Uuid,
    pub attendee: Option<AttendeeInfo>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub event_id: Uuid,
    pub title: String,
    pub price: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone)]
pub enum BookingOutcome {
    Issued(Issued),
    RequiresPayment(PaymentRequired),
}

pub struct BookingService {
    store: Arc<dyn TicketStore>,
    issuer: Arc<TicketIssuer>,
    ledger: Arc<CapacityLedger>,
    broadcaster: Arc<dyn Broadcaster>,
    currency: String,
    cancellation_cutoff: Duration,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        issuer: Arc<TicketIssuer>,
        ledger: Arc<CapacityLedger>,
        broadcaster: Arc<dyn Broadcaster>,
        currency: String,
        cancellation_cutoff: Duration,
    ) -> Self {
        Self {
            store,
            issuer,
            ledger,
            broadcaster,
            currency,
            cancellation_cutoff,
        }
    }

    /// Free events are issued right away. Paid events only report their price;
    /// the ticket is issued once the payment is verified.
    pub async fn book(
        &self,
        request: BookRequest,
        user: &AuthUser,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, AppError> {
        user.require(Capability::BookTickets)?;
        let attendee = attendee_details(request.attendee, user)?;

        let event = self
            .store
            .get_event(request.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", request.event_id)))?;
        event
            .check_bookable(now)
            .map_err(|reason| AppError::EventNotBookable(reason.to_string()))?;

        if !event.is_free() {
            if let Some(live) = self.store.find_live_ticket(event.id, user.user_id).await? {
                return Err(AppError::DuplicateBooking {
                    ticket_id: live.id,
                    ticket_number: live.ticket_number,
                });
            }
            return Ok(BookingOutcome::RequiresPayment(PaymentRequired {
                event_id: event.id,
                title: event.title,
                price: event.price,
                currency: self.currency.clone(),
            }));
        }

        let order_reference = match request.idempotency_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => format!("free:{}:{}", user.user_id, key),
            _ => format!("free_{}", Uuid::new_v4().simple()),
        };

        let issued = self
            .issuer
            .materialize(
                IssueRequest {
                    order_reference,
                    event_id: event.id,
                    attendee_id: user.user_id,
                    attendee,
                    price_paid: Decimal::ZERO,
                    payment_status: PaymentStatus::Free,
                },
                now,
            )
            .await?;
        Ok(BookingOutcome::Issued(issued))
    }

    /// Cancels an unused ticket and returns its slot to the event.
    pub async fn cancel(&self, ticket_id: Uuid, user: &AuthUser, now: DateTime<Utc>) -> Result<Ticket, AppError> {
        let ticket = self.owned_ticket(ticket_id, user).await?;
        let event = self
            .store
            .get_event(ticket.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", ticket.event_id)))?;

        if ticket.check_in.is_checked_in {
            return Err(AppError::CancellationRejected(
                "Checked-in tickets cannot be cancelled".to_string(),
            ));
        }
        if ticket.status != TicketStatus::Active {
            return Err(AppError::CancellationRejected(format!(
                "Ticket is already {}",
                ticket.status
            )));
        }
        if now >= event.start_time - self.cancellation_cutoff {
            return Err(AppError::CancellationRejected(format!(
                "Tickets cannot be cancelled within {} hours of the event start",
                self.cancellation_cutoff.num_hours()
            )));
        }

        let Some((cancelled, event)) = self.ledger.release(ticket.id, now).await? else {
            return Err(AppError::CancellationRejected(
                "Ticket was checked in or cancelled by another request".to_string(),
            ));
        };
        let tickets_sold = event.tickets_sold;

        info!(
            ticket_id = %cancelled.id,
            event_id = %cancelled.event_id,
            cancelled_by = %user.user_id,
            tickets_sold,
            "Ticket cancelled"
        );
        self.broadcaster.publish_many(
            &[Scope::Event(cancelled.event_id), Scope::User(cancelled.attendee_id)],
            &DomainEvent::TicketCancelled {
                event_id: cancelled.event_id,
                ticket_id: cancelled.id,
                ticket_number: cancelled.ticket_number.clone(),
                attendee_id: cancelled.attendee_id,
                cancelled_by: user.user_id,
                cancelled_by_name: user.name.clone(),
                tickets_sold,
                timestamp: now,
            },
        );
        Ok(cancelled)
    }

    /// A ticket visible to its owner, the event's host and admins.
    pub async fn ticket(&self, ticket_id: Uuid, user: &AuthUser) -> Result<Ticket, AppError> {
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;
        if ticket.attendee_id == user.user_id || user.is_admin() {
            return Ok(ticket);
        }
        match self.store.get_event(ticket.event_id).await? {
            Some(event) if user.may_manage(&event) => Ok(ticket),
            _ => Err(AppError::NotFound(format!("Ticket {} not found", ticket_id))),
        }
    }

    pub async fn my_tickets(&self, user: &AuthUser) -> Result<Vec<Ticket>, AppError> {
        Ok(self.store.list_attendee_tickets(user.user_id).await?)
    }

    async fn owned_ticket(&self, ticket_id: Uuid, user: &AuthUser) -> Result<Ticket, AppError> {
        let ticket = self
            .store
            .get_ticket(ticket_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Ticket {} not found", ticket_id)))?;
        if ticket.attendee_id != user.user_id && !user.is_admin() {
            return Err(AppError::Forbidden("You can only cancel your own tickets".to_string()));
        }
        Ok(ticket)
    }
}

/// Details from the request body, else from the token.
pub(crate) fn attendee_details(
    provided: Option<AttendeeInfo>,
    user: &AuthUser,
) -> Result<AttendeeInfo, AppError> {
    let attendee = provided
        .or_else(|| user.profile())
        .ok_or_else(|| AppError::ValidationError("attendeeInfo is required".to_string()))?;
    attendee.validate()?;
    Ok(attendee)
}
