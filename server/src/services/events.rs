//! Minimal event records and the read-side attendee projection.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::auth::{AuthUser, Capability};
use crate::models::{CheckIn, Event, EventStatus, Ticket, TicketStatus};
use crate::store::{DeleteOutcome, TicketStore};
use crate::utils::error::AppError;

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub venue: Option<String>,
    pub capacity: i32,
    pub price: Decimal,
    pub status: EventStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeEntry {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub attendee_id: Uuid,
    pub name: String,
    pub email: String,
    pub status: TicketStatus,
    pub check_in: CheckIn,
    pub booked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeSummary {
    pub total: usize,
    pub active: usize,
    pub checked_in: usize,
    pub cancelled: usize,
    pub expired: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeList {
    pub event_id: Uuid,
    pub title: String,
    pub capacity: i32,
    pub tickets_sold: i32,
    pub summary: AttendeeSummary,
    pub attendees: Vec<AttendeeEntry>,
}

pub struct EventService {
    store: Arc<dyn TicketStore>,
}

impl EventService {
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self { store }
    }

    pub async fn create(&self, new: NewEvent, host: &AuthUser, now: DateTime<Utc>) -> Result<Event, AppError> {
        host.require(Capability::ManageEvents)?;
        if new.title.trim().is_empty() {
            return Err(AppError::ValidationError("Event title is required".to_string()));
        }
        if new.capacity <= 0 {
            return Err(AppError::ValidationError("Capacity must be a positive number".to_string()));
        }
        if new.price.is_sign_negative() {
            return Err(AppError::ValidationError("Price cannot be negative".to_string()));
        }
        if new.end_time <= new.start_time {
            return Err(AppError::ValidationError("Event must end after it starts".to_string()));
        }

        let event = Event {
            id: Uuid::new_v4(),
            host_id: host.user_id,
            title: new.title.trim().to_string(),
            venue: new.venue,
            capacity: new.capacity,
            tickets_sold: 0,
            price: new.price,
            status: new.status,
            start_time: new.start_time,
            end_time: new.end_time,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_event(&event).await?;
        info!(event_id = %event.id, host_id = %host.user_id, capacity = event.capacity, "Event created");
        Ok(event)
    }

    pub async fn get(&self, event_id: Uuid) -> Result<Event, AppError> {
        self.store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))
    }

    /// Tickets of an event as its host or staff see them, with expiry derived
    /// at read time.
    pub async fn attendees(&self, event_id: Uuid, user: &AuthUser, now: DateTime<Utc>) -> Result<AttendeeList, AppError> {
        let event = self.get(event_id).await?;
        if !user.may_view_attendees(&event) {
            return Err(AppError::Forbidden(
                "Only the event host or its staff can view attendees".to_string(),
            ));
        }

        let tickets = self.store.list_event_tickets(event_id).await?;
        let attendees: Vec<AttendeeEntry> = tickets
            .into_iter()
            .map(|ticket| project(ticket, &event, now))
            .collect();
        let summary = summarize(&attendees);

        Ok(AttendeeList {
            event_id: event.id,
            title: event.title,
            capacity: event.capacity,
            tickets_sold: event.tickets_sold,
            summary,
            attendees,
        })
    }

    pub async fn delete(&self, event_id: Uuid, user: &AuthUser) -> Result<(), AppError> {
        let event = self.get(event_id).await?;
        if !user.may_manage(&event) {
            return Err(AppError::Forbidden("Only the event host can delete it".to_string()));
        }

        match self.store.delete_event_if_unsold(event_id).await? {
            DeleteOutcome::Deleted => {
                info!(event_id = %event_id, deleted_by = %user.user_id, "Event deleted");
                Ok(())
            }
            DeleteOutcome::NotFound => Err(AppError::NotFound(format!("Event {} not found", event_id))),
            DeleteOutcome::HasLiveTickets => Err(AppError::Conflict(
                "Event has active tickets and cannot be deleted".to_string(),
            )),
        }
    }
}

fn project(ticket: Ticket, event: &Event, now: DateTime<Utc>) -> AttendeeEntry {
    AttendeeEntry {
        status: ticket.effective_status(event.end_time, now),
        ticket_id: ticket.id,
        ticket_number: ticket.ticket_number,
        attendee_id: ticket.attendee_id,
        name: ticket.attendee.name,
        email: ticket.attendee.email,
        check_in: ticket.check_in,
        booked_at: ticket.created_at,
    }
}

fn summarize(entries: &[AttendeeEntry]) -> AttendeeSummary {
    entries.iter().fold(
        AttendeeSummary {
            total: entries.len(),
            ..AttendeeSummary::default()
        },
        |mut summary, entry| {
            match entry.status {
                TicketStatus::Active => summary.active += 1,
                TicketStatus::Used => summary.checked_in += 1,
                TicketStatus::Cancelled => summary.cancelled += 1,
                TicketStatus::Expired => summary.expired += 1,
            }
            summary
        },
    )
}
