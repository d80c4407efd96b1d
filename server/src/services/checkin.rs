//! Check-in State Machine.
//!
//! ```text
//!   NotScanned ──entry (CAS)──▶ CheckedIn ──exit──▶ CheckedIn + exited_at
//!        │                          │
//!        └─ rejected (window,       └─ entry again ─▶ AlreadyCheckedIn(first scanner, time)
//!           status, payment,
//!           wrong event)
//! ```
//!
//! The entry transition is one conditional store write. Preconditions read
//! before it only select the rejection message; they never stand in for the
//! write's own condition.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::{AuthUser, Capability};
use crate::models::{lookup_candidates, Event, LookupKey, Ticket, TicketStatus};
use crate::realtime::{Broadcaster, DomainEvent, Scope};
use crate::store::{ScanActor, TicketStore};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanAction {
    #[default]
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TicketNotActive,
    PaymentNotConfirmed,
    TooEarly,
    EventEnded,
    WrongEvent,
    NotCheckedIn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRejection {
    pub reason: RejectReason,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_event_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opens_at: Option<DateTime<Utc>>,
}

impl ScanRejection {
    fn new(reason: RejectReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
            correct_event_id: None,
            correct_event_title: None,
            opens_at: None,
        }
    }

    pub fn wrong_event(correct_event_id: Uuid, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            correct_event_id: Some(correct_event_id),
            message: format!("This ticket is for a different event: {}", title),
            correct_event_title: Some(title),
            ..Self::new(RejectReason::WrongEvent, "")
        }
    }

    pub fn ticket_not_active(status: TicketStatus) -> Self {
        Self::new(
            RejectReason::TicketNotActive,
            format!("Ticket is {} and cannot be used for entry", status),
        )
    }

    pub fn payment_not_confirmed() -> Self {
        Self::new(RejectReason::PaymentNotConfirmed, "Payment for this ticket is not confirmed")
    }

    pub fn too_early(opens_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            opens_at: Some(opens_at),
            ..Self::new(
                RejectReason::TooEarly,
                format!("Check-in opens in {}", format_remaining(opens_at - now)),
            )
        }
    }

    pub fn event_ended() -> Self {
        Self::new(RejectReason::EventEnded, "Event has ended")
    }

    pub fn not_checked_in() -> Self {
        Self::new(RejectReason::NotCheckedIn, "Ticket has not been checked in yet")
    }
}

/// The recorded first entry of a ticket, reported to anyone who scans it again.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorCheckIn {
    pub ticket_id: Uuid,
    pub ticket_number: String,
    pub checked_in_at: DateTime<Utc>,
    pub scanned_by: Option<Uuid>,
    pub scanned_by_name: Option<String>,
    pub scan_count: i32,
}

impl PriorCheckIn {
    pub fn from_ticket(ticket: &Ticket) -> Option<Self> {
        if !ticket.check_in.is_checked_in {
            return None;
        }
        Some(Self {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number.clone(),
            checked_in_at: ticket.check_in.checked_in_at?,
            scanned_by: ticket.check_in.scanned_by,
            scanned_by_name: ticket.check_in.scanned_by_name.clone(),
            scan_count: ticket.check_in.scan_count,
        })
    }

    pub fn message(&self) -> String {
        format!(
            "Ticket {} was already checked in by {} at {}",
            self.ticket_number,
            self.scanned_by_name.as_deref().unwrap_or("another scanner"),
            self.checked_in_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    CheckedInNow(Ticket),
    Exited(Ticket),
    AlreadyCheckedIn(PriorCheckIn),
    Rejected(ScanRejection),
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// The event the scanner is working.
    pub event_id: Uuid,
    /// Ticket number, QR payload or ticket id, as read.
    pub lookup: String,
    pub action: ScanAction,
}

pub struct CheckInService {
    store: Arc<dyn TicketStore>,
    broadcaster: Arc<dyn Broadcaster>,
    opens_before: Duration,
}

impl CheckInService {
    pub fn new(store: Arc<dyn TicketStore>, broadcaster: Arc<dyn Broadcaster>, opens_before: Duration) -> Self {
        Self {
            store,
            broadcaster,
            opens_before,
        }
    }

    pub async fn scan(
        &self,
        request: ScanRequest,
        scanner: &AuthUser,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AppError> {
        scanner.require(Capability::ScanTickets)?;

        let event = self
            .store
            .get_event(request.event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", request.event_id)))?;
        if !scanner.may_scan_for(&event) {
            return Err(AppError::Forbidden(
                "You are not authorized to scan tickets for this event".to_string(),
            ));
        }

        let ticket = self.resolve(&request.lookup).await?;

        if ticket.event_id != event.id {
            let title = self
                .store
                .get_event(ticket.event_id)
                .await?
                .map(|other| other.title)
                .unwrap_or_else(|| "another event".to_string());
            let rejection = ScanRejection::wrong_event(ticket.event_id, title);
            warn!(
                ticket_id = %ticket.id,
                presented_event = %event.id,
                ticket_event = %ticket.event_id,
                "Ticket scanned at the wrong event"
            );
            return Ok(ScanOutcome::Rejected(rejection));
        }

        let actor = ScanActor {
            id: scanner.user_id,
            name: scanner.name.clone(),
        };
        match request.action {
            ScanAction::Entry => self.enter(&event, ticket, &actor, now).await,
            ScanAction::Exit => self.exit(ticket, &actor, now).await,
        }
    }

    /// Tries each lookup key in order; the first match wins.
    pub async fn resolve(&self, raw: &str) -> Result<Ticket, AppError> {
        let keys = lookup_candidates(raw);
        if keys.is_empty() {
            return Err(AppError::ValidationError(
                "A ticket number or QR code is required".to_string(),
            ));
        }

        for key in keys {
            let found = match &key {
                LookupKey::TicketNumber(number) => self.store.find_ticket_by_number(number).await?,
                LookupKey::TicketId(id) => self.store.get_ticket(*id).await?,
            };
            if let Some(ticket) = found {
                return Ok(ticket);
            }
        }

        Err(AppError::NotFound("No ticket matches the scanned code".to_string()))
    }

    async fn enter(
        &self,
        event: &Event,
        ticket: Ticket,
        actor: &ScanActor,
        now: DateTime<Utc>,
    ) -> Result<ScanOutcome, AppError> {
        if ticket.check_in.is_checked_in {
            return self.repeat_scan(ticket).await;
        }
        if let Some(rejection) = self.entry_rejection(event, &ticket, now) {
            info!(ticket_id = %ticket.id, reason = ?rejection.reason, "Entry scan rejected");
            return Ok(ScanOutcome::Rejected(rejection));
        }

        match self.store.mark_checked_in(ticket.id, actor, now).await? {
            Some(checked_in) => {
                info!(
                    ticket_id = %checked_in.id,
                    event_id = %checked_in.event_id,
                    scanned_by = %actor.id,
                    "Attendee checked in"
                );
                self.broadcaster.publish_many(
                    &[Scope::Event(checked_in.event_id), Scope::User(checked_in.attendee_id)],
                    &DomainEvent::AttendeeCheckedIn {
                        event_id: checked_in.event_id,
                        ticket_id: checked_in.id,
                        ticket_number: checked_in.ticket_number.clone(),
                        attendee_id: checked_in.attendee_id,
                        attendee_name: checked_in.attendee.name.clone(),
                        scanned_by: actor.id,
                        scanned_by_name: actor.name.clone(),
                        timestamp: now,
                    },
                );
                Ok(ScanOutcome::CheckedInNow(checked_in))
            }
            None => {
                // Lost the race, or the ticket changed underneath. Report what
                // the store holds now.
                let current = self.store.get_ticket(ticket.id).await?.ok_or_else(|| {
                    AppError::NotFound(format!("Ticket {} no longer exists", ticket.ticket_number))
                })?;
                if current.check_in.is_checked_in {
                    self.repeat_scan(current).await
                } else {
                    Ok(ScanOutcome::Rejected(ScanRejection::ticket_not_active(current.status)))
                }
            }
        }
    }

    fn entry_rejection(&self, event: &Event, ticket: &Ticket, now: DateTime<Utc>) -> Option<ScanRejection> {
        if ticket.status != TicketStatus::Active {
            return Some(ScanRejection::ticket_not_active(ticket.status));
        }
        if !ticket.payment_status.is_confirmed() {
            return Some(ScanRejection::payment_not_confirmed());
        }
        let opens_at = event.start_time - self.opens_before;
        if now < opens_at {
            return Some(ScanRejection::too_early(opens_at, now));
        }
        if event.has_ended(now) {
            return Some(ScanRejection::event_ended());
        }
        None
    }

    async fn repeat_scan(&self, ticket: Ticket) -> Result<ScanOutcome, AppError> {
        let ticket = self
            .store
            .record_repeat_scan(ticket.id)
            .await?
            .unwrap_or(ticket);
        let prior = PriorCheckIn::from_ticket(&ticket).ok_or_else(|| {
            AppError::InternalServerError(format!("Ticket {} checked in without a time", ticket.id))
        })?;
        info!(
            ticket_id = %ticket.id,
            scan_count = prior.scan_count,
            "Repeat scan of checked-in ticket"
        );
        Ok(ScanOutcome::AlreadyCheckedIn(prior))
    }

    async fn exit(&self, ticket: Ticket, actor: &ScanActor, now: DateTime<Utc>) -> Result<ScanOutcome, AppError> {
        if !ticket.check_in.is_checked_in {
            return Ok(ScanOutcome::Rejected(ScanRejection::not_checked_in()));
        }
        let Some(exited) = self.store.mark_exited(ticket.id, now).await? else {
            return Ok(ScanOutcome::Rejected(ScanRejection::not_checked_in()));
        };

        info!(ticket_id = %exited.id, scanned_by = %actor.id, "Attendee exited");
        self.broadcaster.publish(
            Scope::Event(exited.event_id),
            &DomainEvent::AttendeeExited {
                event_id: exited.event_id,
                ticket_id: exited.id,
                ticket_number: exited.ticket_number.clone(),
                attendee_id: exited.attendee_id,
                scanned_by: actor.id,
                scanned_by_name: actor.name.clone(),
                timestamp: now,
            },
        );
        Ok(ScanOutcome::Exited(exited))
    }
}

fn format_remaining(remaining: Duration) -> String {
    let minutes = (remaining.num_seconds() + 59) / 60;
    let (days, hours, minutes) = (minutes / 1440, (minutes % 1440) / 60, minutes % 60);
    match (days, hours) {
        (0, 0) => format!("{}m", minutes),
        (0, _) => format!("{}h {}m", hours, minutes),
        _ => format!("{}d {}h {}m", days, hours, minutes),
    }
}
