//! Persistence boundary.
//!
//! The two cross-request invariants live here as single conditional writes:
//! the slot taken by `insert_ticket_with_slot` (and returned by
//! `cancel_ticket`) for event capacity, and `mark_checked_in` for a ticket's
//! check-in flag. Callers never read-compare-write those fields.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Event, PaymentOrder, Ticket};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Unique constraints the store enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueKey {
    TicketNumber,
    OrderReference,
    /// At most one active or used ticket per (event, attendee).
    LiveAttendeeTicket,
    EventId,
    OrderId,
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniqueKey::TicketNumber => "ticket number",
            UniqueKey::OrderReference => "order reference",
            UniqueKey::LiveAttendeeTicket => "attendee ticket",
            UniqueKey::EventId => "event id",
            UniqueKey::OrderId => "order id",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    UniqueViolation(UniqueKey),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Who performed a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanActor {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    HasLiveTickets,
}

#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn insert_event(&self, event: &Event) -> StoreResult<()>;

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>>;

    /// Sets capacity only if it stays at or above `tickets_sold`.
    async fn set_capacity_if_above_sold(
        &self,
        event_id: Uuid,
        capacity: i32,
    ) -> StoreResult<Option<Event>>;

    /// Deletes the event and its tickets unless a live ticket exists.
    async fn delete_event_if_unsold(&self, event_id: Uuid) -> StoreResult<DeleteOutcome>;

    /// Takes one slot on the ticket's event and inserts the ticket as a single
    /// unit. The slot is `tickets_sold += 1`, taken only if the event is
    /// published, starts after `now` and `tickets_sold < capacity`.
    /// `Ok(None)` when no slot was free. A failed insert leaves `tickets_sold`
    /// untouched.
    async fn insert_ticket_with_slot(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Event>>;

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>>;

    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>>;

    async fn find_ticket_by_order(&self, order_reference: &str) -> StoreResult<Option<Ticket>>;

    /// The active or used ticket of an attendee for an event, if any.
    async fn find_live_ticket(
        &self,
        event_id: Uuid,
        attendee_id: Uuid,
    ) -> StoreResult<Option<Ticket>>;

    async fn list_event_tickets(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>>;

    async fn list_attendee_tickets(&self, attendee_id: Uuid) -> StoreResult<Vec<Ticket>>;

    /// Sets `is_checked_in`, records the scanner and time, bumps `scan_count`
    /// and moves status to `used`, only if the ticket is active and not yet
    /// checked in. `None` when no row matched.
    async fn mark_checked_in(
        &self,
        ticket_id: Uuid,
        scanner: &ScanActor,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>>;

    /// Bumps `scan_count` on a ticket that is already checked in.
    async fn record_repeat_scan(&self, ticket_id: Uuid) -> StoreResult<Option<Ticket>>;

    /// Records an exit only if the ticket is checked in.
    async fn mark_exited(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ticket>>;

    /// Moves an active, not-checked-in ticket to `cancelled` and gives its
    /// slot back to the event, both or neither. `None` when the ticket did
    /// not qualify.
    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(Ticket, Event)>>;

    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()>;

    async fn get_order(&self, order_id: &str) -> StoreResult<Option<PaymentOrder>>;

    async fn mark_order_paid(&self, order_id: &str, payment_id: &str) -> StoreResult<()>;
}
