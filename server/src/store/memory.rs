use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{DeleteOutcome, ScanActor, StoreError, StoreResult, TicketStore, UniqueKey};
use crate::models::{Event, EventStatus, OrderStatus, PaymentOrder, Ticket, TicketStatus};

#[derive(Default)]
struct Inner {
    events: HashMap<Uuid, Event>,
    tickets: HashMap<Uuid, Ticket>,
    by_number: HashMap<String, Uuid>,
    by_order: HashMap<String, Uuid>,
    orders: HashMap<String, PaymentOrder>,
}

impl Inner {
    fn live_ticket(&self, event_id: Uuid, attendee_id: Uuid) -> Option<&Ticket> {
        self.tickets
            .values()
            .find(|t| t.event_id == event_id && t.attendee_id == attendee_id && t.status.is_live())
    }
}

fn has_free_slot(event: &Event, now: DateTime<Utc>) -> bool {
    event.status == EventStatus::Published
        && event.start_time > now
        && event.tickets_sold < event.capacity
}

/// In-process store with the same conditional-update semantics as
/// [`PgStore`](super::PgStore). Every operation holds one lock for its whole
/// read-check-write, so each is linearizable.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketStore for MemoryStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.events.contains_key(&event.id) {
            return Err(StoreError::UniqueViolation(UniqueKey::EventId));
        }
        inner.events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        Ok(self.inner.lock().events.get(&id).cloned())
    }

    async fn set_capacity_if_above_sold(
        &self,
        event_id: Uuid,
        capacity: i32,
    ) -> StoreResult<Option<Event>> {
        let mut inner = self.inner.lock();
        match inner.events.get_mut(&event_id) {
            Some(event) if capacity >= event.tickets_sold => {
                event.capacity = capacity;
                event.updated_at = Utc::now();
                Ok(Some(event.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_event_if_unsold(&self, event_id: Uuid) -> StoreResult<DeleteOutcome> {
        let mut inner = self.inner.lock();
        if !inner.events.contains_key(&event_id) {
            return Ok(DeleteOutcome::NotFound);
        }
        if inner
            .tickets
            .values()
            .any(|t| t.event_id == event_id && t.status.is_live())
        {
            return Ok(DeleteOutcome::HasLiveTickets);
        }

        let doomed: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        for ticket in doomed {
            inner.tickets.remove(&ticket.id);
            inner.by_number.remove(&ticket.ticket_number);
            inner.by_order.remove(&ticket.order_reference);
        }
        inner.orders.retain(|_, order| order.event_id != event_id);
        inner.events.remove(&event_id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_ticket_with_slot(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Event>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(event) = inner.events.get_mut(&ticket.event_id) else {
            return Ok(None);
        };
        if !has_free_slot(event, now) {
            return Ok(None);
        }

        if inner.by_number.contains_key(&ticket.ticket_number) {
            return Err(StoreError::UniqueViolation(UniqueKey::TicketNumber));
        }
        if inner.by_order.contains_key(&ticket.order_reference) {
            return Err(StoreError::UniqueViolation(UniqueKey::OrderReference));
        }
        if ticket.status.is_live()
            && inner.tickets.values().any(|t| {
                t.event_id == ticket.event_id && t.attendee_id == ticket.attendee_id && t.status.is_live()
            })
        {
            return Err(StoreError::UniqueViolation(UniqueKey::LiveAttendeeTicket));
        }

        event.tickets_sold += 1;
        event.updated_at = now;
        let event = event.clone();

        inner
            .by_number
            .insert(ticket.ticket_number.clone(), ticket.id);
        inner
            .by_order
            .insert(ticket.order_reference.clone(), ticket.id);
        inner.tickets.insert(ticket.id, ticket.clone());
        Ok(Some(event))
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.lock().tickets.get(&id).cloned())
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_number
            .get(ticket_number)
            .and_then(|id| inner.tickets.get(id))
            .cloned())
    }

    async fn find_ticket_by_order(&self, order_reference: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.inner.lock();
        Ok(inner
            .by_order
            .get(order_reference)
            .and_then(|id| inner.tickets.get(id))
            .cloned())
    }

    async fn find_live_ticket(
        &self,
        event_id: Uuid,
        attendee_id: Uuid,
    ) -> StoreResult<Option<Ticket>> {
        Ok(self.inner.lock().live_ticket(event_id, attendee_id).cloned())
    }

    async fn list_event_tickets(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock();
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| t.created_at);
        Ok(tickets)
    }

    async fn list_attendee_tickets(&self, attendee_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let inner = self.inner.lock();
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.attendee_id == attendee_id)
            .cloned()
            .collect();
        tickets.sort_by_key(|t| std::cmp::Reverse(t.created_at));
        Ok(tickets)
    }

    async fn mark_checked_in(
        &self,
        ticket_id: Uuid,
        scanner: &ScanActor,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let mut inner = self.inner.lock();
        match inner.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.status == TicketStatus::Active && !ticket.check_in.is_checked_in => {
                ticket.check_in.is_checked_in = true;
                ticket.check_in.checked_in_at = Some(at);
                ticket.check_in.scanned_by = Some(scanner.id);
                ticket.check_in.scanned_by_name = Some(scanner.name.clone());
                ticket.check_in.scan_count += 1;
                ticket.status = TicketStatus::Used;
                ticket.updated_at = at;
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn record_repeat_scan(&self, ticket_id: Uuid) -> StoreResult<Option<Ticket>> {
        let mut inner = self.inner.lock();
        match inner.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.check_in.is_checked_in => {
                ticket.check_in.scan_count += 1;
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_exited(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ticket>> {
        let mut inner = self.inner.lock();
        match inner.tickets.get_mut(&ticket_id) {
            Some(ticket) if ticket.check_in.is_checked_in => {
                ticket.check_in.exited_at = Some(at);
                ticket.updated_at = at;
                Ok(Some(ticket.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(Ticket, Event)>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let Some(ticket) = inner.tickets.get_mut(&ticket_id) else {
            return Ok(None);
        };
        if ticket.status != TicketStatus::Active || ticket.check_in.is_checked_in {
            return Ok(None);
        }
        let Some(event) = inner.events.get_mut(&ticket.event_id) else {
            return Err(StoreError::Corrupt(format!("ticket {} has no event", ticket_id)));
        };

        ticket.status = TicketStatus::Cancelled;
        ticket.updated_at = at;
        event.tickets_sold = (event.tickets_sold - 1).max(0);
        event.updated_at = at;
        Ok(Some((ticket.clone(), event.clone())))
    }

    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.orders.contains_key(&order.order_id) {
            return Err(StoreError::UniqueViolation(UniqueKey::OrderId));
        }
        inner.orders.insert(order.order_id.clone(), order.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> StoreResult<Option<PaymentOrder>> {
        Ok(self.inner.lock().orders.get(order_id).cloned())
    }

    async fn mark_order_paid(&self, order_id: &str, payment_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(order) = inner.orders.get_mut(order_id) {
            order.status = OrderStatus::Paid;
            order.payment_id = Some(payment_id.to_string());
        }
        Ok(())
    }
}
