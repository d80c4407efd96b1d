//! Capacity Ledger.
//!
//! `tickets_sold <= capacity` holds because the only writes to the counter are
//! store operations that move it together with the ticket they account for:
//! a slot is taken in the same unit as the ticket insert, and given back in
//! the same unit as the cancellation. A refused slot is explained after the
//! fact by re-reading the event; the read never gates the write.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::{Event, Ticket};
use crate::realtime::{Broadcaster, DomainEvent, Scope};
use crate::store::{StoreError, TicketStore};
use crate::utils::error::AppError;

/// Why no slot was taken for a ticket. In both cases `tickets_sold` is as it
/// was before the call.
#[derive(Debug)]
pub enum ReserveError {
    /// Sold out, not bookable or unknown.
    Refused(AppError),
    /// The ticket insert failed and took the increment down with it.
    Store(StoreError),
}

pub struct CapacityLedger {
    store: Arc<dyn TicketStore>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl CapacityLedger {
    pub fn new(store: Arc<dyn TicketStore>, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Reserves a slot for `ticket` and stores the ticket with it. Returns the
    /// event as it stood right after the increment.
    pub async fn try_reserve(&self, ticket: &Ticket, now: DateTime<Utc>) -> Result<Event, ReserveError> {
        let event_id = ticket.event_id;
        match self.store.insert_ticket_with_slot(ticket, now).await {
            Ok(Some(event)) => {
                info!(
                    event_id = %event_id,
                    ticket_id = %ticket.id,
                    tickets_sold = event.tickets_sold,
                    remaining = event.remaining(),
                    "Capacity reserved"
                );
                Ok(event)
            }
            Ok(None) => Err(ReserveError::Refused(self.refusal(event_id, now).await)),
            Err(err) => Err(ReserveError::Store(err)),
        }
    }

    /// Cancels an active ticket and releases its slot in one store operation.
    /// `None` when the ticket was no longer active.
    pub async fn release(&self, ticket_id: Uuid, at: DateTime<Utc>) -> Result<Option<(Ticket, Event)>, AppError> {
        let released = self.store.cancel_ticket(ticket_id, at).await?;
        if let Some((ticket, event)) = &released {
            info!(
                event_id = %event.id,
                ticket_id = %ticket.id,
                tickets_sold = event.tickets_sold,
                "Capacity released"
            );
        }
        Ok(released)
    }

    async fn refusal(&self, event_id: Uuid, now: DateTime<Utc>) -> AppError {
        let event = match self.store.get_event(event_id).await {
            Ok(Some(event)) => event,
            Ok(None) => return AppError::NotFound(format!("Event {} not found", event_id)),
            Err(err) => return err.into(),
        };

        if let Err(reason) = event.check_bookable(now) {
            return AppError::EventNotBookable(reason.to_string());
        }

        warn!(event_id = %event_id, capacity = event.capacity, "Capacity exhausted");
        AppError::CapacityExceeded {
            event_id,
            capacity: event.capacity,
        }
    }

    /// Changes an event's capacity. Lowering it below the tickets already
    /// sold is refused.
    pub async fn resize(&self, event_id: Uuid, capacity: i32, actor: &AuthUser) -> Result<Event, AppError> {
        if capacity <= 0 {
            return Err(AppError::ValidationError("Capacity must be a positive number".to_string()));
        }

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;
        if !actor.may_manage(&event) {
            return Err(AppError::Forbidden("Only the event host can change its capacity".to_string()));
        }

        let updated = match self.store.set_capacity_if_above_sold(event_id, capacity).await? {
            Some(updated) => updated,
            None => {
                let sold = self
                    .store
                    .get_event(event_id)
                    .await?
                    .map(|e| e.tickets_sold)
                    .unwrap_or(event.tickets_sold);
                return Err(AppError::ValidationError(format!(
                    "Capacity cannot be lowered below the {} tickets already sold",
                    sold
                )));
            }
        };

        info!(
            event_id = %event_id,
            capacity = updated.capacity,
            tickets_sold = updated.tickets_sold,
            updated_by = %actor.user_id,
            "Capacity changed"
        );
        self.broadcaster.publish(
            Scope::Event(event_id),
            &DomainEvent::EventUpdated {
                event_id,
                updated_by: actor.user_id,
                updated_by_name: actor.name.clone(),
                capacity: updated.capacity,
                tickets_sold: updated.tickets_sold,
                timestamp: updated.updated_at,
            },
        );
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::models::event::fixtures::published_event;
    use crate::models::{AttendeeInfo, CheckIn, EventStatus, PaymentStatus, TicketStatus};
    use crate::realtime::{ConnectionRegistry, LocalBroadcaster};
    use crate::store::{MemoryStore, UniqueKey};
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn ledger(store: Arc<MemoryStore>) -> CapacityLedger {
        let broadcaster = Arc::new(LocalBroadcaster::new(Arc::new(ConnectionRegistry::new())));
        CapacityLedger::new(store, broadcaster)
    }

    fn ticket_for(event: &Event) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: Uuid::new_v4(),
            event_id: event.id,
            attendee_id: Uuid::new_v4(),
            attendee: AttendeeInfo {
                name: "Lin".to_string(),
                email: "lin@example.com".to_string(),
                phone: None,
            },
            ticket_number: format!("TCK{}", Uuid::new_v4().simple()),
            order_reference: format!("order_{}", Uuid::new_v4().simple()),
            price_paid: Decimal::ZERO,
            payment_status: PaymentStatus::Free,
            status: TicketStatus::Active,
            check_in: CheckIn::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn host_of(event: &Event) -> AuthUser {
        AuthUser {
            user_id: event.host_id,
            name: "Host".to_string(),
            email: None,
            role: Role::Organizer,
            capabilities: Role::Organizer.capabilities(),
        }
    }

    #[tokio::test]
    async fn reserve_until_full_then_release() {
        let store = Arc::new(MemoryStore::new());
        let event = published_event(1);
        store.insert_event(&event).await.unwrap();
        let ledger = ledger(store.clone());
        let now = Utc::now();

        let first = ticket_for(&event);
        assert_eq!(ledger.try_reserve(&first, now).await.unwrap().tickets_sold, 1);

        let err = ledger.try_reserve(&ticket_for(&event), now).await.unwrap_err();
        assert!(matches!(
            err,
            ReserveError::Refused(AppError::CapacityExceeded { capacity: 1, .. })
        ));

        let (cancelled, after) = ledger.release(first.id, now).await.unwrap().unwrap();
        assert_eq!(cancelled.status, TicketStatus::Cancelled);
        assert_eq!(after.tickets_sold, 0);
        assert!(ledger.release(first.id, now).await.unwrap().is_none());

        ledger.try_reserve(&ticket_for(&event), now).await.unwrap();
        assert_eq!(store.get_event(event.id).await.unwrap().unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn failed_insert_takes_no_slot() {
        let store = Arc::new(MemoryStore::new());
        let event = published_event(2);
        store.insert_event(&event).await.unwrap();
        let ledger = ledger(store.clone());
        let now = Utc::now();

        let first = ticket_for(&event);
        ledger.try_reserve(&first, now).await.unwrap();

        let mut clash = ticket_for(&event);
        clash.ticket_number = first.ticket_number.clone();
        assert!(matches!(
            ledger.try_reserve(&clash, now).await,
            Err(ReserveError::Store(StoreError::UniqueViolation(UniqueKey::TicketNumber)))
        ));
        assert_eq!(store.get_event(event.id).await.unwrap().unwrap().tickets_sold, 1);
    }

    #[tokio::test]
    async fn unbookable_events_are_explained() {
        let store = Arc::new(MemoryStore::new());
        let mut draft = published_event(5);
        draft.status = EventStatus::Draft;
        let mut started = published_event(5);
        started.start_time = Utc::now() - Duration::minutes(5);
        store.insert_event(&draft).await.unwrap();
        store.insert_event(&started).await.unwrap();
        let ledger = ledger(store);
        let mut stray = ticket_for(&draft);
        stray.event_id = Uuid::new_v4();

        assert!(matches!(
            ledger.try_reserve(&ticket_for(&draft), Utc::now()).await,
            Err(ReserveError::Refused(AppError::EventNotBookable(_)))
        ));
        assert!(matches!(
            ledger.try_reserve(&ticket_for(&started), Utc::now()).await,
            Err(ReserveError::Refused(AppError::EventNotBookable(_)))
        ));
        assert!(matches!(
            ledger.try_reserve(&stray, Utc::now()).await,
            Err(ReserveError::Refused(AppError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn resize_cannot_drop_below_sold() {
        let store = Arc::new(MemoryStore::new());
        let event = published_event(3);
        store.insert_event(&event).await.unwrap();
        let ledger = ledger(store);
        let now = Utc::now();
        ledger.try_reserve(&ticket_for(&event), now).await.unwrap();
        ledger.try_reserve(&ticket_for(&event), now).await.unwrap();

        let host = host_of(&event);
        assert!(matches!(
            ledger.resize(event.id, 1, &host).await,
            Err(AppError::ValidationError(_))
        ));
        assert_eq!(ledger.resize(event.id, 2, &host).await.unwrap().capacity, 2);

        let mut stranger = host.clone();
        stranger.user_id = Uuid::new_v4();
        assert!(matches!(
            ledger.resize(event.id, 10, &stranger).await,
            Err(AppError::Forbidden(_))
        ));
    }
}
