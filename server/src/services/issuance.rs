//! Idempotent Issuance.
//!
//! An order reference maps to at most one ticket. Replays of the same
//! reference return that ticket without touching capacity again; the store's
//! unique index on `order_reference` settles concurrent first calls.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::capacity::{CapacityLedger, ReserveError};
use crate::models::ticket::generate_ticket_number;
use crate::models::{AttendeeInfo, CheckIn, PaymentStatus, Ticket, TicketStatus};
use crate::realtime::{Broadcaster, DomainEvent, Scope};
use crate::store::{StoreError, TicketStore, UniqueKey};
use crate::utils::error::AppError;

const TICKET_NUMBER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub order_reference: String,
    pub event_id: Uuid,
    pub attendee_id: Uuid,
    pub attendee: AttendeeInfo,
    pub price_paid: Decimal,
    pub payment_status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct Issued {
    pub ticket: Ticket,
    /// True when the order had already been materialized.
    pub replayed: bool,
}

pub struct TicketIssuer {
    store: Arc<dyn TicketStore>,
    ledger: Arc<CapacityLedger>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl TicketIssuer {
    pub fn new(
        store: Arc<dyn TicketStore>,
        ledger: Arc<CapacityLedger>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            ledger,
            broadcaster,
        }
    }

    pub async fn materialize(&self, request: IssueRequest, now: DateTime<Utc>) -> Result<Issued, AppError> {
        if let Some(existing) = self.store.find_ticket_by_order(&request.order_reference).await? {
            return replay(&request, existing);
        }

        if let Some(live) = self
            .store
            .find_live_ticket(request.event_id, request.attendee_id)
            .await?
        {
            // A concurrent call for this same order may have landed in between.
            if live.order_reference == request.order_reference {
                return replay(&request, live);
            }
            return Err(duplicate(live));
        }

        let mut attempt = 0;
        let (ticket, event) = loop {
            attempt += 1;
            let ticket = new_ticket(&request, now);
            match self.ledger.try_reserve(&ticket, now).await {
                Ok(event) => break (ticket, event),
                Err(ReserveError::Store(StoreError::UniqueViolation(UniqueKey::TicketNumber)))
                    if attempt < TICKET_NUMBER_ATTEMPTS =>
                {
                    debug!(ticket_number = %ticket.ticket_number, attempt, "Ticket number collision, regenerating");
                }
                Err(ReserveError::Refused(err)) => return Err(err),
                Err(ReserveError::Store(err)) => return self.settle(&request, err).await,
            }
        };

        info!(
            ticket_id = %ticket.id,
            ticket_number = %ticket.ticket_number,
            event_id = %ticket.event_id,
            attendee_id = %ticket.attendee_id,
            order_reference = %ticket.order_reference,
            "Ticket issued"
        );

        self.broadcaster.publish_many(
            &[Scope::Event(ticket.event_id), Scope::User(ticket.attendee_id)],
            &DomainEvent::TicketBooked {
                event_id: ticket.event_id,
                ticket_id: ticket.id,
                ticket_number: ticket.ticket_number.clone(),
                attendee_id: ticket.attendee_id,
                attendee_name: ticket.attendee.name.clone(),
                tickets_sold: event.tickets_sold,
                capacity: event.capacity,
                timestamp: now,
            },
        );

        Ok(Issued {
            ticket,
            replayed: false,
        })
    }

    /// Maps a failed insert. No slot was kept, so a lost race on the order
    /// reference is not an error: the winner's ticket is returned.
    async fn settle(&self, request: &IssueRequest, err: StoreError) -> Result<Issued, AppError> {
        match err {
            StoreError::UniqueViolation(UniqueKey::OrderReference) => {
                let winner = self
                    .store
                    .find_ticket_by_order(&request.order_reference)
                    .await?
                    .ok_or_else(|| {
                        AppError::InternalServerError(format!(
                            "Order {} reported as issued but not found",
                            request.order_reference
                        ))
                    })?;
                replay(request, winner)
            }
            StoreError::UniqueViolation(UniqueKey::LiveAttendeeTicket) => {
                // Postgres may report either index when a retry of the same
                // order races its original.
                if let Some(winner) = self.store.find_ticket_by_order(&request.order_reference).await? {
                    return replay(request, winner);
                }
                match self
                    .store
                    .find_live_ticket(request.event_id, request.attendee_id)
                    .await?
                {
                    Some(live) => Err(duplicate(live)),
                    None => Err(AppError::Conflict(
                        "Another booking for this attendee is in progress".to_string(),
                    )),
                }
            }
            other => {
                warn!(
                    event_id = %request.event_id,
                    order_reference = %request.order_reference,
                    error = %other,
                    "Ticket insert failed"
                );
                Err(other.into())
            }
        }
    }
}

fn replay(request: &IssueRequest, existing: Ticket) -> Result<Issued, AppError> {
    if existing.event_id != request.event_id || existing.attendee_id != request.attendee_id {
        return Err(AppError::Conflict(format!(
            "Order {} belongs to a different booking",
            request.order_reference
        )));
    }
    if existing.status == TicketStatus::Cancelled {
        return Err(AppError::Conflict(format!(
            "Order {} was cancelled; start a new booking to get another ticket",
            request.order_reference
        )));
    }
    info!(
        ticket_id = %existing.id,
        order_reference = %existing.order_reference,
        "Order already materialized, returning existing ticket"
    );
    Ok(Issued {
        ticket: existing,
        replayed: true,
    })
}

fn duplicate(live: Ticket) -> AppError {
    AppError::DuplicateBooking {
        ticket_id: live.id,
        ticket_number: live.ticket_number,
    }
}

fn new_ticket(request: &IssueRequest, now: DateTime<Utc>) -> Ticket {
    Ticket {
        id: Uuid::new_v4(),
        event_id: request.event_id,
        attendee_id: request.attendee_id,
        attendee: request.attendee.clone(),
        ticket_number: generate_ticket_number(now),
        order_reference: request.order_reference.clone(),
        price_paid: request.price_paid,
        payment_status: request.payment_status,
        status: TicketStatus::Active,
        check_in: CheckIn::default(),
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::fixtures::published_event;
    use crate::realtime::{ConnectionRegistry, LocalBroadcaster};
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        issuer: TicketIssuer,
        registry: Arc<ConnectionRegistry>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster: Arc<dyn Broadcaster> = Arc::new(LocalBroadcaster::new(registry.clone()));
        let ledger = Arc::new(CapacityLedger::new(store.clone(), broadcaster.clone()));
        let issuer = TicketIssuer::new(store.clone(), ledger, broadcaster);
        Harness {
            store,
            issuer,
            registry,
        }
    }

    fn request(event_id: Uuid, attendee_id: Uuid, order: &str) -> IssueRequest {
        IssueRequest {
            order_reference: order.to_string(),
            event_id,
            attendee_id,
            attendee: AttendeeInfo {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                phone: None,
            },
            price_paid: Decimal::ZERO,
            payment_status: PaymentStatus::Free,
        }
    }

    async fn sold(store: &MemoryStore, event_id: Uuid) -> i32 {
        store.get_event(event_id).await.unwrap().unwrap().tickets_sold
    }

    #[tokio::test]
    async fn replaying_an_order_returns_the_same_ticket() {
        let h = harness();
        let event = published_event(5);
        h.store.insert_event(&event).await.unwrap();
        let attendee = Uuid::new_v4();

        let first = h
            .issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap();
        let second = h
            .issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.ticket.id, second.ticket.id);
        assert_eq!(sold(&h.store, event.id).await, 1);
    }

    #[tokio::test]
    async fn second_order_for_same_attendee_is_a_duplicate() {
        let h = harness();
        let event = published_event(5);
        h.store.insert_event(&event).await.unwrap();
        let attendee = Uuid::new_v4();

        let first = h
            .issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap();
        let err = h
            .issuer
            .materialize(request(event.id, attendee, "order_2"), Utc::now())
            .await
            .unwrap_err();

        match err {
            AppError::DuplicateBooking { ticket_id, .. } => assert_eq!(ticket_id, first.ticket.id),
            other => panic!("expected duplicate booking, got {:?}", other),
        }
        assert_eq!(sold(&h.store, event.id).await, 1);
    }

    #[tokio::test]
    async fn order_reused_for_another_attendee_conflicts() {
        let h = harness();
        let event = published_event(5);
        h.store.insert_event(&event).await.unwrap();

        h.issuer
            .materialize(request(event.id, Uuid::new_v4(), "order_1"), Utc::now())
            .await
            .unwrap();
        let err = h
            .issuer
            .materialize(request(event.id, Uuid::new_v4(), "order_1"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(sold(&h.store, event.id).await, 1);
    }

    #[tokio::test]
    async fn issuance_notifies_room_and_owner() {
        let h = harness();
        let event = published_event(5);
        h.store.insert_event(&event).await.unwrap();
        let attendee = Uuid::new_v4();

        let (watcher, mut room_rx) = h.registry.connect(Uuid::new_v4());
        h.registry.join(watcher, Scope::Event(event.id));
        let (_owner, mut owner_rx) = h.registry.connect(attendee);

        h.issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap();

        for rx in [&mut room_rx, &mut owner_rx] {
            let payload: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
            assert_eq!(payload["type"], "ticket_booked");
            assert_eq!(payload["ticketsSold"], 1);
        }
    }

    #[tokio::test]
    async fn cancelled_order_is_not_replayed() {
        let h = harness();
        let event = published_event(5);
        h.store.insert_event(&event).await.unwrap();
        let attendee = Uuid::new_v4();

        let issued = h
            .issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap();
        h.store.cancel_ticket(issued.ticket.id, Utc::now()).await.unwrap().unwrap();

        let err = h
            .issuer
            .materialize(request(event.id, attendee, "order_1"), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(ref msg) if msg.contains("cancelled")));
        assert_eq!(sold(&h.store, event.id).await, 0);

        h.issuer
            .materialize(request(event.id, attendee, "order_2"), Utc::now())
            .await
            .unwrap();
        assert_eq!(sold(&h.store, event.id).await, 1);
    }

    #[tokio::test]
    async fn sold_out_event_takes_no_ticket() {
        let h = harness();
        let event = published_event(1);
        h.store.insert_event(&event).await.unwrap();

        h.issuer
            .materialize(request(event.id, Uuid::new_v4(), "order_1"), Utc::now())
            .await
            .unwrap();
        let err = h
            .issuer
            .materialize(request(event.id, Uuid::new_v4(), "order_2"), Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CapacityExceeded { .. }));
        assert!(h.store.find_ticket_by_order("order_2").await.unwrap().is_none());
        assert_eq!(sold(&h.store, event.id).await, 1);
    }
}
