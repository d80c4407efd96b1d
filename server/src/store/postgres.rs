use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use super::{DeleteOutcome, ScanActor, StoreError, StoreResult, TicketStore, UniqueKey};
use crate::models::{AttendeeInfo, CheckIn, Event, PaymentOrder, Ticket};

const EVENT_COLUMNS: &str = "id, host_id, title, venue, capacity, tickets_sold, price, status, \
     start_time, end_time, created_at, updated_at";

const TICKET_COLUMNS: &str = "id, event_id, attendee_id, attendee_name, attendee_email, \
     attendee_phone, ticket_number, order_reference, price_paid, payment_status, status, \
     is_checked_in, checked_in_at, scanned_by, scanned_by_name, scan_count, exited_at, \
     created_at, updated_at";

const ORDER_COLUMNS: &str =
    "order_id, event_id, attendee_id, amount_minor, currency, status, payment_id, created_at";

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    host_id: Uuid,
    title: String,
    venue: Option<String>,
    capacity: i32,
    tickets_sold: i32,
    price: Decimal,
    status: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for Event {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(Event {
            id: row.id,
            host_id: row.host_id,
            title: row.title,
            venue: row.venue,
            capacity: row.capacity,
            tickets_sold: row.tickets_sold,
            price: row.price,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            start_time: row.start_time,
            end_time: row.end_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    attendee_id: Uuid,
    attendee_name: String,
    attendee_email: String,
    attendee_phone: Option<String>,
    ticket_number: String,
    order_reference: String,
    price_paid: Decimal,
    payment_status: String,
    status: String,
    is_checked_in: bool,
    checked_in_at: Option<DateTime<Utc>>,
    scanned_by: Option<Uuid>,
    scanned_by_name: Option<String>,
    scan_count: i32,
    exited_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = StoreError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            event_id: row.event_id,
            attendee_id: row.attendee_id,
            attendee: AttendeeInfo {
                name: row.attendee_name,
                email: row.attendee_email,
                phone: row.attendee_phone,
            },
            ticket_number: row.ticket_number,
            order_reference: row.order_reference,
            price_paid: row.price_paid,
            payment_status: row.payment_status.parse().map_err(StoreError::Corrupt)?,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            check_in: CheckIn {
                is_checked_in: row.is_checked_in,
                checked_in_at: row.checked_in_at,
                scanned_by: row.scanned_by,
                scanned_by_name: row.scanned_by_name,
                scan_count: row.scan_count,
                exited_at: row.exited_at,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    order_id: String,
    event_id: Uuid,
    attendee_id: Uuid,
    amount_minor: i64,
    currency: String,
    status: String,
    payment_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for PaymentOrder {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(PaymentOrder {
            order_id: row.order_id,
            event_id: row.event_id,
            attendee_id: row.attendee_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            payment_id: row.payment_id,
            created_at: row.created_at,
        })
    }
}

/// Maps Postgres unique violations onto the constraint they hit.
fn classify(err: sqlx::Error) -> StoreError {
    let key = match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => match db.constraint() {
            Some("tickets_ticket_number_key") => Some(UniqueKey::TicketNumber),
            Some("tickets_order_reference_key") => Some(UniqueKey::OrderReference),
            Some("tickets_one_live_per_attendee") => Some(UniqueKey::LiveAttendeeTicket),
            Some("events_pkey") => Some(UniqueKey::EventId),
            Some("payment_orders_pkey") => Some(UniqueKey::OrderId),
            _ => None,
        },
        _ => None,
    };

    match key {
        Some(key) => StoreError::UniqueViolation(key),
        None => StoreError::Database(err),
    }
}

fn event_from(row: Option<EventRow>) -> StoreResult<Option<Event>> {
    row.map(Event::try_from).transpose()
}

fn ticket_from(row: Option<TicketRow>) -> StoreResult<Option<Ticket>> {
    row.map(Ticket::try_from).transpose()
}

fn tickets_from(rows: Vec<TicketRow>) -> StoreResult<Vec<Ticket>> {
    rows.into_iter().map(Ticket::try_from).collect()
}

async fn insert_ticket_row<'e, E>(executor: E, ticket: &Ticket) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        "INSERT INTO tickets (id, event_id, attendee_id, attendee_name, attendee_email, \
         attendee_phone, ticket_number, order_reference, price_paid, payment_status, status, \
         is_checked_in, checked_in_at, scanned_by, scanned_by_name, scan_count, exited_at, \
         created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
    )
    .bind(ticket.id)
    .bind(ticket.event_id)
    .bind(ticket.attendee_id)
    .bind(&ticket.attendee.name)
    .bind(&ticket.attendee.email)
    .bind(&ticket.attendee.phone)
    .bind(&ticket.ticket_number)
    .bind(&ticket.order_reference)
    .bind(ticket.price_paid)
    .bind(ticket.payment_status.as_str())
    .bind(ticket.status.as_str())
    .bind(ticket.check_in.is_checked_in)
    .bind(ticket.check_in.checked_in_at)
    .bind(ticket.check_in.scanned_by)
    .bind(&ticket.check_in.scanned_by_name)
    .bind(ticket.check_in.scan_count)
    .bind(ticket.check_in.exited_at)
    .bind(ticket.created_at)
    .bind(ticket.updated_at)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations");
        sqlx::migrate!().run(&self.pool).await?;
        info!("Migrations run successfully");
        Ok(())
    }

    async fn fetch_ticket_where(&self, clause: &str, value: &str) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE {} = $1", TICKET_COLUMNS, clause);
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }
}

#[async_trait]
impl TicketStore for PgStore {
    async fn insert_event(&self, event: &Event) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO events (id, host_id, title, venue, capacity, tickets_sold, price, status, \
             start_time, end_time, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(event.id)
        .bind(event.host_id)
        .bind(&event.title)
        .bind(&event.venue)
        .bind(event.capacity)
        .bind(event.tickets_sold)
        .bind(event.price)
        .bind(event.status.as_str())
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> StoreResult<Option<Event>> {
        let sql = format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS);
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        event_from(row)
    }

    async fn set_capacity_if_above_sold(
        &self,
        event_id: Uuid,
        capacity: i32,
    ) -> StoreResult<Option<Event>> {
        let sql = format!(
            "UPDATE events SET capacity = $2, updated_at = NOW() \
             WHERE id = $1 AND $2 >= tickets_sold RETURNING {}",
            EVENT_COLUMNS
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(event_id)
            .bind(capacity)
            .fetch_optional(&self.pool)
            .await?;
        event_from(row)
    }

    async fn delete_event_if_unsold(&self, event_id: Uuid) -> StoreResult<DeleteOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock keeps concurrent reservations out until the delete commits.
        let locked: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM events WHERE id = $1 FOR UPDATE")
                .bind(event_id)
                .fetch_optional(&mut *tx)
                .await?;
        if locked.is_none() {
            return Ok(DeleteOutcome::NotFound);
        }

        let (live,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tickets WHERE event_id = $1 AND status IN ('active', 'used')",
        )
        .bind(event_id)
        .fetch_one(&mut *tx)
        .await?;
        if live > 0 {
            return Ok(DeleteOutcome::HasLiveTickets);
        }

        sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn insert_ticket_with_slot(
        &self,
        ticket: &Ticket,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<Event>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE events SET tickets_sold = tickets_sold + 1, updated_at = $2 \
             WHERE id = $1 AND status = 'published' AND start_time > $2 \
             AND tickets_sold < capacity RETURNING {}",
            EVENT_COLUMNS
        );
        let Some(row) = sqlx::query_as::<_, EventRow>(&sql)
            .bind(ticket.event_id)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        // Dropping `tx` on error rolls the increment back.
        insert_ticket_row(&mut *tx, ticket).await.map_err(classify)?;
        tx.commit().await?;
        event_from(Some(row))
    }

    async fn get_ticket(&self, id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = $1", TICKET_COLUMNS);
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }

    async fn find_ticket_by_number(&self, ticket_number: &str) -> StoreResult<Option<Ticket>> {
        self.fetch_ticket_where("ticket_number", ticket_number).await
    }

    async fn find_ticket_by_order(&self, order_reference: &str) -> StoreResult<Option<Ticket>> {
        self.fetch_ticket_where("order_reference", order_reference).await
    }

    async fn find_live_ticket(
        &self,
        event_id: Uuid,
        attendee_id: Uuid,
    ) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE event_id = $1 AND attendee_id = $2 \
             AND status IN ('active', 'used')",
            TICKET_COLUMNS
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(event_id)
            .bind(attendee_id)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }

    async fn list_event_tickets(&self, event_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE event_id = $1 ORDER BY created_at",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;
        tickets_from(rows)
    }

    async fn list_attendee_tickets(&self, attendee_id: Uuid) -> StoreResult<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE attendee_id = $1 ORDER BY created_at DESC",
            TICKET_COLUMNS
        );
        let rows = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(attendee_id)
            .fetch_all(&self.pool)
            .await?;
        tickets_from(rows)
    }

    async fn mark_checked_in(
        &self,
        ticket_id: Uuid,
        scanner: &ScanActor,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET is_checked_in = TRUE, checked_in_at = $2, scanned_by = $3, \
             scanned_by_name = $4, scan_count = scan_count + 1, status = 'used', updated_at = $2 \
             WHERE id = $1 AND status = 'active' AND is_checked_in = FALSE RETURNING {}",
            TICKET_COLUMNS
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .bind(at)
            .bind(scanner.id)
            .bind(&scanner.name)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }

    async fn record_repeat_scan(&self, ticket_id: Uuid) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET scan_count = scan_count + 1 \
             WHERE id = $1 AND is_checked_in = TRUE RETURNING {}",
            TICKET_COLUMNS
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }

    async fn mark_exited(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET exited_at = $2, updated_at = $2 \
             WHERE id = $1 AND is_checked_in = TRUE RETURNING {}",
            TICKET_COLUMNS
        );
        let row = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;
        ticket_from(row)
    }

    async fn cancel_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<(Ticket, Event)>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "UPDATE tickets SET status = 'cancelled', updated_at = $2 \
             WHERE id = $1 AND status = 'active' AND is_checked_in = FALSE RETURNING {}",
            TICKET_COLUMNS
        );
        let Some(ticket_row) = sqlx::query_as::<_, TicketRow>(&sql)
            .bind(ticket_id)
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };
        let ticket = Ticket::try_from(ticket_row)?;

        let sql = format!(
            "UPDATE events SET tickets_sold = GREATEST(tickets_sold - 1, 0), updated_at = $2 \
             WHERE id = $1 RETURNING {}",
            EVENT_COLUMNS
        );
        let event_row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(ticket.event_id)
            .bind(at)
            .fetch_one(&mut *tx)
            .await?;
        let event = Event::try_from(event_row)?;

        tx.commit().await?;
        Ok(Some((ticket, event)))
    }

    async fn insert_order(&self, order: &PaymentOrder) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO payment_orders (order_id, event_id, attendee_id, amount_minor, currency, \
             status, payment_id, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&order.order_id)
        .bind(order.event_id)
        .bind(order.attendee_id)
        .bind(order.amount_minor)
        .bind(&order.currency)
        .bind(order.status.as_str())
        .bind(&order.payment_id)
        .bind(order.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> StoreResult<Option<PaymentOrder>> {
        let sql = format!("SELECT {} FROM payment_orders WHERE order_id = $1", ORDER_COLUMNS);
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PaymentOrder::try_from).transpose()
    }

    async fn mark_order_paid(&self, order_id: &str, payment_id: &str) -> StoreResult<()> {
        sqlx::query("UPDATE payment_orders SET status = 'paid', payment_id = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(payment_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
