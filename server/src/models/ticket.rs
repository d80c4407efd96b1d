use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attendee::AttendeeInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Active,
    Cancelled,
    Used,
    /// Reporting-only. Never written to storage.
    Expired,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "active",
            TicketStatus::Cancelled => "cancelled",
            TicketStatus::Used => "used",
            TicketStatus::Expired => "expired",
        }
    }

    /// Active and used tickets occupy a slot in `tickets_sold`.
    pub fn is_live(&self) -> bool {
        matches!(self, TicketStatus::Active | TicketStatus::Used)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TicketStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TicketStatus::Active),
            "cancelled" => Ok(TicketStatus::Cancelled),
            "used" => Ok(TicketStatus::Used),
            "expired" => Ok(TicketStatus::Expired),
            other => Err(format!("unknown ticket status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Free,
    Paid,
    Pending,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Free => "free",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Pending => "pending",
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, PaymentStatus::Free | PaymentStatus::Paid)
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PaymentStatus::Free),
            "paid" => Ok(PaymentStatus::Paid),
            "pending" => Ok(PaymentStatus::Pending),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// The single check-in record of a ticket.
///
/// `is_checked_in` goes false -> true once; `scanned_by` and `checked_in_at`
/// always describe that first successful entry scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckIn {
    pub is_checked_in: bool,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub scanned_by: Option<Uuid>,
    pub scanned_by_name: Option<String>,
    pub scan_count: i32,
    pub exited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub attendee_id: Uuid,
    pub attendee: AttendeeInfo,
    pub ticket_number: String,
    pub order_reference: String,
    pub price_paid: Decimal,
    pub payment_status: PaymentStatus,
    pub status: TicketStatus,
    pub check_in: CheckIn,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Status as shown to readers: an active ticket nobody scanned becomes
    /// `expired` once its event is over.
    pub fn effective_status(&self, event_end: DateTime<Utc>, now: DateTime<Utc>) -> TicketStatus {
        if self.status == TicketStatus::Active && !self.check_in.is_checked_in && now > event_end {
            TicketStatus::Expired
        } else {
            self.status
        }
    }

    /// Composite string encoded into the ticket's QR code.
    pub fn qr_payload(&self) -> String {
        serde_json::json!({
            "ticketId": self.id,
            "ticketNumber": self.ticket_number,
            "eventId": self.event_id,
            "attendeeId": self.attendee_id,
        })
        .to_string()
    }
}

/// `TCK<millisecond-timestamp><5-digit-random>`
pub fn generate_ticket_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
    format!("TCK{}{:05}", now.timestamp_millis(), suffix)
}
