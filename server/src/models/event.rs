use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Draft => "draft",
            EventStatus::Published => "published",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "cancelled" => Ok(EventStatus::Cancelled),
            other => Err(format!("unknown event status '{}'", other)),
        }
    }
}

/// Why an event cannot take a booking right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotBookable {
    Status(EventStatus),
    AlreadyStarted,
}

impl fmt::Display for NotBookable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotBookable::Status(EventStatus::Cancelled) => f.write_str("Event has been cancelled"),
            NotBookable::Status(status) => write!(f, "Event is not open for booking (status: {})", status),
            NotBookable::AlreadyStarted => f.write_str("Event has already started"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub host_id: Uuid,
    pub title: String,
    pub venue: Option<String>,
    pub capacity: i32,
    pub tickets_sold: i32,
    pub price: Decimal,
    pub status: EventStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Event {
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }

    pub fn remaining(&self) -> i32 {
        (self.capacity - self.tickets_sold).max(0)
    }

    pub fn is_sold_out(&self) -> bool {
        self.tickets_sold >= self.capacity
    }

    /// Status and timing preconditions for a reservation. Capacity is not
    /// checked here; only the ledger's conditional increment decides that.
    pub fn check_bookable(&self, now: DateTime<Utc>) -> Result<(), NotBookable> {
        if self.status != EventStatus::Published {
            return Err(NotBookable::Status(self.status));
        }
        if self.start_time <= now {
            return Err(NotBookable::AlreadyStarted);
        }
        Ok(())
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        now > self.end_time
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::Duration;

    pub fn published_event(capacity: i32) -> Event {
        let now = Utc::now();
        Event {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            title: "Rust Meetup".to_string(),
            venue: Some("Hall A".to_string()),
            capacity,
            tickets_sold: 0,
            price: Decimal::ZERO,
            status: EventStatus::Published,
            start_time: now + Duration::days(3),
            end_time: now + Duration::days(3) + Duration::hours(4),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::published_event;
    use super::*;
    use chrono::Duration;

    #[test]
    fn draft_and_cancelled_events_are_not_bookable() {
        let now = Utc::now();
        let mut event = published_event(10);
        assert!(event.check_bookable(now).is_ok());

        event.status = EventStatus::Draft;
        assert_eq!(
            event.check_bookable(now),
            Err(NotBookable::Status(EventStatus::Draft))
        );

        event.status = EventStatus::Cancelled;
        assert_eq!(
            event.check_bookable(now).unwrap_err().to_string(),
            "Event has been cancelled"
        );
    }

    #[test]
    fn started_event_is_not_bookable() {
        let event = published_event(10);
        let at_start = event.start_time;
        assert_eq!(event.check_bookable(at_start), Err(NotBookable::AlreadyStarted));
        assert!(event.check_bookable(at_start - Duration::seconds(1)).is_ok());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [EventStatus::Draft, EventStatus::Published, EventStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<EventStatus>(), Ok(status));
        }
        assert!("archived".parse::<EventStatus>().is_err());
    }
}
