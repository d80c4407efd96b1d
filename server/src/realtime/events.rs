use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a published message is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Everyone who joined the event's room.
    Event(Uuid),
    /// A user's private channel, joined implicitly at connect.
    User(Uuid),
}

/// Domain notifications fanned out to sockets. Every payload names the event,
/// the acting entity and a timestamp.
///
/// These are refresh hints only; clients re-query state through the REST API.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    TicketBooked {
        event_id: Uuid,
        ticket_id: Uuid,
        ticket_number: String,
        attendee_id: Uuid,
        attendee_name: String,
        tickets_sold: i32,
        capacity: i32,
        timestamp: DateTime<Utc>,
    },
    TicketCancelled {
        event_id: Uuid,
        ticket_id: Uuid,
        ticket_number: String,
        attendee_id: Uuid,
        cancelled_by: Uuid,
        cancelled_by_name: String,
        tickets_sold: i32,
        timestamp: DateTime<Utc>,
    },
    AttendeeCheckedIn {
        event_id: Uuid,
        ticket_id: Uuid,
        ticket_number: String,
        attendee_id: Uuid,
        attendee_name: String,
        scanned_by: Uuid,
        scanned_by_name: String,
        timestamp: DateTime<Utc>,
    },
    AttendeeExited {
        event_id: Uuid,
        ticket_id: Uuid,
        ticket_number: String,
        attendee_id: Uuid,
        scanned_by: Uuid,
        scanned_by_name: String,
        timestamp: DateTime<Utc>,
    },
    EventUpdated {
        event_id: Uuid,
        updated_by: Uuid,
        updated_by_name: String,
        capacity: i32,
        tickets_sold: i32,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::TicketBooked { .. } => "ticket_booked",
            DomainEvent::TicketCancelled { .. } => "ticket_cancelled",
            DomainEvent::AttendeeCheckedIn { .. } => "attendee_checked_in",
            DomainEvent::AttendeeExited { .. } => "attendee_exited",
            DomainEvent::EventUpdated { .. } => "event_updated",
        }
    }

    pub fn event_id(&self) -> Uuid {
        match self {
            DomainEvent::TicketBooked { event_id, .. }
            | DomainEvent::TicketCancelled { event_id, .. }
            | DomainEvent::AttendeeCheckedIn { event_id, .. }
            | DomainEvent::AttendeeExited { event_id, .. }
            | DomainEvent::EventUpdated { event_id, .. } => *event_id,
        }
    }
}

/// Frames a client sends over the socket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientFrame {
    JoinEvent { event_id: Uuid },
    LeaveEvent { event_id: Uuid },
    Ping,
}

/// Control frames the server sends besides domain events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerFrame {
    Connected { connection_id: Uuid, user_id: Uuid },
    JoinedEvent { event_id: Uuid },
    LeftEvent { event_id: Uuid },
    Pong,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_events_are_tagged_with_their_wire_name() {
        let event = DomainEvent::AttendeeCheckedIn {
            event_id: Uuid::new_v4(),
            ticket_id: Uuid::new_v4(),
            ticket_number: "TCK1".to_string(),
            attendee_id: Uuid::new_v4(),
            attendee_name: "Ada".to_string(),
            scanned_by: Uuid::new_v4(),
            scanned_by_name: "Gate 1".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.kind());
        assert_eq!(json["scannedByName"], "Gate 1");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn client_frames_parse() {
        let id = Uuid::new_v4();
        let frame: ClientFrame =
            serde_json::from_str(&format!(r#"{{"type":"join_event","eventId":"{}"}}"#, id)).unwrap();
        assert_eq!(frame, ClientFrame::JoinEvent { event_id: id });

        let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientFrame::Ping);
    }
}
