use serde::Deserialize;
use uuid::Uuid;

/// One way of finding a ticket from what a scanner read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupKey {
    TicketNumber(String),
    TicketId(Uuid),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QrPayload {
    ticket_number: Option<String>,
    ticket_id: Option<Uuid>,
}

/// Expands a scanned value into lookup keys, in the order they must be tried:
///
/// 1. the value itself as a ticket number;
/// 2. a composite QR payload, either a JSON object (its `ticketNumber`, then
///    its `ticketId`) or `ticketNumber|eventId|attendeeId`;
/// 3. the value as an internal ticket id.
///
/// Duplicates are dropped, keeping the first position.
pub fn lookup_candidates(raw: &str) -> Vec<LookupKey> {
    let raw = raw.trim();
    let mut keys = Vec::new();
    if raw.is_empty() {
        return keys;
    }

    let mut push = |key: LookupKey| {
        if !keys.contains(&key) {
            keys.push(key);
        }
    };

    push(LookupKey::TicketNumber(raw.to_string()));

    if raw.starts_with('{') {
        if let Ok(payload) = serde_json::from_str::<QrPayload>(raw) {
            if let Some(number) = payload.ticket_number.filter(|n| !n.trim().is_empty()) {
                push(LookupKey::TicketNumber(number.trim().to_string()));
            }
            if let Some(id) = payload.ticket_id {
                push(LookupKey::TicketId(id));
            }
        }
    } else if raw.contains('|') {
        if let Some(number) = raw.split('|').next().map(str::trim).filter(|n| !n.is_empty()) {
            push(LookupKey::TicketNumber(number.to_string()));
        }
    }

    if let Ok(id) = Uuid::parse_str(raw) {
        push(LookupKey::TicketId(id));
    }

    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_ticket_number() {
        assert_eq!(
            lookup_candidates("  TCK171234567890012345 "),
            vec![LookupKey::TicketNumber("TCK171234567890012345".to_string())]
        );
    }

    #[test]
    fn json_payload_tries_number_then_id() {
        let id = Uuid::new_v4();
        let raw = format!(r#"{{"ticketNumber":"TCK1","ticketId":"{}","eventId":"x"}}"#, id);
        let keys = lookup_candidates(&raw);
        assert_eq!(keys[0], LookupKey::TicketNumber(raw.clone()));
        assert_eq!(keys[1], LookupKey::TicketNumber("TCK1".to_string()));
        assert_eq!(keys[2], LookupKey::TicketId(id));
        assert_eq!(keys.len(), 3);
    }

    #[test]
    fn pipe_payload_uses_first_segment() {
        let keys = lookup_candidates("TCK9|event|attendee");
        assert_eq!(keys[1], LookupKey::TicketNumber("TCK9".to_string()));
    }

    #[test]
    fn uuid_is_tried_last() {
        let id = Uuid::new_v4();
        let keys = lookup_candidates(&id.to_string());
        assert_eq!(keys.last(), Some(&LookupKey::TicketId(id)));
        assert!(matches!(keys[0], LookupKey::TicketNumber(_)));
    }

    #[test]
    fn blank_input_has_no_candidates() {
        assert!(lookup_candidates("   ").is_empty());
    }
}
