use axum::extract::State;
use axum::response::Response;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::{AttendeeInfo, Ticket};
use crate::services::{ScanAction, ScanOutcome, ScanRequest};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::ApiJson;
use crate::utils::response::success;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTicketBody {
    pub event_id: Uuid,
    #[serde(default)]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub qr_code_data: Option<String>,
    /// Informational; the scanner is always the authenticated caller.
    #[serde(default)]
    pub scanner_id: Option<Uuid>,
    #[serde(default)]
    pub action: ScanAction,
}

impl ScanTicketBody {
    /// The ticket number wins when both are sent.
    fn lookup(&self) -> Result<String, AppError> {
        [&self.ticket_number, &self.qr_code_data]
            .into_iter()
            .flatten()
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::ValidationError("ticketNumber or qrCodeData is required".to_string())
            })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanResult {
    ticket_id: Uuid,
    ticket_number: String,
    event_id: Uuid,
    attendee: AttendeeInfo,
    checked_in_at: Option<DateTime<Utc>>,
    exited_at: Option<DateTime<Utc>>,
    scanned_by: Option<Uuid>,
    scanned_by_name: Option<String>,
    scan_count: i32,
}

impl From<Ticket> for ScanResult {
    fn from(ticket: Ticket) -> Self {
        Self {
            ticket_id: ticket.id,
            ticket_number: ticket.ticket_number,
            event_id: ticket.event_id,
            attendee: ticket.attendee,
            checked_in_at: ticket.check_in.checked_in_at,
            exited_at: ticket.check_in.exited_at,
            scanned_by: ticket.check_in.scanned_by,
            scanned_by_name: ticket.check_in.scanned_by_name,
            scan_count: ticket.check_in.scan_count,
        }
    }
}

/// POST /scan-ticket, also mounted as the staff and host variants.
pub async fn scan_ticket(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<ScanTicketBody>,
) -> Result<Response, AppError> {
    let lookup = body.lookup()?;
    if let Some(claimed) = body.scanner_id.filter(|id| *id != user.user_id) {
        debug!(claimed = %claimed, user_id = %user.user_id, "Ignoring scannerId that differs from the caller");
    }

    let outcome = state
        .checkin
        .scan(
            ScanRequest {
                event_id: body.event_id,
                lookup,
                action: body.action,
            },
            &user,
            Utc::now(),
        )
        .await?;

    match outcome {
        ScanOutcome::CheckedInNow(ticket) => Ok(success(ScanResult::from(ticket), "Check-in successful")),
        ScanOutcome::Exited(ticket) => Ok(success(ScanResult::from(ticket), "Exit recorded")),
        ScanOutcome::AlreadyCheckedIn(prior) => Err(AppError::AlreadyCheckedIn(prior)),
        ScanOutcome::Rejected(rejection) => Err(AppError::ScanRejected(rejection)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(ticket_number: Option<&str>, qr: Option<&str>) -> ScanTicketBody {
        ScanTicketBody {
            event_id: Uuid::new_v4(),
            ticket_number: ticket_number.map(str::to_string),
            qr_code_data: qr.map(str::to_string),
            scanner_id: None,
            action: ScanAction::Entry,
        }
    }

    #[test]
    fn lookup_prefers_ticket_number() {
        assert_eq!(body(Some("TCK1"), Some("{}")).lookup().unwrap(), "TCK1");
        assert_eq!(body(Some(" "), Some("TCK2|e|a")).lookup().unwrap(), "TCK2|e|a");
        assert!(body(None, None).lookup().is_err());
    }

    #[test]
    fn action_defaults_to_entry() {
        let parsed: ScanTicketBody = serde_json::from_str(&format!(
            r#"{{"eventId":"{}","ticketNumber":"TCK1"}}"#,
            Uuid::new_v4()
        ))
        .unwrap();
        assert_eq!(parsed.action, ScanAction::Entry);
    }
}
