use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::services::checkin::{PriorCheckIn, ScanRejection};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Event {event_id} is sold out")]
    CapacityExceeded { event_id: Uuid, capacity: i32 },

    #[error("Event not bookable: {0}")]
    EventNotBookable(String),

    #[error("Attendee already holds ticket {ticket_number} for this event")]
    DuplicateBooking { ticket_id: Uuid, ticket_number: String },

    #[error("Ticket already checked in")]
    AlreadyCheckedIn(PriorCheckIn),

    #[error("Scan rejected: {}", .0.message)]
    ScanRejected(ScanRejection),

    #[error("Cancellation rejected: {0}")]
    CancellationRejected(String),

    #[error("Invalid payment signature")]
    InvalidPaymentSignature,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::CapacityExceeded { .. } => StatusCode::CONFLICT,
            AppError::EventNotBookable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DuplicateBooking { .. } => StatusCode::CONFLICT,
            AppError::AlreadyCheckedIn(_) => StatusCode::CONFLICT,
            AppError::ScanRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CancellationRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidPaymentSignature => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            AppError::EventNotBookable(_) => "EVENT_NOT_BOOKABLE",
            AppError::DuplicateBooking { .. } => "DUPLICATE_BOOKING",
            AppError::AlreadyCheckedIn(_) => "ALREADY_CHECKED_IN",
            AppError::ScanRejected(_) => "SCAN_REJECTED",
            AppError::CancellationRejected(_) => "CANCELLATION_REJECTED",
            AppError::InvalidPaymentSignature => "INVALID_PAYMENT_SIGNATURE",
            AppError::Conflict(_) => "CONFLICT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal server error");
            }
            other => {
                warn!(code = other.code(), error = %other, "Request rejected");
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::EventNotBookable(msg)
            | AppError::CancellationRejected(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::CapacityExceeded { .. } => "This event is sold out".to_string(),
            AppError::DuplicateBooking { .. } => {
                "You already have an active ticket for this event".to_string()
            }
            AppError::AlreadyCheckedIn(prior) => prior.message(),
            AppError::ScanRejected(rejection) => rejection.message.clone(),
            AppError::InvalidPaymentSignature => "Payment signature verification failed".to_string(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        }
    }

    /// Structured details for domain errors. Storage and internal failures
    /// never carry any.
    fn details(&self) -> Option<Value> {
        match self {
            AppError::CapacityExceeded { event_id, capacity } => Some(json!({
                "eventId": event_id,
                "capacity": capacity,
            })),
            AppError::DuplicateBooking { ticket_id, ticket_number } => Some(json!({
                "ticketId": ticket_id,
                "ticketNumber": ticket_number,
            })),
            AppError::AlreadyCheckedIn(prior) => serde_json::to_value(prior).ok(),
            AppError::ScanRejected(rejection) => serde_json::to_value(rejection).ok(),
            _ => None,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::UniqueViolation(key) => {
                AppError::Conflict(format!("Duplicate value for {}", key))
            }
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        let public_message = self.public_message();
        let details = self.details();

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::Utc;

    async fn body_json(err: AppError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn database_errors_hide_internals() {
        let (status, body) = body_json(AppError::DatabaseError(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(body["error"]["message"], "A database error occurred");
        assert!(body["error"]["details"].is_null());
    }

    #[tokio::test]
    async fn already_checked_in_carries_prior_scanner() {
        let scanner = Uuid::new_v4();
        let prior = PriorCheckIn {
            ticket_id: Uuid::new_v4(),
            ticket_number: "TCK1".to_string(),
            checked_in_at: Utc::now(),
            scanned_by: Some(scanner),
            scanned_by_name: Some("Gate 2".to_string()),
            scan_count: 2,
        };
        let (status, body) = body_json(AppError::AlreadyCheckedIn(prior)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_CHECKED_IN");
        assert_eq!(body["error"]["details"]["scannedBy"], scanner.to_string());
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Gate 2"));
    }

    #[tokio::test]
    async fn scan_rejection_names_reason() {
        let correct = Uuid::new_v4();
        let rejection = ScanRejection::wrong_event(correct, "Rust Meetup");
        let (status, body) = body_json(AppError::ScanRejected(rejection)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["details"]["reason"], "wrong_event");
        assert_eq!(body["error"]["details"]["correctEventId"], correct.to_string());
    }

    #[test]
    fn every_domain_error_has_distinct_code() {
        let codes = [
            AppError::CapacityExceeded { event_id: Uuid::nil(), capacity: 1 }.code(),
            AppError::EventNotBookable(String::new()).code(),
            AppError::DuplicateBooking { ticket_id: Uuid::nil(), ticket_number: String::new() }.code(),
            AppError::InvalidPaymentSignature.code(),
            AppError::ValidationError(String::new()).code(),
            AppError::NotFound(String::new()).code(),
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }
}
