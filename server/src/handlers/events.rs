use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::models::{Embedded, EventStatus};
use crate::services::NewEvent;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::ApiJson;
use crate::utils::response::{created, empty_success, success};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pricing {
    #[serde(default)]
    pub is_free: bool,
    #[serde(default)]
    pub price: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventBody {
    pub title: String,
    pub capacity: i32,
    #[serde(default)]
    pub location: Option<Embedded<Location>>,
    #[serde(default)]
    pub pricing: Option<Embedded<Pricing>>,
    #[serde(default)]
    pub status: Option<EventStatus>,
    #[serde(alias = "startTime")]
    pub start_date_time: DateTime<Utc>,
    #[serde(alias = "endTime")]
    pub end_date_time: DateTime<Utc>,
}

impl CreateEventBody {
    fn into_new_event(self) -> Result<NewEvent, AppError> {
        let location = self
            .location
            .map(|l| l.into_inner("location"))
            .transpose()?
            .unwrap_or_default();
        let pricing = self
            .pricing
            .map(|p| p.into_inner("pricing"))
            .transpose()?
            .unwrap_or_default();

        let price = match (pricing.is_free, pricing.price) {
            (true, _) | (false, None) => Decimal::ZERO,
            (false, Some(price)) => price,
        };

        Ok(NewEvent {
            title: self.title,
            venue: location.venue.or(location.address),
            capacity: self.capacity,
            price,
            status: self.status.unwrap_or(EventStatus::Published),
            start_time: self.start_date_time,
            end_time: self.end_date_time,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CapacityBody {
    pub capacity: i32,
}

/// POST /events
pub async fn create_event(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<CreateEventBody>,
) -> Result<Response, AppError> {
    let event = state
        .events
        .create(body.into_new_event()?, &user, Utc::now())
        .await?;
    Ok(created(event, "Event created"))
}

/// GET /events/:id
pub async fn get_event(State(state): State<AppState>, Path(event_id): Path<Uuid>) -> Result<Response, AppError> {
    let event = state.events.get(event_id).await?;
    Ok(success(event, "Event retrieved"))
}

/// GET /events/:id/attendees
pub async fn list_attendees(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let list = state.events.attendees(event_id, &user, Utc::now()).await?;
    Ok(success(list, "Attendees retrieved"))
}

/// PATCH /events/:id/capacity
pub async fn update_capacity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
    ApiJson(body): ApiJson<CapacityBody>,
) -> Result<Response, AppError> {
    let event = state.ledger.resize(event_id, body.capacity, &user).await?;
    Ok(success(event, "Capacity updated"))
}

/// DELETE /events/:id
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthUser,
    Path(event_id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.events.delete(event_id, &user).await?;
    Ok(empty_success("Event deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_and_pricing_accept_both_shapes() {
        let raw = r#"{
            "title": "Launch",
            "capacity": 10,
            "location": "{\"venue\":\"Hall A\"}",
            "pricing": {"isFree": false, "price": "250.00"},
            "startDateTime": "2030-01-01T10:00:00Z",
            "endDateTime": "2030-01-01T12:00:00Z"
        }"#;
        let body: CreateEventBody = serde_json::from_str(raw).unwrap();
        let event = body.into_new_event().unwrap();
        assert_eq!(event.venue.as_deref(), Some("Hall A"));
        assert_eq!(event.price, Decimal::new(25000, 2));
        assert_eq!(event.status, EventStatus::Published);
    }

    #[test]
    fn malformed_embedded_field_is_a_validation_error() {
        let raw = r#"{
            "title": "Launch",
            "capacity": 10,
            "pricing": "{not json",
            "startTime": "2030-01-01T10:00:00Z",
            "endTime": "2030-01-01T12:00:00Z"
        }"#;
        let body: CreateEventBody = serde_json::from_str(raw).unwrap();
        assert!(matches!(body.into_new_event(), Err(AppError::ValidationError(_))));
    }
}
