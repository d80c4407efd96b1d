#![allow(dead_code)]

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use eventpass_server::auth::Role;
use eventpass_server::config::Config;
use eventpass_server::routes::create_routes;
use eventpass_server::state::AppState;
use eventpass_server::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

pub struct Caller {
    pub id: Uuid,
    pub name: String,
    pub token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let state = AppState::new(config, Arc::new(MemoryStore::new()));
        let router = create_routes(state.clone());
        Self { state, router }
    }

    pub fn caller(&self, name: &str, role: Role) -> Caller {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        let token = self
            .state
            .auth
            .issue_token(id, name, Some(&email), role, Duration::hours(1))
            .unwrap();
        Caller {
            id,
            name: name.to_string(),
            token,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&Caller>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        self.request_with(method, uri, caller, body, &[]).await
    }

    pub async fn request_with(
        &self,
        method: Method,
        uri: &str,
        caller: Option<&Caller>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", caller.token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Creates a published event through the API and returns its id.
    pub async fn create_event(
        &self,
        host: &Caller,
        capacity: i32,
        price: Option<&str>,
        starts_in: Duration,
    ) -> Uuid {
        let start: DateTime<Utc> = Utc::now() + starts_in;
        let end = start + Duration::hours(3);
        let pricing = match price {
            Some(price) => json!({ "isFree": false, "price": price }),
            None => json!({ "isFree": true }),
        };
        let (status, body) = self
            .request(
                Method::POST,
                "/events",
                Some(host),
                Some(json!({
                    "title": "Rust Meetup",
                    "capacity": capacity,
                    "location": { "venue": "Hall A" },
                    "pricing": pricing,
                    "startDateTime": start,
                    "endDateTime": end,
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn book(&self, caller: &Caller, event_id: Uuid) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/book-ticket",
            Some(caller),
            Some(json!({ "eventId": event_id })),
        )
        .await
    }

    pub async fn event(&self, event_id: Uuid) -> Value {
        let (status, body) = self
            .request(Method::GET, &format!("/events/{}", event_id), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        body["data"].clone()
    }

    pub async fn scan(&self, scanner: &Caller, event_id: Uuid, ticket_number: &str) -> (StatusCode, Value) {
        self.request(
            Method::POST,
            "/scan-ticket",
            Some(scanner),
            Some(json!({ "eventId": event_id, "ticketNumber": ticket_number })),
        )
        .await
    }
}
