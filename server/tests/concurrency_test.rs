mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use chrono::Duration;
use common::TestApp;
use eventpass_server::auth::Role;
use eventpass_server::config::Config;
use eventpass_server::services::payments::sign;
use futures::future::join_all;
use serde_json::{json, Value};

async fn run_all<F>(tasks: Vec<F>) -> Vec<(StatusCode, Value)>
where
    F: std::future::Future<Output = (StatusCode, Value)> + Send + 'static,
{
    join_all(tasks.into_iter().map(tokio::spawn))
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_seat_goes_to_exactly_one_booker() {
    let app = Arc::new(TestApp::new());
    let host = app.caller("Hana Host", Role::Organizer);
    let event_id = app.create_event(&host, 1, None, Duration::days(3)).await;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let app = app.clone();
            let caller = app.caller(&format!("Booker {}", i), Role::Attendee);
            async move { app.book(&caller, event_id).await }
        })
        .collect();
    let results = run_all(tasks).await;

    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter(|(s, _)| *s != StatusCode::CREATED)
        .all(|(s, body)| *s == StatusCode::CONFLICT && body["error"]["code"] == "CAPACITY_EXCEEDED"));
    assert_eq!(app.event(event_id).await["ticketsSold"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sold_never_exceeds_capacity_under_contention() {
    let app = Arc::new(TestApp::new());
    let host = app.caller("Hana Host", Role::Organizer);
    let event_id = app.create_event(&host, 5, None, Duration::days(3)).await;

    let tasks: Vec<_> = (0..40)
        .map(|i| {
            let app = app.clone();
            let caller = app.caller(&format!("Booker {}", i), Role::Attendee);
            async move { app.book(&caller, event_id).await }
        })
        .collect();
    let results = run_all(tasks).await;

    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    assert_eq!(created, 5);
    let event = app.event(event_id).await;
    assert_eq!(event["ticketsSold"], 5);
    assert_eq!(event["capacity"], 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_attendee_racing_gets_one_live_ticket() {
    let app = Arc::new(TestApp::new());
    let host = app.caller("Hana Host", Role::Organizer);
    let ada = Arc::new(app.caller("Ada", Role::Attendee));
    let event_id = app.create_event(&host, 10, None, Duration::days(3)).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            let ada = ada.clone();
            async move { app.book(&ada, event_id).await }
        })
        .collect();
    let results = run_all(tasks).await;

    let created = results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count();
    assert_eq!(created, 1);
    assert!(results
        .iter()
        .filter(|(s, _)| *s != StatusCode::CREATED)
        .all(|(_, body)| body["error"]["code"] == "DUPLICATE_BOOKING"));
    assert_eq!(app.event(event_id).await["ticketsSold"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_payment_confirmations_issue_one_ticket() {
    let app = Arc::new(TestApp::new());
    let host = app.caller("Hana Host", Role::Organizer);
    let ada = Arc::new(app.caller("Ada", Role::Attendee));
    let event_id = app
        .create_event(&host, 20, Some("500.00"), Duration::days(3))
        .await;

    let (_, order) = app
        .request(
            Method::POST,
            "/payments/create-order",
            Some(&ada),
            Some(json!({ "eventId": event_id })),
        )
        .await;
    let order_id = order["data"]["orderId"].as_str().unwrap().to_string();
    let signature = sign(&app.state.config.payment_key_secret, &order_id, "pay_777").unwrap();
    let body = json!({
        "orderId": order_id,
        "paymentId": "pay_777",
        "signature": signature,
        "eventId": event_id,
    });

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            let ada = ada.clone();
            let body = body.clone();
            async move {
                app.request(Method::POST, "/payments/verify-payment", Some(&ada), Some(body))
                    .await
            }
        })
        .collect();
    let results = run_all(tasks).await;

    assert!(results
        .iter()
        .all(|(s, _)| *s == StatusCode::CREATED || *s == StatusCode::OK));
    assert_eq!(
        results.iter().filter(|(s, _)| *s == StatusCode::CREATED).count(),
        1
    );
    let first_id = &results[0].1["data"]["id"];
    assert!(results.iter().all(|(_, body)| &body["data"]["id"] == first_id));
    assert_eq!(app.event(event_id).await["ticketsSold"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_scans_admit_once() {
    let app = Arc::new(TestApp::new());
    let host = app.caller("Hana Host", Role::Organizer);
    let ada = app.caller("Ada", Role::Attendee);
    let event_id = app.create_event(&host, 5, None, Duration::hours(1)).await;
    let (_, booked) = app.book(&ada, event_id).await;
    let number = booked["data"]["ticketNumber"].as_str().unwrap().to_string();

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let app = app.clone();
            let gate = app.caller(&format!("Gate {}", i), Role::EventStaff);
            let number = number.clone();
            async move { app.scan(&gate, event_id, &number).await }
        })
        .collect();
    let results = run_all(tasks).await;

    let admitted: Vec<_> = results
        .iter()
        .filter(|(s, _)| *s == StatusCode::OK)
        .collect();
    assert_eq!(admitted.len(), 1);
    let winner = admitted[0].1["data"]["scannedByName"].clone();

    for (status, body) in results.iter().filter(|(s, _)| *s != StatusCode::OK) {
        assert_eq!(*status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "ALREADY_CHECKED_IN");
        assert_eq!(body["error"]["details"]["scannedByName"], winner);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_check_in_settles_on_one_outcome() {
    // Check-in opens a week early so both actions are allowed when the race starts.
    let mut config = Config::default();
    config.checkin_opens_minutes = 60 * 24 * 7;
    let app = Arc::new(TestApp::with_config(config));
    let host = app.caller("Hana Host", Role::Organizer);
    let admin = Arc::new(app.caller("Root", Role::Admin));
    let ada = app.caller("Ada", Role::Attendee);
    let event_id = app.create_event(&host, 1, None, Duration::days(3)).await;
    let (_, booked) = app.book(&ada, event_id).await;
    let ticket_id = booked["data"]["id"].as_str().unwrap().to_string();
    let number = booked["data"]["ticketNumber"].as_str().unwrap().to_string();

    let scan = {
        let app = app.clone();
        let admin = admin.clone();
        tokio::spawn(async move { app.scan(&admin, event_id, &number).await })
    };
    let cancel = {
        let app = app.clone();
        let admin = admin.clone();
        tokio::spawn(async move {
            app.request(
                Method::POST,
                &format!("/tickets/{}/cancel", ticket_id),
                Some(&admin),
                None,
            )
            .await
        })
    };
    let (scan, cancel) = (scan.await.unwrap(), cancel.await.unwrap());

    let scanned = scan.0 == StatusCode::OK;
    let cancelled = cancel.0 == StatusCode::OK;
    assert!(scanned ^ cancelled, "scan {:?} cancel {:?}", scan, cancel);
    let sold = app.event(event_id).await["ticketsSold"].clone();
    assert_eq!(sold, if scanned { 1 } else { 0 });
}
