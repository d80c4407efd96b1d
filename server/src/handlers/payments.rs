use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use super::tickets::issued_response;
use crate::auth::AuthUser;
use crate::models::{AttendeeInfo, Embedded};
use crate::services::VerifyPayment;
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::extract::ApiJson;
use crate::utils::response::created;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderBody {
    pub event_id: Uuid,
    #[serde(default)]
    pub quantity: Option<i32>,
}

/// Gateway callbacks use the `razorpay_*` names; the client SDK uses camelCase.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentBody {
    #[serde(alias = "razorpay_order_id")]
    pub order_id: String,
    #[serde(alias = "razorpay_payment_id")]
    pub payment_id: String,
    #[serde(alias = "razorpay_signature")]
    pub signature: String,
    pub event_id: Uuid,
    #[serde(default)]
    pub quantity: Option<i32>,
    #[serde(default)]
    pub attendee_info: Option<Embedded<AttendeeInfo>>,
}

/// POST /payments/create-order
pub async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<CreateOrderBody>,
) -> Result<Response, AppError> {
    let order = state
        .payments
        .create_order(body.event_id, body.quantity, &user, Utc::now())
        .await?;
    Ok(created(order, "Payment order created"))
}

/// POST /payments/verify-payment
pub async fn verify_payment(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<VerifyPaymentBody>,
) -> Result<Response, AppError> {
    let attendee = body
        .attendee_info
        .map(|info| info.into_inner("attendeeInfo"))
        .transpose()?;

    let issued = state
        .payments
        .verify_payment(
            VerifyPayment {
                order_id: body.order_id,
                payment_id: body.payment_id,
                signature: body.signature,
                event_id: body.event_id,
                quantity: body.quantity,
                attendee,
            },
            &user,
            Utc::now(),
        )
        .await?;
    Ok(issued_response(issued))
}
