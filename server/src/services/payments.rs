use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

use super::booking::attendee_details;
use super::issuance::{IssueRequest, Issued, TicketIssuer};
use crate::auth::{AuthUser, Capability};
use crate::models::payment::generate_order_id;
use crate::models::{AttendeeInfo, OrderStatus, PaymentOrder, PaymentStatus};
use crate::store::TicketStore;
use crate::utils::error::AppError;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `"{order_id}|{payment_id}"`, as the gateway signs it.
pub fn sign(secret: &str, order_id: &str, payment_id: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::InternalServerError("Payment key rejected by HMAC".to_string()))?;
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a gateway signature.
pub fn verify_signature(secret: &str, order_id: &str, payment_id: &str, signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(format!("{}|{}", order_id, payment_id).as_bytes());
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub event_id: Uuid,
    /// Minor units, e.g. paise.
    pub amount: i64,
    pub currency: String,
    pub key_id: String,
}

#[derive(Debug, Clone)]
pub struct VerifyPayment {
    pub order_id: String,
    pub payment_id: String,
    pub signature: String,
    pub event_id: Uuid,
    pub quantity: Option<i32>,
    pub attendee: Option<AttendeeInfo>,
}

pub struct PaymentService {
    store: Arc<dyn TicketStore>,
    issuer: Arc<TicketIssuer>,
    key_id: String,
    key_secret: String,
    currency: String,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn TicketStore>,
        issuer: Arc<TicketIssuer>,
        key_id: String,
        key_secret: String,
        currency: String,
    ) -> Self {
        Self {
            store,
            issuer,
            key_id,
            key_secret,
            currency,
        }
    }

    /// Opens an order for one paid ticket. No capacity is taken until the
    /// payment is verified.
    pub async fn create_order(
        &self,
        event_id: Uuid,
        quantity: Option<i32>,
        user: &AuthUser,
        now: DateTime<Utc>,
    ) -> Result<OrderCreated, AppError> {
        user.require(Capability::BookTickets)?;
        single_ticket(quantity)?;

        let event = self
            .store
            .get_event(event_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Event {} not found", event_id)))?;
        event
            .check_bookable(now)
            .map_err(|reason| AppError::EventNotBookable(reason.to_string()))?;
        if event.is_free() {
            return Err(AppError::ValidationError(
                "Free events are booked without payment".to_string(),
            ));
        }
        if event.is_sold_out() {
            return Err(AppError::CapacityExceeded {
                event_id,
                capacity: event.capacity,
            });
        }
        if let Some(live) = self.store.find_live_ticket(event_id, user.user_id).await? {
            return Err(AppError::DuplicateBooking {
                ticket_id: live.id,
                ticket_number: live.ticket_number,
            });
        }

        let order = PaymentOrder {
            order_id: generate_order_id(),
            event_id,
            attendee_id: user.user_id,
            amount_minor: to_minor_units(event.price)?,
            currency: self.currency.clone(),
            status: OrderStatus::Created,
            payment_id: None,
            created_at: now,
        };
        self.store.insert_order(&order).await?;
        info!(
            order_id = %order.order_id,
            event_id = %event_id,
            amount_minor = order.amount_minor,
            "Payment order created"
        );

        Ok(OrderCreated {
            order_id: order.order_id,
            event_id,
            amount: order.amount_minor,
            currency: order.currency,
            key_id: self.key_id.clone(),
        })
    }

    /// Verifies the gateway signature and materializes the order's ticket.
    /// Safe to repeat: the order id is the ticket's order reference.
    pub async fn verify_payment(
        &self,
        request: VerifyPayment,
        user: &AuthUser,
        now: DateTime<Utc>,
    ) -> Result<Issued, AppError> {
        single_ticket(request.quantity)?;

        if !verify_signature(&self.key_secret, &request.order_id, &request.payment_id, &request.signature) {
            warn!(order_id = %request.order_id, user_id = %user.user_id, "Payment signature mismatch");
            return Err(AppError::InvalidPaymentSignature);
        }

        let order = self
            .store
            .get_order(&request.order_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {} not found", request.order_id)))?;
        if order.attendee_id != user.user_id {
            return Err(AppError::Forbidden("This order belongs to another user".to_string()));
        }
        if order.event_id != request.event_id {
            return Err(AppError::ValidationError(
                "Order was created for a different event".to_string(),
            ));
        }

        let attendee = attendee_details(request.attendee, user)?;

        let issued = self
            .issuer
            .materialize(
                IssueRequest {
                    order_reference: order.order_id.clone(),
                    event_id: order.event_id,
                    attendee_id: order.attendee_id,
                    attendee,
                    price_paid: Decimal::new(order.amount_minor, 2),
                    payment_status: PaymentStatus::Paid,
                },
                now,
            )
            .await?;

        if order.status != OrderStatus::Paid {
            self.store.mark_order_paid(&order.order_id, &request.payment_id).await?;
        }
        Ok(issued)
    }
}

fn single_ticket(quantity: Option<i32>) -> Result<(), AppError> {
    match quantity {
        None | Some(1) => Ok(()),
        Some(n) => Err(AppError::ValidationError(format!(
            "Only one ticket per attendee can be bought, got quantity {}",
            n
        ))),
    }
}

fn to_minor_units(price: Decimal) -> Result<i64, AppError> {
    (price * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .ok_or_else(|| AppError::InternalServerError(format!("Price {} out of range", price)))
}
