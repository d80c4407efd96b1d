use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Paid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Paid => "paid",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "paid" => Ok(OrderStatus::Paid),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// A gateway order opened for one paid ticket. Its `order_id` becomes the
/// ticket's `order_reference`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub order_id: String,
    pub event_id: Uuid,
    pub attendee_id: Uuid,
    pub amount_minor: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub fn generate_order_id() -> String {
    format!("order_{}", Uuid::new_v4().simple())
}
