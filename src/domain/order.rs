use crate::domain::brand::BrandId;
use crate::domain::cart::{DeliveryType, LineItem, Money};
use crate::domain::geo::Coordinates;
use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

const ORDER_ID_PREFIX: &str = "ORD";
const ORDER_ID_SUFFIX_LEN: usize = 8;

/// Builds an order id from the creation time plus a random suffix, e.g.
/// `ORD20260808143015123K3JX9Q2B`.
pub fn generate_order_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ORDER_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();
    format!("{ORDER_ID_PREFIX}{}{suffix}", now.format("%Y%m%d%H%M%S%3f"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Paid,
    Ready,
    #[serde(rename = "On The Way")]
    OnTheWay,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// Position along the fulfilment path. `Cancelled` sits outside it.
    fn rank(&self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Paid => Some(1),
            Self::Ready => Some(2),
            Self::OnTheWay => Some(3),
            Self::Delivered => Some(4),
            Self::Cancelled => None,
        }
    }

    /// Statuses only move forward. A pending order must be paid before it can
    /// be fulfilled; paid orders may skip ahead (e.g. straight to delivered).
    /// Any non-terminal order can be cancelled.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Self::Cancelled) => true,
            (Self::Pending, next) => next == Self::Paid,
            (current, next) => match (current.rank(), next.rank()) {
                (Some(from), Some(to)) => to > from,
                _ => false,
            },
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Ready => "Ready",
            Self::OnTheWay => "On The Way",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "Cash on Delivery")]
    CashOnDelivery,
    Online,
}

impl PaymentMethod {
    pub fn initial_status(&self) -> OrderStatus {
        match self {
            Self::CashOnDelivery => OrderStatus::Paid,
            Self::Online => OrderStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CashOnDelivery => f.write_str("Cash on Delivery"),
            Self::Online => f.write_str("Online"),
        }
    }
}

/// Totals for a checkout with the brand discount applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub actual_total: Money,
    pub discount_percentage: Decimal,
    pub discount_amount: Money,
    pub total: Money,
}

impl Pricing {
    pub fn compute(actual_total: Money, discount_percentage: Option<Decimal>) -> Self {
        let discount_percentage = discount_percentage.unwrap_or(Decimal::ZERO);
        let discount_amount = if discount_percentage > Decimal::ZERO {
            actual_total.percent(discount_percentage)
        } else {
            Money::ZERO
        };
        Self {
            actual_total,
            discount_percentage,
            discount_amount,
            total: actual_total - discount_amount,
        }
    }
}

/// An order record. Everything except `status`, `updated_at` and
/// `payment_link` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub user_id: String,
    pub brand_id: BrandId,
    pub items: Vec<LineItem>,
    pub actual_total: Money,
    pub discount_percentage: Decimal,
    pub discount_amount: Money,
    pub total: Money,
    pub delivery_type: DeliveryType,
    pub delivery_address: Option<String>,
    pub location: Option<Coordinates>,
    pub payment_method: PaymentMethod,
    pub branch: Option<String>,
    pub payment_link: Option<String>,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The replacement record carrying a new status.
    pub fn with_status(&self, status: OrderStatus, now: DateTime<Utc>) -> Self {
        Self {
            status,
            updated_at: now,
            ..self.clone()
        }
    }
}
