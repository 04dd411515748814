use crate::domain::brand::Product;
use crate::domain::geo::Coordinates;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

/// A monetary value in the brand's currency.
///
/// This is a wrapper around `rust_decimal::Decimal` so cart and order
/// arithmetic never goes through floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(pub Decimal);

impl Money {
    pub const ZERO: Self = Self(Decimal::ZERO);

    pub fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// `pct` percent of this amount, rounded to two decimal places.
    pub fn percent(&self, pct: Decimal) -> Self {
        Self(
            (self.0 * pct / Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Amount in the smallest currency unit (paise, cents), as payment
    /// providers expect it.
    pub fn to_subunits(&self) -> Option<i64> {
        (self.0 * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }

    fn times(&self, quantity: u32) -> Self {
        Self(self.0 * Decimal::from(quantity))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryType {
    Delivery,
    Takeaway,
}

impl fmt::Display for DeliveryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delivery => f.write_str("Delivery"),
            Self::Takeaway => f.write_str("Takeaway"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: String,
    pub name: String,
    /// Unit price captured when the item was first added.
    pub price: Money,
    pub quantity: u32,
}

impl LineItem {
    pub fn subtotal(&self) -> Money {
        self.price.times(self.quantity)
    }
}

/// One customer's cart within one brand.
///
/// The total is never stored; [`Cart::total`] always recomputes it from the
/// line items.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub location: Option<Coordinates>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub delivery_type: Option<DeliveryType>,
    #[serde(default)]
    pub last_added_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_reminder_date: Option<NaiveDate>,
}

impl Cart {
    /// Merges `quantity` of a product into the cart. An existing line for the
    /// same product id is incremented instead of duplicated.
    pub fn add_item(&mut self, product_id: &str, product: &Product, quantity: u32, now: DateTime<Utc>) {
        match self.items.iter_mut().find(|i| i.product_id == product_id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.items.push(LineItem {
                product_id: product_id.to_string(),
                name: product.name.clone(),
                price: product.price,
                quantity,
            }),
        }
        self.last_added_at = Some(now);
        self.last_reminder_date = None;
    }

    /// Drops a product line. Returns whether anything was removed.
    pub fn remove_item(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        self.items.len() != before
    }

    pub fn total(&self) -> Money {
        self.items.iter().map(LineItem::subtotal).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }
}
