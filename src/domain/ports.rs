use super::brand::{Branch, BrandContext, BrandId, Product};
use super::cart::Cart;
use super::geo::Coordinates;
use super::order::{Order, OrderStatus};
use super::session::ConversationState;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

/// Per-(brand, customer) conversation state and carts, plus brand discounts.
///
/// Reads tolerate missing or expired records: `get_state` returns `None` and
/// `get_cart` returns an empty cart. Every write refreshes the record's TTL.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_state(&self, brand: &BrandId, customer: &str) -> Result<Option<ConversationState>>;
    async fn put_state(&self, brand: &BrandId, customer: &str, state: ConversationState) -> Result<()>;
    async fn clear_state(&self, brand: &BrandId, customer: &str) -> Result<()>;

    async fn get_cart(&self, brand: &BrandId, customer: &str) -> Result<Cart>;
    /// Stores the cart and marks the customer for the reminder sweep.
    async fn put_cart(&self, brand: &BrandId, customer: &str, cart: Cart) -> Result<()>;
    async fn delete_cart(&self, brand: &BrandId, customer: &str) -> Result<()>;
    /// Stamps `last_reminder_date` on a live, non-empty cart whose
    /// `last_added_at` still equals `last_added_at`. Returns `false` and
    /// writes nothing when the cart is gone or has changed.
    async fn mark_reminded(
        &self,
        brand: &BrandId,
        customer: &str,
        last_added_at: Option<DateTime<Utc>>,
        date: NaiveDate,
    ) -> Result<bool>;

    /// Read-merge-write of one product line. Concurrent adds for the same
    /// customer are last-write-wins.
    async fn add_item(
        &self,
        brand: &BrandId,
        customer: &str,
        product_id: &str,
        product: &Product,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<Cart> {
        let mut cart = self.get_cart(brand, customer).await?;
        cart.add_item(product_id, product, quantity, now);
        self.put_cart(brand, customer, cart.clone()).await?;
        Ok(cart)
    }

    /// Customers whose carts the reminder sweep should look at.
    async fn tracked_customers(&self, brand: &BrandId) -> Result<Vec<String>>;
    async fn untrack(&self, brand: &BrandId, customer: &str) -> Result<()>;

    async fn get_discount(&self, brand: &BrandId) -> Result<Option<Decimal>>;
    async fn set_discount(&self, brand: &BrandId, percentage: Decimal) -> Result<()>;
    async fn clear_discount(&self, brand: &BrandId) -> Result<()>;
}

/// A ledger record together with its optimistic-concurrency version.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub order: Order,
    pub version: u64,
    pub archived: bool,
}

/// Durable order storage split into active and archived partitions, both
/// reachable through an order-id index.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fails with `ConcurrentUpdateConflict` when the id is already taken.
    async fn insert(&self, order: Order) -> Result<()>;
    async fn get(&self, order_id: &str) -> Result<Option<LedgerEntry>>;
    /// Replaces an active order only if its version is still
    /// `expected_version`. Returns the new version.
    async fn compare_and_swap(&self, expected_version: u64, order: Order) -> Result<u64>;
    /// Moves an active order to the archive. Returns `false` if it was not
    /// active.
    async fn archive(&self, order_id: &str) -> Result<bool>;
}

/// Outbound intents for the messaging channel. Implementations own
/// formatting, transport and credentials.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_text(&self, brand: &BrandContext, to: &str, body: &str) -> Result<()>;
    async fn send_catalog(&self, brand: &BrandContext, to: &str) -> Result<()>;
    async fn send_main_menu(&self, brand: &BrandContext, to: &str) -> Result<()>;
    async fn send_cart_summary(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()>;
    async fn send_payment_options(&self, brand: &BrandContext, to: &str) -> Result<()>;
    async fn send_location_request(&self, brand: &BrandContext, to: &str) -> Result<()>;
    async fn send_branch_selection(&self, brand: &BrandContext, to: &str, branches: &[Branch]) -> Result<()>;
    async fn send_payment_link(&self, brand: &BrandContext, to: &str, order: &Order, link: &str) -> Result<()>;
    async fn send_order_confirmation(&self, brand: &BrandContext, to: &str, order: &Order) -> Result<()>;
    async fn send_order_alert(&self, brand: &BrandContext, branch: &Branch, order: &Order) -> Result<()>;
    async fn send_order_status_update(
        &self,
        brand: &BrandContext,
        to: &str,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<()>;
    async fn send_cart_reminder(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `None` when the address cannot be resolved.
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>>;
}

#[async_trait]
pub trait PaymentLinks: Send + Sync {
    async fn create_payment_link(
        &self,
        brand: &BrandContext,
        amount_subunits: i64,
        order_id: &str,
        customer_contact: &str,
    ) -> Result<String>;
}

/// One row of the operational activity trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub timestamp: DateTime<Utc>,
    pub brand: BrandId,
    pub customer: String,
    pub action: String,
    pub details: String,
}

impl ActivityEntry {
    pub fn new(brand: &BrandId, customer: &str, action: &str, details: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            brand: brand.clone(),
            customer: customer.to_string(),
            action: action.to_string(),
            details: details.into(),
        }
    }
}

#[async_trait]
pub trait ActivitySink: Send + Sync {
    async fn record(&self, entry: ActivityEntry) -> Result<()>;
}

pub type SharedSessionStore = Arc<dyn SessionStore>;
pub type SharedOrderStore = Arc<dyn OrderStore>;
pub type SharedMessenger = Arc<dyn Messenger>;
pub type SharedGeocoder = Arc<dyn Geocoder>;
pub type SharedPaymentLinks = Arc<dyn PaymentLinks>;
pub type SharedActivitySink = Arc<dyn ActivitySink>;
