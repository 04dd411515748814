use crate::domain::brand::BrandId;
use crate::domain::cart::Cart;
use crate::domain::order::Order;
use crate::domain::ports::{LedgerEntry, OrderStore, SessionStore};
use crate::domain::session::ConversationState;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

type SessionKey = (BrandId, String);

fn key(brand: &BrandId, customer: &str) -> SessionKey {
    (brand.clone(), customer.to_string())
}

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn live(&self) -> Option<T> {
        (Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

/// A thread-safe in-memory session store with per-record expiry.
///
/// Expired records are treated as absent on read and dropped on the next
/// write to the same map.
#[derive(Clone)]
pub struct InMemorySessionStore {
    states: Arc<RwLock<HashMap<SessionKey, Expiring<ConversationState>>>>,
    carts: Arc<RwLock<HashMap<SessionKey, Expiring<Cart>>>>,
    tracked: Arc<RwLock<HashMap<BrandId, BTreeSet<String>>>>,
    discounts: Arc<RwLock<HashMap<BrandId, Decimal>>>,
    state_ttl: Duration,
    cart_ttl: Duration,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::with_ttls(Duration::from_secs(3600), Duration::from_secs(86_400))
    }
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttls(state_ttl: Duration, cart_ttl: Duration) -> Self {
        Self {
            states: Arc::default(),
            carts: Arc::default(),
            tracked: Arc::default(),
            discounts: Arc::default(),
            state_ttl,
            cart_ttl,
        }
    }
}

fn purge_expired<T>(map: &mut HashMap<SessionKey, Expiring<T>>) {
    let now = Instant::now();
    map.retain(|_, record| record.expires_at > now);
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_state(&self, brand: &BrandId, customer: &str) -> Result<Option<ConversationState>> {
        let states = self.states.read().await;
        Ok(states.get(&key(brand, customer)).and_then(Expiring::live))
    }

    async fn put_state(&self, brand: &BrandId, customer: &str, state: ConversationState) -> Result<()> {
        let mut states = self.states.write().await;
        purge_expired(&mut states);
        states.insert(key(brand, customer), Expiring::new(state, self.state_ttl));
        Ok(())
    }

    async fn clear_state(&self, brand: &BrandId, customer: &str) -> Result<()> {
        self.states.write().await.remove(&key(brand, customer));
        Ok(())
    }

    async fn get_cart(&self, brand: &BrandId, customer: &str) -> Result<Cart> {
        let carts = self.carts.read().await;
        Ok(carts
            .get(&key(brand, customer))
            .and_then(Expiring::live)
            .unwrap_or_default())
    }

    async fn put_cart(&self, brand: &BrandId, customer: &str, cart: Cart) -> Result<()> {
        {
            let mut carts = self.carts.write().await;
            purge_expired(&mut carts);
            carts.insert(key(brand, customer), Expiring::new(cart, self.cart_ttl));
        }
        self.tracked
            .write()
            .await
            .entry(brand.clone())
            .or_default()
            .insert(customer.to_string());
        Ok(())
    }

    async fn delete_cart(&self, brand: &BrandId, customer: &str) -> Result<()> {
        self.carts.write().await.remove(&key(brand, customer));
        self.untrack(brand, customer).await
    }

    async fn mark_reminded(
        &self,
        brand: &BrandId,
        customer: &str,
        last_added_at: Option<DateTime<Utc>>,
        date: NaiveDate,
    ) -> Result<bool> {
        let mut carts = self.carts.write().await;
        let key = key(brand, customer);
        let Some(mut cart) = carts.get(&key).and_then(Expiring::live) else {
            return Ok(false);
        };
        if cart.is_empty() || cart.last_added_at != last_added_at {
            return Ok(false);
        }
        cart.last_reminder_date = Some(date);
        carts.insert(key, Expiring::new(cart, self.cart_ttl));
        Ok(true)
    }

    async fn tracked_customers(&self, brand: &BrandId) -> Result<Vec<String>> {
        let tracked = self.tracked.read().await;
        Ok(tracked
            .get(brand)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn untrack(&self, brand: &BrandId, customer: &str) -> Result<()> {
        if let Some(set) = self.tracked.write().await.get_mut(brand) {
            set.remove(customer);
        }
        Ok(())
    }

    async fn get_discount(&self, brand: &BrandId) -> Result<Option<Decimal>> {
        Ok(self.discounts.read().await.get(brand).copied())
    }

    async fn set_discount(&self, brand: &BrandId, percentage: Decimal) -> Result<()> {
        self.discounts.write().await.insert(brand.clone(), percentage);
        Ok(())
    }

    async fn clear_discount(&self, brand: &BrandId) -> Result<()> {
        self.discounts.write().await.remove(brand);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    Active,
    Archived,
}

#[derive(Debug, Clone)]
struct Versioned {
    order: Order,
    version: u64,
}

#[derive(Default)]
struct Ledger {
    active: HashMap<String, Versioned>,
    archive: HashMap<String, Versioned>,
    /// order id -> (partition, storage key)
    index: HashMap<String, (Partition, String)>,
}

fn storage_key(order: &Order) -> String {
    format!("{}:{}", order.brand_id, order.order_id)
}

/// A thread-safe in-memory order ledger.
///
/// Orders are stored under a brand-scoped key; a secondary index maps bare
/// order ids to their partition and key. One lock covers all three maps so
/// compare-and-swap and archival are atomic.
#[derive(Default, Clone)]
pub struct InMemoryOrderStore {
    ledger: Arc<RwLock<Ledger>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        if ledger.index.contains_key(&order.order_id) {
            return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
        }
        let key = storage_key(&order);
        ledger
            .index
            .insert(order.order_id.clone(), (Partition::Active, key.clone()));
        ledger.active.insert(key, Versioned { order, version: 1 });
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<LedgerEntry>> {
        let ledger = self.ledger.read().await;
        let Some((partition, key)) = ledger.index.get(order_id) else {
            return Ok(None);
        };
        let record = match partition {
            Partition::Active => ledger.active.get(key),
            Partition::Archived => ledger.archive.get(key),
        };
        Ok(record.map(|r| LedgerEntry {
            order: r.order.clone(),
            version: r.version,
            archived: *partition == Partition::Archived,
        }))
    }

    async fn compare_and_swap(&self, expected_version: u64, order: Order) -> Result<u64> {
        let mut ledger = self.ledger.write().await;
        let key = match ledger.index.get(&order.order_id) {
            Some((Partition::Active, key)) => key.clone(),
            Some((Partition::Archived, _)) => {
                return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
            }
            None => return Err(CommerceError::OrderNotFound(order.order_id)),
        };
        let record = ledger
            .active
            .get_mut(&key)
            .ok_or_else(|| CommerceError::OrderNotFound(order.order_id.clone()))?;
        if record.version != expected_version {
            return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
        }
        record.version += 1;
        record.order = order;
        Ok(record.version)
    }

    async fn archive(&self, order_id: &str) -> Result<bool> {
        let mut ledger = self.ledger.write().await;
        let key = match ledger.index.get(order_id) {
            Some((Partition::Active, key)) => key.clone(),
            _ => return Ok(false),
        };
        let Some(record) = ledger.active.remove(&key) else {
            return Ok(false);
        };
        ledger.archive.insert(key.clone(), record);
        ledger
            .index
            .insert(order_id.to_string(), (Partition::Archived, key));
        Ok(true)
    }
}
