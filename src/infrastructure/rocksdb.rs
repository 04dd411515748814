use crate::domain::brand::BrandId;
use crate::domain::cart::Cart;
use crate::domain::order::Order;
use crate::domain::ports::{LedgerEntry, OrderStore, SessionStore};
use crate::domain::session::ConversationState;
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Direction, IteratorMode, Options, WriteBatch};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Conversation state per `brand:customer`.
pub const CF_STATES: &str = "states";
/// Carts per `brand:customer`.
pub const CF_CARTS: &str = "carts";
/// Reminder-sweep membership per `brand:customer` (empty values).
pub const CF_TRACKED: &str = "tracked";
/// Active discount percentage per brand.
pub const CF_DISCOUNTS: &str = "discounts";
/// Non-terminal orders per `brand:order_id`.
pub const CF_ORDERS_ACTIVE: &str = "orders_active";
/// Delivered and cancelled orders per `brand:order_id`.
pub const CF_ORDERS_ARCHIVE: &str = "orders_archive";
/// `order_id` -> location of the record.
pub const CF_ORDER_INDEX: &str = "order_index";

const COLUMN_FAMILIES: [&str; 7] = [
    CF_STATES,
    CF_CARTS,
    CF_TRACKED,
    CF_DISCOUNTS,
    CF_ORDERS_ACTIVE,
    CF_ORDERS_ARCHIVE,
    CF_ORDER_INDEX,
];

fn session_key(brand: &BrandId, customer: &str) -> String {
    format!("{brand}:{customer}")
}

#[derive(Serialize, Deserialize)]
struct Stamped<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct StoredOrder {
    order: Order,
    version: u64,
}

#[derive(Serialize, Deserialize)]
struct IndexEntry {
    key: String,
    archived: bool,
}

/// A persistent store backed by RocksDB.
///
/// Implements both [`SessionStore`] and [`OrderStore`] over separate column
/// families with JSON values. Session records carry their own expiry and
/// read as absent once it passes. Ledger writes that must be atomic
/// (insert, compare-and-swap, archive) serialise on `write_lock`; archival
/// commits through a single `WriteBatch`.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
    cart_lock: Arc<Mutex<()>>,
    state_ttl: Duration,
    cart_ttl: Duration,
}

impl RocksDbStore {
    /// Opens or creates a database at `path`, creating any missing column
    /// families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_ttls(path, Duration::from_secs(3600), Duration::from_secs(86_400))
    }

    pub fn open_with_ttls<P: AsRef<Path>>(path: P, state_ttl: Duration, cart_ttl: Duration) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
            cart_lock: Arc::new(Mutex::new(())),
            state_ttl,
            cart_ttl,
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| CommerceError::storage(format!("column family `{name}` not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn delete(&self, cf: &str, key: &str) -> Result<()> {
        self.db.delete_cf(self.cf(cf)?, key)?;
        Ok(())
    }

    fn read_live<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        let stamped: Option<Stamped<T>> = self.read(cf, key)?;
        Ok(stamped
            .filter(|s| s.expires_at > Utc::now())
            .map(|s| s.value))
    }

    fn write_stamped<T: Serialize>(&self, cf: &str, key: &str, value: T, ttl: Duration) -> Result<()> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CommerceError::storage(format!("invalid TTL: {e}")))?;
        self.write(
            cf,
            key,
            &Stamped {
                value,
                expires_at: Utc::now() + ttl,
            },
        )
    }

    fn locate(&self, order_id: &str) -> Result<Option<IndexEntry>> {
        self.read(CF_ORDER_INDEX, order_id)
    }
}

#[async_trait]
impl SessionStore for RocksDbStore {
    async fn get_state(&self, brand: &BrandId, customer: &str) -> Result<Option<ConversationState>> {
        self.read_live(CF_STATES, &session_key(brand, customer))
    }

    async fn put_state(&self, brand: &BrandId, customer: &str, state: ConversationState) -> Result<()> {
        self.write_stamped(CF_STATES, &session_key(brand, customer), state, self.state_ttl)
    }

    async fn clear_state(&self, brand: &BrandId, customer: &str) -> Result<()> {
        self.delete(CF_STATES, &session_key(brand, customer))
    }

    async fn get_cart(&self, brand: &BrandId, customer: &str) -> Result<Cart> {
        Ok(self
            .read_live(CF_CARTS, &session_key(brand, customer))?
            .unwrap_or_default())
    }

    async fn put_cart(&self, brand: &BrandId, customer: &str, cart: Cart) -> Result<()> {
        let _guard = self.cart_lock.lock().await;
        let key = session_key(brand, customer);
        self.write_stamped(CF_CARTS, &key, cart, self.cart_ttl)?;
        self.db.put_cf(self.cf(CF_TRACKED)?, &key, b"")?;
        Ok(())
    }

    async fn delete_cart(&self, brand: &BrandId, customer: &str) -> Result<()> {
        let _guard = self.cart_lock.lock().await;
        let key = session_key(brand, customer);
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_CARTS)?, &key);
        batch.delete_cf(self.cf(CF_TRACKED)?, &key);
        self.db.write(batch)?;
        Ok(())
    }

    async fn mark_reminded(
        &self,
        brand: &BrandId,
        customer: &str,
        last_added_at: Option<DateTime<Utc>>,
        date: NaiveDate,
    ) -> Result<bool> {
        let _guard = self.cart_lock.lock().await;
        let key = session_key(brand, customer);
        let Some(mut cart) = self.read_live::<Cart>(CF_CARTS, &key)? else {
            return Ok(false);
        };
        if cart.is_empty() || cart.last_added_at != last_added_at {
            return Ok(false);
        }
        cart.last_reminder_date = Some(date);
        self.write_stamped(CF_CARTS, &key, cart, self.cart_ttl)?;
        Ok(true)
    }

    async fn tracked_customers(&self, brand: &BrandId) -> Result<Vec<String>> {
        let prefix = format!("{brand}:");
        let iter = self.db.iterator_cf(
            self.cf(CF_TRACKED)?,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );

        let mut customers = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let key = String::from_utf8_lossy(&key);
            match key.strip_prefix(&prefix) {
                Some(customer) => customers.push(customer.to_string()),
                None => break,
            }
        }
        Ok(customers)
    }

    async fn untrack(&self, brand: &BrandId, customer: &str) -> Result<()> {
        self.delete(CF_TRACKED, &session_key(brand, customer))
    }

    async fn get_discount(&self, brand: &BrandId) -> Result<Option<Decimal>> {
        self.read(CF_DISCOUNTS, brand.as_str())
    }

    async fn set_discount(&self, brand: &BrandId, percentage: Decimal) -> Result<()> {
        self.write(CF_DISCOUNTS, brand.as_str(), &percentage)
    }

    async fn clear_discount(&self, brand: &BrandId) -> Result<()> {
        self.delete(CF_DISCOUNTS, brand.as_str())
    }
}

#[async_trait]
impl OrderStore for RocksDbStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.locate(&order.order_id)?.is_some() {
            return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
        }

        let key = format!("{}:{}", order.brand_id, order.order_id);
        let index = serde_json::to_vec(&IndexEntry {
            key: key.clone(),
            archived: false,
        })?;
        let record = serde_json::to_vec(&StoredOrder {
            order: order.clone(),
            version: 1,
        })?;

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ORDERS_ACTIVE)?, &key, record);
        batch.put_cf(self.cf(CF_ORDER_INDEX)?, &order.order_id, index);
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<LedgerEntry>> {
        let Some(location) = self.locate(order_id)? else {
            return Ok(None);
        };
        let cf = if location.archived {
            CF_ORDERS_ARCHIVE
        } else {
            CF_ORDERS_ACTIVE
        };
        let stored: Option<StoredOrder> = self.read(cf, &location.key)?;
        Ok(stored.map(|s| LedgerEntry {
            order: s.order,
            version: s.version,
            archived: location.archived,
        }))
    }

    async fn compare_and_swap(&self, expected_version: u64, order: Order) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let location = self
            .locate(&order.order_id)?
            .ok_or_else(|| CommerceError::OrderNotFound(order.order_id.clone()))?;
        if location.archived {
            return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
        }

        let current: StoredOrder = self
            .read(CF_ORDERS_ACTIVE, &location.key)?
            .ok_or_else(|| CommerceError::OrderNotFound(order.order_id.clone()))?;
        if current.version != expected_version {
            return Err(CommerceError::ConcurrentUpdateConflict(order.order_id));
        }

        let version = current.version + 1;
        self.write(CF_ORDERS_ACTIVE, &location.key, &StoredOrder { order, version })?;
        Ok(version)
    }

    async fn archive(&self, order_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let Some(location) = self.locate(order_id)? else {
            return Ok(false);
        };
        if location.archived {
            return Ok(false);
        }
        let Some(bytes) = self.db.get_cf(self.cf(CF_ORDERS_ACTIVE)?, &location.key)? else {
            return Ok(false);
        };

        let index = serde_json::to_vec(&IndexEntry {
            key: location.key.clone(),
            archived: true,
        })?;
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_ORDERS_ARCHIVE)?, &location.key, bytes);
        batch.delete_cf(self.cf(CF_ORDERS_ACTIVE)?, &location.key);
        batch.put_cf(self.cf(CF_ORDER_INDEX)?, order_id, index);
        self.db.write(batch)?;
        Ok(true)
    }
}
