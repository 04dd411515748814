#![allow(dead_code)]

use async_trait::async_trait;
use chatcart::application::conversation::ConversationEngine;
use chatcart::application::ledger::{LedgerPolicy, OrderLedger};
use chatcart::application::registry::BrandRegistry;
use chatcart::application::webhook::{PaymentWebhookHandler, WebhookAuthenticator};
use chatcart::domain::brand::{Branch, BrandContext, BrandId, Product};
use chatcart::domain::cart::{Cart, Money};
use chatcart::domain::event::{EventKind, InboundEvent};
use chatcart::domain::geo::Coordinates;
use chatcart::domain::order::{Order, OrderStatus};
use chatcart::domain::ports::{Geocoder, Messenger, PaymentLinks, SessionStore};
use chatcart::error::{CommerceError, Result};
use chatcart::infrastructure::in_memory::{InMemoryOrderStore, InMemorySessionStore};
use chrono::Utc;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CUSTOMER: &str = "919000000001";
pub const ADMIN: &str = "918074301029";
pub const BRANCH_CONTACT: &str = "916302588275";

/// Kondapur, Hyderabad.
pub const NEAR: (f64, f64) = (17.4401, 78.3489);
/// Secunderabad, about 20 km from every branch.
pub const FAR: (f64, f64) = (17.5043, 78.5463);

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub brand: String,
    pub to: String,
    pub intent: &'static str,
    pub body: String,
}

/// A cart change applied by the messenger while a reminder is in flight.
#[derive(Clone)]
pub enum CartChange {
    Delete,
    Add(String, Product),
}

/// Remembers every outbound intent in order.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<Sent>>,
    fail: AtomicBool,
    during_reminder: Mutex<Option<(Arc<InMemorySessionStore>, CartChange)>>,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn intents(&self) -> Vec<&'static str> {
        self.sent().into_iter().map(|s| s.intent).collect()
    }

    pub fn count(&self, intent: &str) -> usize {
        self.sent().iter().filter(|s| s.intent == intent).count()
    }

    pub fn texts_to(&self, to: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|s| s.to == to && s.intent == "text")
            .map(|s| s.body)
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Makes every later send fail.
    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Applies `change` to the recipient's cart while each reminder is sent.
    pub fn change_cart_during_reminder(&self, sessions: Arc<InMemorySessionStore>, change: CartChange) {
        *self.during_reminder.lock().unwrap() = Some((sessions, change));
    }

    fn push(&self, brand: &BrandContext, to: &str, intent: &'static str, body: String) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CommerceError::external("messaging", "provider unavailable"));
        }
        self.sent.lock().unwrap().push(Sent {
            brand: brand.id.to_string(),
            to: to.to_string(),
            intent,
            body,
        });
        Ok(())
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_text(&self, brand: &BrandContext, to: &str, body: &str) -> Result<()> {
        self.push(brand, to, "text", body.to_string())
    }

    async fn send_catalog(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.push(brand, to, "catalog", String::new())
    }

    async fn send_main_menu(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.push(brand, to, "main_menu", String::new())
    }

    async fn send_cart_summary(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()> {
        self.push(brand, to, "cart_summary", cart.total().to_string())
    }

    async fn send_payment_options(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.push(brand, to, "payment_options", String::new())
    }

    async fn send_location_request(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.push(brand, to, "location_request", String::new())
    }

    async fn send_branch_selection(&self, brand: &BrandContext, to: &str, branches: &[Branch]) -> Result<()> {
        let names = branches.iter().map(|b| b.name.as_str()).collect::<Vec<_>>();
        self.push(brand, to, "branch_selection", names.join(","))
    }

    async fn send_payment_link(&self, brand: &BrandContext, to: &str, order: &Order, link: &str) -> Result<()> {
        self.push(brand, to, "payment_link", format!("{} {link}", order.order_id))
    }

    async fn send_order_confirmation(&self, brand: &BrandContext, to: &str, order: &Order) -> Result<()> {
        self.push(brand, to, "order_confirmation", order.order_id.clone())
    }

    async fn send_order_alert(&self, brand: &BrandContext, branch: &Branch, order: &Order) -> Result<()> {
        self.push(brand, &branch.name, "order_alert", order.order_id.clone())
    }

    async fn send_order_status_update(
        &self,
        brand: &BrandContext,
        to: &str,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<()> {
        self.push(brand, to, "order_status", format!("{order_id} {status}"))
    }

    async fn send_cart_reminder(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()> {
        self.push(brand, to, "cart_reminder", cart.item_count().to_string())?;
        let hook = self.during_reminder.lock().unwrap().clone();
        match hook {
            Some((sessions, CartChange::Delete)) => sessions.delete_cart(&brand.id, to).await,
            Some((sessions, CartChange::Add(product_id, product))) => sessions
                .add_item(&brand.id, to, &product_id, &product, 1, Utc::now())
                .await
                .map(|_| ()),
            None => Ok(()),
        }
    }
}

/// Resolves addresses from a fixed table.
#[derive(Default)]
pub struct FixedGeocoder {
    known: HashMap<String, Coordinates>,
}

impl FixedGeocoder {
    pub fn with(mut self, address: &str, (latitude, longitude): (f64, f64)) -> Self {
        self.known.insert(
            address.to_string(),
            Coordinates::new(latitude, longitude).unwrap(),
        );
        self
    }
}

#[async_trait]
impl Geocoder for FixedGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        Ok(self.known.get(address).copied())
    }
}

/// Payment links that can be switched into a failing or slow mode.
#[derive(Default)]
pub struct StubPayments {
    fail: AtomicBool,
    stall: AtomicBool,
    created: Mutex<Vec<(String, i64)>>,
}

impl StubPayments {
    pub fn failing() -> Self {
        let stub = Self::default();
        stub.fail.store(true, Ordering::SeqCst);
        stub
    }

    pub fn stalling() -> Self {
        let stub = Self::default();
        stub.stall.store(true, Ordering::SeqCst);
        stub
    }

    pub fn created(&self) -> Vec<(String, i64)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentLinks for StubPayments {
    async fn create_payment_link(
        &self,
        _brand: &BrandContext,
        amount_subunits: i64,
        order_id: &str,
        _customer_contact: &str,
    ) -> Result<String> {
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CommerceError::external("payment link", "provider returned 500"));
        }
        self.created
            .lock()
            .unwrap()
            .push((order_id.to_string(), amount_subunits));
        Ok(format!("https://pay.test/{order_id}"))
    }
}

fn product(name: &str, price: rust_decimal::Decimal) -> Product {
    Product {
        name: name.to_string(),
        price: Money::new(price),
    }
}

pub fn kanuka() -> BrandContext {
    BrandContext {
        id: BrandId::new("kanuka"),
        name: "Kanuka Organics".to_string(),
        phone_number_id: "1001".to_string(),
        catalog_id: Some("cat-kanuka".to_string()),
        access_token: None,
        webhook_secret: Some("kanuka-secret".to_string()),
        greeting: None,
        admin_numbers: vec![ADMIN.to_string()],
        catalog: BTreeMap::from([
            ("A".to_string(), product("Palm Jaggery", dec!(100))),
            ("B".to_string(), product("Millet Flour", dec!(250))),
        ]),
        branches: vec![
            Branch {
                name: "Kondapur".to_string(),
                latitude: 17.4354,
                longitude: 78.3775,
                contacts: vec![BRANCH_CONTACT.to_string()],
            },
            Branch {
                name: "Jubilee Hills".to_string(),
                latitude: 17.4326,
                longitude: 78.4071,
                contacts: vec![],
            },
        ],
    }
}

pub fn laurent() -> BrandContext {
    BrandContext {
        id: BrandId::new("laurent"),
        name: "Laurent Bakery".to_string(),
        phone_number_id: "2002".to_string(),
        catalog_id: None,
        access_token: None,
        webhook_secret: Some("laurent-secret".to_string()),
        greeting: Some("Bonjour!".to_string()),
        admin_numbers: vec![],
        catalog: BTreeMap::from([("A".to_string(), product("Croissant", dec!(80)))]),
        branches: vec![Branch {
            name: "Banjara Hills".to_string(),
            latitude: 17.4156,
            longitude: 78.4347,
            contacts: vec![],
        }],
    }
}

pub fn event(customer: &str, kind: EventKind) -> InboundEvent {
    InboundEvent {
        tenant_hint: None,
        customer: customer.to_string(),
        kind,
    }
}

pub fn text(body: &str) -> EventKind {
    EventKind::Text(body.to_string())
}

pub fn button(id: &str) -> EventKind {
    EventKind::ButtonReply(id.to_string())
}

/// Everything wired over in-memory stores and the test doubles.
pub struct Harness {
    pub registry: Arc<BrandRegistry>,
    pub sessions: Arc<InMemorySessionStore>,
    pub orders: Arc<InMemoryOrderStore>,
    pub messenger: Arc<RecordingMessenger>,
    pub payments: Arc<StubPayments>,
    pub ledger: OrderLedger,
    pub engine: ConversationEngine,
    pub webhooks: PaymentWebhookHandler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(StubPayments::default(), FixedGeocoder::default())
    }

    pub fn with(payments: StubPayments, geocoder: FixedGeocoder) -> Self {
        let registry = Arc::new(BrandRegistry::new(vec![kanuka(), laurent()], Some("kanuka")).unwrap());
        let sessions = Arc::new(InMemorySessionStore::new());
        let orders = Arc::new(InMemoryOrderStore::new());
        let messenger = Arc::new(RecordingMessenger::default());
        let payments = Arc::new(payments);
        let ledger = OrderLedger::new(
            orders.clone(),
            sessions.clone(),
            messenger.clone(),
            payments.clone(),
            LedgerPolicy {
                external_timeout: Duration::from_millis(200),
                ..LedgerPolicy::default()
            },
        );
        let engine = ConversationEngine::new(
            sessions.clone(),
            ledger.clone(),
            messenger.clone(),
            Arc::new(geocoder),
        );
        let webhooks = PaymentWebhookHandler::new(
            WebhookAuthenticator::new(registry.clone(), ledger.clone()),
            ledger.clone(),
        );
        Self {
            registry,
            sessions,
            orders,
            messenger,
            payments,
            ledger,
            engine,
            webhooks,
        }
    }

    pub fn brand(&self, id: &str) -> Arc<BrandContext> {
        self.registry.get(&BrandId::new(id)).unwrap()
    }
}
