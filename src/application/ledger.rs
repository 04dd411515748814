use crate::application::effects::{best_effort, bounded, record_activity};
use crate::domain::brand::BrandContext;
use crate::domain::cart::DeliveryType;
use crate::domain::geo::GeoResolver;
use crate::domain::order::{Order, OrderStatus, PaymentMethod, Pricing, generate_order_id};
use crate::domain::ports::{
    ActivityEntry, LedgerEntry, SharedActivitySink, SharedMessenger, SharedOrderStore,
    SharedPaymentLinks, SharedSessionStore,
};
use crate::error::{CommerceError, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Attempts at drawing an unused order id before giving up.
const ORDER_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct LedgerPolicy {
    pub radius_km: f64,
    pub external_timeout: Duration,
    /// Re-reads allowed when a status write loses a compare-and-swap race.
    pub max_status_retries: u32,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            radius_km: 6.0,
            external_timeout: Duration::from_secs(10),
            max_status_retries: 5,
        }
    }
}

/// Parameters chosen by the customer at the payment step.
#[derive(Debug, Clone, Copy)]
pub struct Checkout {
    pub payment_method: PaymentMethod,
    pub now: DateTime<Utc>,
}

impl Checkout {
    pub fn new(payment_method: PaymentMethod) -> Self {
        Self {
            payment_method,
            now: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order: Order,
    /// Whether the branch alert for a cash order went out.
    pub branch_alerted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmOutcome {
    Confirmed(Order),
    /// The order had already left `Pending`; nothing was changed or sent.
    AlreadyConfirmed(Order),
}

/// Order lifecycle on top of an [`OrderStore`](crate::domain::ports::OrderStore).
///
/// Status changes go through compare-and-swap on the record version, so two
/// racing writers never silently overwrite each other: the loser re-reads and
/// either re-applies its transition or is rejected with `InvalidTransition`.
#[derive(Clone)]
pub struct OrderLedger {
    orders: SharedOrderStore,
    sessions: SharedSessionStore,
    messenger: SharedMessenger,
    payments: SharedPaymentLinks,
    activity: Option<SharedActivitySink>,
    policy: LedgerPolicy,
}

impl OrderLedger {
    pub fn new(
        orders: SharedOrderStore,
        sessions: SharedSessionStore,
        messenger: SharedMessenger,
        payments: SharedPaymentLinks,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            orders,
            sessions,
            messenger,
            payments,
            activity: None,
            policy,
        }
    }

    pub fn with_activity(mut self, sink: SharedActivitySink) -> Self {
        self.activity = Some(sink);
        self
    }

    pub fn policy(&self) -> LedgerPolicy {
        self.policy
    }

    pub async fn create_order(&self, order: Order) -> Result<Order> {
        self.orders.insert(order.clone()).await?;
        info!(
            order_id = %order.order_id,
            brand = %order.brand_id,
            customer = %order.user_id,
            status = %order.status,
            total = %order.total,
            "order created"
        );
        Ok(order)
    }

    pub async fn get_order(&self, order_id: &str) -> Result<Order> {
        self.get_entry(order_id).await.map(|entry| entry.order)
    }

    /// The stored record with its version and partition.
    pub async fn get_entry(&self, order_id: &str) -> Result<LedgerEntry> {
        self.orders
            .get(order_id)
            .await?
            .ok_or_else(|| CommerceError::OrderNotFound(order_id.to_string()))
    }

    pub async fn update_status(&self, order_id: &str, status: OrderStatus) -> Result<Order> {
        self.transition(order_id, status, None).await
    }

    pub async fn archive(&self, order_id: &str) -> Result<bool> {
        let moved = self.orders.archive(order_id).await?;
        if moved {
            debug!(order_id, "order archived");
        }
        Ok(moved)
    }

    async fn transition(
        &self,
        order_id: &str,
        status: OrderStatus,
        payment_method: Option<PaymentMethod>,
    ) -> Result<Order> {
        for attempt in 0..=self.policy.max_status_retries {
            let entry = self.get_entry(order_id).await?;
            let current = entry.order.status;
            if !current.can_transition_to(status) {
                return Err(CommerceError::InvalidTransition {
                    order_id: order_id.to_string(),
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }

            let mut updated = entry.order.with_status(status, Utc::now());
            if let Some(method) = payment_method {
                updated.payment_method = method;
            }

            match self.orders.compare_and_swap(entry.version, updated.clone()).await {
                Ok(_) => {
                    info!(order_id, from = %current, to = %status, "order status updated");
                    if status.is_terminal() {
                        self.archive(order_id).await?;
                    }
                    return Ok(updated);
                }
                Err(CommerceError::ConcurrentUpdateConflict(_)) => {
                    debug!(order_id, attempt, "status write lost a race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }
        warn!(order_id, "giving up on status update after repeated conflicts");
        Err(CommerceError::ConcurrentUpdateConflict(order_id.to_string()))
    }

    /// Turns the customer's cart into an order.
    ///
    /// Nothing is written when validation or the payment-link call fails.
    /// Once the order is stored the cart is deleted and, for cash orders, the
    /// branch is alerted; failures of those follow-ups are logged only.
    pub async fn place_order(
        &self,
        brand: &BrandContext,
        customer: &str,
        checkout: Checkout,
    ) -> Result<PlacedOrder> {
        let cart = self.sessions.get_cart(&brand.id, customer).await?;
        if cart.is_empty() {
            return Err(CommerceError::EmptyCart);
        }

        let delivery_type = cart.delivery_type.unwrap_or(DeliveryType::Delivery);
        let mut branch = cart.branch.clone();
        if delivery_type == DeliveryType::Delivery
            && let Some(location) = cart.location
        {
            let check = GeoResolver::new(&brand.branches, self.policy.radius_km)?
                .is_within_radius(location.latitude, location.longitude)?;
            if !check.within {
                return Err(CommerceError::OutOfRadius {
                    branch: check.branch,
                    distance_km: check.distance_km,
                });
            }
            branch = Some(check.branch);
        }

        let discount = self.sessions.get_discount(&brand.id).await?;
        let pricing = Pricing::compute(cart.total(), discount);
        let order_id = self.unused_order_id(checkout.now).await?;

        let payment_link = match checkout.payment_method {
            PaymentMethod::CashOnDelivery => None,
            PaymentMethod::Online => {
                let amount = pricing.total.to_subunits().ok_or_else(|| {
                    CommerceError::external("payment link", "amount out of range")
                })?;
                let link = bounded(
                    "payment link",
                    self.policy.external_timeout,
                    self.payments
                        .create_payment_link(brand, amount, &order_id, customer),
                )
                .await?;
                Some(link)
            }
        };

        let order = Order {
            order_id,
            user_id: customer.to_string(),
            brand_id: brand.id.clone(),
            items: cart.items.clone(),
            actual_total: pricing.actual_total,
            discount_percentage: pricing.discount_percentage,
            discount_amount: pricing.discount_amount,
            total: pricing.total,
            delivery_type,
            delivery_address: cart.address.clone(),
            location: cart.location,
            payment_method: checkout.payment_method,
            branch,
            payment_link,
            status: checkout.payment_method.initial_status(),
            order_date: checkout.now,
            updated_at: checkout.now,
        };
        let order = self.create_order(order).await?;

        if let Err(e) = self.sessions.delete_cart(&brand.id, customer).await {
            error!(order_id = %order.order_id, error = %e, "order placed but cart was not cleared");
        }

        record_activity(
            self.activity.as_ref(),
            ActivityEntry::new(
                &brand.id,
                customer,
                "order_placed",
                format!(
                    "{} {} {} total={}",
                    order.order_id, order.payment_method, order.delivery_type, order.total
                ),
            ),
        )
        .await;

        let branch_alerted = match checkout.payment_method {
            PaymentMethod::CashOnDelivery => self.alert_branch(brand, &order).await,
            PaymentMethod::Online => false,
        };

        Ok(PlacedOrder {
            order,
            branch_alerted,
        })
    }

    /// Marks a pending order as paid and notifies the branch and the
    /// customer. Repeated confirmations are no-ops.
    pub async fn confirm_order(
        &self,
        brand: &BrandContext,
        customer: &str,
        order_id: &str,
        method: PaymentMethod,
    ) -> Result<ConfirmOutcome> {
        let entry = self.get_entry(order_id).await?;
        if entry.order.brand_id != brand.id {
            warn!(order_id, brand = %brand.id, owner = %entry.order.brand_id, "confirmation for another brand's order");
            return Err(CommerceError::OrderNotFound(order_id.to_string()));
        }
        if entry.order.status != OrderStatus::Pending {
            return Ok(ConfirmOutcome::AlreadyConfirmed(entry.order));
        }

        let order = match self.transition(order_id, OrderStatus::Paid, Some(method)).await {
            Ok(order) => order,
            Err(CommerceError::InvalidTransition { .. }) => {
                return Ok(ConfirmOutcome::AlreadyConfirmed(self.get_order(order_id).await?));
            }
            Err(e) => return Err(e),
        };

        self.alert_branch(brand, &order).await;
        let recipient = customer.trim_start_matches('+');
        best_effort(
            "order confirmation",
            self.policy.external_timeout,
            self.messenger.send_order_confirmation(brand, recipient, &order),
        )
        .await;

        record_activity(
            self.activity.as_ref(),
            ActivityEntry::new(&brand.id, recipient, "order_confirmed", order.order_id.clone()),
        )
        .await;

        Ok(ConfirmOutcome::Confirmed(order))
    }

    async fn alert_branch(&self, brand: &BrandContext, order: &Order) -> bool {
        let Some(branch) = order.branch.as_deref().and_then(|name| brand.branch(name)) else {
            return false;
        };
        best_effort(
            "order alert",
            self.policy.external_timeout,
            self.messenger.send_order_alert(brand, branch, order),
        )
        .await
    }

    async fn unused_order_id(&self, now: DateTime<Utc>) -> Result<String> {
        for _ in 0..ORDER_ID_ATTEMPTS {
            let candidate = generate_order_id(now);
            if self.orders.get(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(CommerceError::ConcurrentUpdateConflict(
            "could not allocate an unused order id".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::brand::{Branch, BrandId, Product};
    use crate::domain::cart::Money;
    use crate::infrastructure::in_memory::{InMemoryOrderStore, InMemorySessionStore};
    use crate::infrastructure::outbound::{PlaceholderPaymentLinks, TracingMessenger};
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn brand() -> BrandContext {
        BrandContext {
            id: BrandId::new("kanuka"),
            name: "Kanuka Organics".to_string(),
            phone_number_id: "1001".to_string(),
            catalog_id: None,
            access_token: None,
            webhook_secret: None,
            greeting: None,
            admin_numbers: vec![],
            catalog: BTreeMap::from([(
                "A".to_string(),
                Product {
                    name: "Jaggery".to_string(),
                    price: Money::new(dec!(100)),
                },
            )]),
            branches: vec![Branch {
                name: "Kondapur".to_string(),
                latitude: 17.4354,
                longitude: 78.3775,
                contacts: vec![],
            }],
        }
    }

    fn ledger() -> (OrderLedger, Arc<InMemorySessionStore>) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let ledger = OrderLedger::new(
            Arc::new(InMemoryOrderStore::new()),
            sessions.clone(),
            Arc::new(TracingMessenger),
            Arc::new(PlaceholderPaymentLinks),
            LedgerPolicy::default(),
        );
        (ledger, sessions)
    }

    async fn fill_cart(sessions: &InMemorySessionStore, brand: &BrandContext, qty: u32) {
        use crate::domain::ports::SessionStore;
        let product = brand.product("A").unwrap().clone();
        sessions
            .add_item(&brand.id, "9191", "A", &product, qty, Utc::now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_cart_writes_nothing() {
        let (ledger, _) = ledger();
        let err = ledger
            .place_order(&brand(), "9191", Checkout::new(PaymentMethod::CashOnDelivery))
            .await
            .unwrap_err();
        assert!(matches!(err, CommerceError::EmptyCart));
    }

    #[tokio::test]
    async fn test_discount_is_applied_and_cart_cleared() {
        use crate::domain::ports::SessionStore;
        let (ledger, sessions) = ledger();
        let brand = brand();
        fill_cart(&sessions, &brand, 2).await;
        sessions.set_discount(&brand.id, dec!(10)).await.unwrap();

        let placed = ledger
            .place_order(&brand, "9191", Checkout::new(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();

        assert_eq!(placed.order.actual_total, Money::new(dec!(200)));
        assert_eq!(placed.order.discount_amount, Money::new(dec!(20)));
        assert_eq!(placed.order.total, Money::new(dec!(180)));
        assert_eq!(placed.order.status, OrderStatus::Paid);
        assert!(sessions.get_cart(&brand.id, "9191").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_online_order_waits_for_confirmation() {
        let (ledger, sessions) = ledger();
        let brand = brand();
        fill_cart(&sessions, &brand, 1).await;

        let placed = ledger
            .place_order(&brand, "9191", Checkout::new(PaymentMethod::Online))
            .await
            .unwrap();
        assert_eq!(placed.order.status, OrderStatus::Pending);
        assert!(placed.order.payment_link.as_deref().unwrap().contains("amount=10000"));

        let id = placed.order.order_id.clone();
        let outcome = ledger
            .confirm_order(&brand, "+9191", &id, PaymentMethod::Online)
            .await
            .unwrap();
        assert!(matches!(outcome, ConfirmOutcome::Confirmed(ref o) if o.status == OrderStatus::Paid));

        let again = ledger
            .confirm_order(&brand, "9191", &id, PaymentMethod::Online)
            .await
            .unwrap();
        assert!(matches!(again, ConfirmOutcome::AlreadyConfirmed(_)));
    }

    #[tokio::test]
    async fn test_terminal_status_archives_but_stays_queryable() {
        let (ledger, sessions) = ledger();
        let brand = brand();
        fill_cart(&sessions, &brand, 1).await;
        let placed = ledger
            .place_order(&brand, "9191", Checkout::new(PaymentMethod::CashOnDelivery))
            .await
            .unwrap();
        let id = placed.order.order_id;

        ledger.update_status(&id, OrderStatus::Ready).await.unwrap();
        ledger.update_status(&id, OrderStatus::Delivered).await.unwrap();

        let entry = ledger.get_entry(&id).await.unwrap();
        assert!(entry.archived);
        assert_eq!(entry.order.status, OrderStatus::Delivered);

        let err = ledger.update_status(&id, OrderStatus::Ready).await.unwrap_err();
        assert!(matches!(err, CommerceError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (ledger, _) = ledger();
        assert!(matches!(
            ledger.update_status("ORDX", OrderStatus::Ready).await,
            Err(CommerceError::OrderNotFound(_))
        ));
        assert!(matches!(
            ledger
                .confirm_order(&brand(), "9191", "ORDX", PaymentMethod::Online)
                .await,
            Err(CommerceError::OrderNotFound(_))
        ));
    }
}
