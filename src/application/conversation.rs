use crate::application::effects::{best_effort, bounded, record_activity};
use crate::application::ledger::{Checkout, OrderLedger};
use crate::domain::brand::BrandContext;
use crate::domain::cart::DeliveryType;
use crate::domain::event::{EventKind, InboundEvent, OrderedItem};
use crate::domain::geo::{Coordinates, GeoResolver};
use crate::domain::order::{OrderStatus, PaymentMethod};
use crate::domain::ports::{ActivityEntry, SharedActivitySink, SharedGeocoder, SharedMessenger, SharedSessionStore};
use crate::domain::session::{ConversationState, Step};
use crate::error::{CommerceError, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const GREETINGS: [&str; 5] = ["hi", "hello", "hey", "hii", "namaste"];

pub const ORDER_NOW: &str = "ORDER_NOW";
pub const CONTINUE_SHOPPING: &str = "CONTINUE_SHOPPING";
pub const VIEW_CART: &str = "VIEW_CART";
pub const PROCEED_TO_CHECKOUT: &str = "PROCEED_TO_CHECKOUT";
pub const CLEAR_CART: &str = "CLEAR_CART";
pub const PAY_CASH: &str = "PAY_CASH";
pub const PAY_ONLINE: &str = "PAY_ONLINE";

/// True when any whole word of `text` is a greeting.
pub fn is_greeting(text: &str) -> bool {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| GREETINGS.contains(&word))
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiscountCommand {
    Set(Decimal),
    Clear,
}

/// `set discount <pct>` or `clear discount`. Other text is `Ok(None)`.
pub fn parse_discount_command(text: &str) -> Result<Option<DiscountCommand>> {
    let text = text.trim().to_lowercase();
    if text == "clear discount" {
        return Ok(Some(DiscountCommand::Clear));
    }
    let Some(rest) = text.strip_prefix("set discount") else {
        return Ok(None);
    };
    let value = rest.trim().trim_end_matches('%');
    let pct = Decimal::from_str(value)
        .map_err(|_| CommerceError::InvalidCommand(format!("`{value}` is not a percentage")))?;
    if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED {
        return Err(CommerceError::InvalidCommand(
            "discount must be above 0 and at most 100".to_string(),
        ));
    }
    Ok(Some(DiscountCommand::Set(pct)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusCommand {
    pub order_id: String,
    pub status: OrderStatus,
}

/// Recognises staff status updates such as `ready ORD2026...` or
/// `order is on the way ord2026...`. Keywords match case-insensitively
/// anywhere in the text; the order id is the last token, upper-cased.
pub fn parse_status_command(text: &str) -> Result<Option<StatusCommand>> {
    let lower = text.trim().to_lowercase();
    let mut statuses = Vec::new();
    if lower.contains("ready") {
        statuses.push(OrderStatus::Ready);
    }
    if lower.contains("on the way") || lower.contains("ontheway") {
        statuses.push(OrderStatus::OnTheWay);
    }
    if lower.contains("delivered") {
        statuses.push(OrderStatus::Delivered);
    }

    let status = match statuses.as_slice() {
        [] => return Ok(None),
        [status] => *status,
        _ => {
            return Err(CommerceError::InvalidCommand(
                "more than one status in the same command".to_string(),
            ));
        }
    };

    let order_id = lower
        .split_whitespace()
        .last()
        .map(str::to_uppercase)
        .filter(|token| is_order_id(token))
        .ok_or_else(|| CommerceError::InvalidCommand("missing order id".to_string()))?;

    Ok(Some(StatusCommand { order_id, status }))
}

/// Generated ids are `ORD` followed by a millisecond timestamp.
fn is_order_id(token: &str) -> bool {
    token
        .strip_prefix("ORD")
        .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

/// Text sent to the customer for a recoverable failure.
pub fn customer_message(error: &CommerceError) -> String {
    match error {
        CommerceError::EmptyCart => "Your cart is empty. Add something from the catalog first.".to_string(),
        CommerceError::OutOfRadius { branch, distance_km } => format!(
            "Sorry, we do not deliver to your location. Our nearest branch, {branch}, is {distance_km:.1} km away. You can pick up your order instead."
        ),
        CommerceError::OrderNotFound(id) => format!("Order {id} not found."),
        CommerceError::InvalidCommand(reason) => format!("Invalid command: {reason}"),
        CommerceError::InvalidCoordinate { .. } => {
            "That location could not be read. Please share it again.".to_string()
        }
        CommerceError::InvalidTransition { order_id, from, to } => {
            format!("Order {order_id} is {from} and cannot be marked {to}.")
        }
        _ => "Something went wrong on our side. Please try again in a moment.".to_string(),
    }
}

/// The per-customer ordering conversation.
///
/// Each inbound event is handled to completion: the session is read, the
/// store is updated, the next step is committed and only then are messages
/// sent. Messaging failures are logged and never undo a committed step.
#[derive(Clone)]
pub struct ConversationEngine {
    sessions: SharedSessionStore,
    ledger: OrderLedger,
    messenger: SharedMessenger,
    geocoder: SharedGeocoder,
    activity: Option<SharedActivitySink>,
}

impl ConversationEngine {
    pub fn new(
        sessions: SharedSessionStore,
        ledger: OrderLedger,
        messenger: SharedMessenger,
        geocoder: SharedGeocoder,
    ) -> Self {
        Self {
            sessions,
            ledger,
            messenger,
            geocoder,
            activity: None,
        }
    }

    pub fn with_activity(mut self, sink: SharedActivitySink) -> Self {
        self.activity = Some(sink);
        self
    }

    pub fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    fn timeout(&self) -> Duration {
        self.ledger.policy().external_timeout
    }

    /// Handles one inbound event and returns the customer's step afterwards.
    ///
    /// Validation failures and collaborator failures are answered with a
    /// message and leave the step unchanged. Only storage errors propagate.
    pub async fn handle(&self, brand: &BrandContext, event: InboundEvent) -> Result<Step> {
        let customer = event.customer.as_str();
        let state = self.sessions.get_state(&brand.id, customer).await?;
        let step = state.as_ref().map(|s| s.step).unwrap_or_default();

        debug!(brand = %brand.id, customer, %step, kind = ?event.kind, "inbound event");
        record_activity(
            self.activity.as_ref(),
            ActivityEntry::new(&brand.id, customer, "message_received", describe(&event.kind)),
        )
        .await;

        let outcome = match event.kind {
            EventKind::Text(text) => self.on_text(brand, customer, step, &text).await,
            EventKind::ButtonReply(id) => self.on_button(brand, customer, step, &id).await,
            EventKind::ListReply(id) => self.on_list_reply(brand, customer, step, &id).await,
            EventKind::CatalogSelection { product_id } => {
                let item = OrderedItem {
                    product_id,
                    quantity: 1,
                };
                self.on_items(brand, customer, step, &[item]).await
            }
            EventKind::Order(items) => self.on_items(brand, customer, step, &items).await,
            EventKind::Location {
                latitude,
                longitude,
            } => self.on_location(brand, customer, step, latitude, longitude).await,
        };

        match outcome {
            Ok(next) => Ok(next),
            Err(e) if e.is_user_facing() => {
                debug!(brand = %brand.id, customer, error = %e, "rejected customer action");
                self.say(brand, customer, &customer_message(&e)).await;
                Ok(step)
            }
            Err(e @ CommerceError::ExternalService { .. }) => {
                warn!(brand = %brand.id, customer, error = %e, "collaborator failure while handling event");
                self.say(brand, customer, &customer_message(&e)).await;
                Ok(step)
            }
            Err(e) => Err(e),
        }
    }

    async fn on_text(&self, brand: &BrandContext, customer: &str, step: Step, text: &str) -> Result<Step> {
        // Free text while checkout waits for an address is the address.
        match step {
            Step::EnteringAddress => return self.take_address(brand, customer, text).await,
            Step::SelectingDelivery => {
                return self.geocode_address(brand, customer, step, text).await;
            }
            _ => {}
        }

        let normalized = text.to_lowercase();

        if brand.is_staff(customer) {
            if let Some(command) = parse_discount_command(&normalized)? {
                return self.apply_discount(brand, customer, step, command).await;
            }
            if let Some(command) = parse_status_command(&normalized)? {
                return self.apply_status(brand, customer, step, command).await;
            }
        }

        if is_greeting(&normalized) {
            self.sessions.clear_state(&brand.id, customer).await?;
            let next = self.goto(brand, customer, ConversationState::at(Step::MainMenu)).await?;
            self.send(
                "main menu",
                self.messenger.send_main_menu(brand, customer),
            )
            .await;
            return Ok(next);
        }

        match normalized.as_str() {
            "menu" => {
                let next = self.goto(brand, customer, ConversationState::at(Step::MainMenu)).await?;
                self.send("main menu", self.messenger.send_main_menu(brand, customer))
                    .await;
                return Ok(next);
            }
            "catalog" => return self.show_catalog(brand, customer).await,
            "cart" => return self.show_cart(brand, customer).await,
            "clear cart" => return self.clear_cart(brand, customer).await,
            _ => {}
        }

        self.say(brand, customer, "Unsupported command").await;
        Ok(step)
    }

    async fn on_button(&self, brand: &BrandContext, customer: &str, step: Step, id: &str) -> Result<Step> {
        match id {
            ORDER_NOW | CONTINUE_SHOPPING => self.show_catalog(brand, customer).await,
            VIEW_CART => self.show_cart(brand, customer).await,
            CLEAR_CART => self.clear_cart(brand, customer).await,
            PROCEED_TO_CHECKOUT => self.start_checkout(brand, customer, step).await,
            PAY_CASH => {
                self.pay(brand, customer, step, PaymentMethod::CashOnDelivery)
                    .await
            }
            PAY_ONLINE => self.pay(brand, customer, step, PaymentMethod::Online).await,
            other => {
                debug!(brand = %brand.id, customer, button = other, "unknown button");
                self.say(brand, customer, "Unknown action").await;
                Ok(step)
            }
        }
    }

    async fn on_list_reply(&self, brand: &BrandContext, customer: &str, step: Step, id: &str) -> Result<Step> {
        if step != Step::SelectingDelivery {
            self.say(brand, customer, "Unsupported command").await;
            return Ok(step);
        }
        let Some(branch) = brand.branch(id) else {
            self.say(brand, customer, "Please pick one of the listed branches.")
                .await;
            self.send(
                "branch selection",
                self.messenger
                    .send_branch_selection(brand, customer, &brand.branches),
            )
            .await;
            return Ok(step);
        };

        let mut cart = self.sessions.get_cart(&brand.id, customer).await?;
        cart.branch = Some(branch.name.clone());
        cart.delivery_type = Some(DeliveryType::Takeaway);
        cart.location = None;
        self.sessions.put_cart(&brand.id, customer, cart).await?;
        let next = self
            .goto(brand, customer, ConversationState::at(Step::ChoosingPayment))
            .await?;

        self.say(
            brand,
            customer,
            &format!("Pickup from {}. How would you like to pay?", branch.name),
        )
        .await;
        self.send(
            "payment options",
            self.messenger.send_payment_options(brand, customer),
        )
        .await;
        Ok(next)
    }

    async fn on_items(&self, brand: &BrandContext, customer: &str, step: Step, items: &[OrderedItem]) -> Result<Step> {
        let now = Utc::now();
        let mut cart = None;
        for item in items {
            match brand.product(&item.product_id) {
                Some(product) => {
                    cart = Some(
                        self.sessions
                            .add_item(&brand.id, customer, &item.product_id, product, item.quantity, now)
                            .await?,
                    );
                }
                None => {
                    debug!(brand = %brand.id, product_id = %item.product_id, "unknown product");
                }
            }
        }

        let Some(cart) = cart else {
            self.say(brand, customer, "Product not found").await;
            return Ok(step);
        };

        let next = self
            .goto(brand, customer, ConversationState::at(Step::ViewingCart))
            .await?;
        self.send(
            "cart summary",
            self.messenger.send_cart_summary(brand, customer, &cart),
        )
        .await;
        Ok(next)
    }

    async fn on_location(
        &self,
        brand: &BrandContext,
        customer: &str,
        step: Step,
        latitude: f64,
        longitude: f64,
    ) -> Result<Step> {
        if step != Step::SelectingDelivery {
            self.say(
                brand,
                customer,
                "Thanks for the location. Start checkout from your cart to use it.",
            )
            .await;
            return Ok(step);
        }
        let location = Coordinates::new(latitude, longitude)?;
        self.resolve_delivery(brand, customer, step, location, None)
            .await
    }

    async fn geocode_address(&self, brand: &BrandContext, customer: &str, step: Step, address: &str) -> Result<Step> {
        let found = bounded("geocoding", self.timeout(), self.geocoder.geocode(address)).await?;
        match found {
            Some(location) => {
                self.resolve_delivery(brand, customer, step, location, Some(address))
                    .await
            }
            None => {
                self.say(
                    brand,
                    customer,
                    "We could not find that address. Please share your location instead.",
                )
                .await;
                Ok(step)
            }
        }
    }

    /// In range: the cart gets the location and branch and the customer is
    /// asked for the address. Out of range: nothing is stored and pickup is
    /// offered instead.
    async fn resolve_delivery(
        &self,
        brand: &BrandContext,
        customer: &str,
        step: Step,
        location: Coordinates,
        address: Option<&str>,
    ) -> Result<Step> {
        let check = GeoResolver::new(&brand.branches, self.ledger.policy().radius_km)?
            .is_within_radius(location.latitude, location.longitude)?;

        if !check.within {
            info!(
                brand = %brand.id,
                customer,
                branch = %check.branch,
                distance_km = check.distance_km,
                "location outside delivery radius"
            );
            let refusal = CommerceError::OutOfRadius {
                branch: check.branch,
                distance_km: check.distance_km,
            };
            self.say(brand, customer, &customer_message(&refusal)).await;
            self.send(
                "branch selection",
                self.messenger
                    .send_branch_selection(brand, customer, &brand.branches),
            )
            .await;
            return Ok(step);
        }

        let mut cart = self.sessions.get_cart(&brand.id, customer).await?;
        cart.location = Some(location);
        cart.branch = Some(check.branch.clone());
        cart.delivery_type = Some(DeliveryType::Delivery);
        if let Some(address) = address {
            cart.address = Some(address.to_string());
        }
        self.sessions.put_cart(&brand.id, customer, cart).await?;

        let mut state = ConversationState::at(Step::EnteringAddress);
        if let Some(address) = address {
            state = state.with_address(address);
        }
        let next = self.goto(brand, customer, state).await?;

        self.say(
            brand,
            customer,
            &format!(
                "Nearest branch: {} ({:.1} km). Please send your full delivery address.",
                check.branch, check.distance_km
            ),
        )
        .await;
        Ok(next)
    }

    async fn take_address(&self, brand: &BrandContext, customer: &str, address: &str) -> Result<Step> {
        let mut cart = self.sessions.get_cart(&brand.id, customer).await?;
        cart.address = Some(address.to_string());
        self.sessions.put_cart(&brand.id, customer, cart).await?;
        let next = self
            .goto(
                brand,
                customer,
                ConversationState::at(Step::ChoosingPayment).with_address(address),
            )
            .await?;
        self.send(
            "payment options",
            self.messenger.send_payment_options(brand, customer),
        )
        .await;
        Ok(next)
    }

    async fn start_checkout(&self, brand: &BrandContext, customer: &str, step: Step) -> Result<Step> {
        if step != Step::ViewingCart {
            return self.show_cart(brand, customer).await;
        }

        let mut cart = self.sessions.get_cart(&brand.id, customer).await?;
        if cart.is_empty() {
            let next = self
                .goto(brand, customer, ConversationState::at(Step::ViewingCatalog))
                .await?;
            self.say(brand, customer, &customer_message(&CommerceError::EmptyCart))
                .await;
            self.send("catalog", self.messenger.send_catalog(brand, customer))
                .await;
            return Ok(next);
        }

        cart.delivery_type = Some(DeliveryType::Delivery);
        self.sessions.put_cart(&brand.id, customer, cart).await?;
        let discount = self.sessions.get_discount(&brand.id).await?;
        let next = self
            .goto(brand, customer, ConversationState::at(Step::SelectingDelivery))
            .await?;

        if let Some(pct) = discount {
            self.say(
                brand,
                customer,
                &format!("Good news! {}% off is applied to your order.", pct.normalize()),
            )
            .await;
        }
        self.send(
            "location request",
            self.messenger.send_location_request(brand, customer),
        )
        .await;
        Ok(next)
    }

    async fn pay(&self, brand: &BrandContext, customer: &str, step: Step, method: PaymentMethod) -> Result<Step> {
        if step != Step::ChoosingPayment {
            self.say(
                brand,
                customer,
                "Please choose a delivery option before paying.",
            )
            .await;
            return Ok(step);
        }

        let placed = self
            .ledger
            .place_order(brand, customer, Checkout::new(method))
            .await?;
        let next = self
            .goto(brand, customer, ConversationState::at(Step::MainMenu))
            .await?;

        let order = &placed.order;
        match (&order.payment_link, method) {
            (Some(link), PaymentMethod::Online) => {
                self.send(
                    "payment link",
                    self.messenger.send_payment_link(brand, customer, order, link),
                )
                .await;
            }
            _ => {
                self.send(
                    "order confirmation",
                    self.messenger.send_order_confirmation(brand, customer, order),
                )
                .await;
            }
        }
        Ok(next)
    }

    async fn show_catalog(&self, brand: &BrandContext, customer: &str) -> Result<Step> {
        let next = self
            .goto(brand, customer, ConversationState::at(Step::ViewingCatalog))
            .await?;
        self.send("catalog", self.messenger.send_catalog(brand, customer))
            .await;
        Ok(next)
    }

    async fn show_cart(&self, brand: &BrandContext, customer: &str) -> Result<Step> {
        let cart = self.sessions.get_cart(&brand.id, customer).await?;
        let next = self
            .goto(brand, customer, ConversationState::at(Step::ViewingCart))
            .await?;
        self.send(
            "cart summary",
            self.messenger.send_cart_summary(brand, customer, &cart),
        )
        .await;
        Ok(next)
    }

    async fn clear_cart(&self, brand: &BrandContext, customer: &str) -> Result<Step> {
        self.sessions.delete_cart(&brand.id, customer).await?;
        let next = self
            .goto(brand, customer, ConversationState::at(Step::ViewingCatalog))
            .await?;
        self.say(brand, customer, "Your cart has been cleared.").await;
        self.send("catalog", self.messenger.send_catalog(brand, customer))
            .await;
        Ok(next)
    }

    async fn apply_discount(
        &self,
        brand: &BrandContext,
        admin: &str,
        step: Step,
        command: DiscountCommand,
    ) -> Result<Step> {
        let reply = match command {
            DiscountCommand::Set(pct) => {
                self.sessions.set_discount(&brand.id, pct).await?;
                info!(brand = %brand.id, admin, percentage = %pct, "discount set");
                format!("Discount set to {}%", pct.normalize())
            }
            DiscountCommand::Clear => {
                self.sessions.clear_discount(&brand.id).await?;
                info!(brand = %brand.id, admin, "discount cleared");
                "Discount cleared".to_string()
            }
        };
        self.say(brand, admin, &reply).await;
        Ok(step)
    }

    async fn apply_status(&self, brand: &BrandContext, admin: &str, step: Step, command: StatusCommand) -> Result<Step> {
        let existing = self.ledger.get_order(&command.order_id).await?;
        if existing.brand_id != brand.id {
            return Err(CommerceError::OrderNotFound(command.order_id));
        }

        let order = self
            .ledger
            .update_status(&command.order_id, command.status)
            .await?;

        record_activity(
            self.activity.as_ref(),
            ActivityEntry::new(
                &brand.id,
                admin,
                "status_updated",
                format!("{} {}", order.order_id, order.status),
            ),
        )
        .await;

        self.send(
            "status update",
            self.messenger
                .send_order_status_update(brand, &order.user_id, &order.order_id, order.status),
        )
        .await;
        self.say(
            brand,
            admin,
            &format!("Order {} updated to {}", order.order_id, order.status),
        )
        .await;
        Ok(step)
    }

    async fn goto(&self, brand: &BrandContext, customer: &str, state: ConversationState) -> Result<Step> {
        let step = state.step;
        self.sessions.put_state(&brand.id, customer, state).await?;
        Ok(step)
    }

    async fn say(&self, brand: &BrandContext, to: &str, body: &str) {
        self.send("text", self.messenger.send_text(brand, to, body))
            .await;
    }

    async fn send<F>(&self, what: &'static str, call: F)
    where
        F: std::future::Future<Output = Result<()>>,
    {
        best_effort(what, self.timeout(), call).await;
    }
}

fn describe(kind: &EventKind) -> String {
    match kind {
        EventKind::Text(text) => format!("text: {text}"),
        EventKind::ButtonReply(id) => format!("button: {id}"),
        EventKind::ListReply(id) => format!("list: {id}"),
        EventKind::CatalogSelection { product_id } => format!("catalog: {product_id}"),
        EventKind::Order(items) => format!("order: {} items", items.len()),
        EventKind::Location {
            latitude,
            longitude,
        } => format!("location: {latitude},{longitude}"),
    }
}
