//! Collaborators shipped with the binary: a messenger that renders every
//! intent and writes it to the log, a payment-link generator that builds
//! placeholder checkout URLs, and a geocoder over the Google Geocoding API.

use crate::domain::brand::{Branch, BrandContext};
use crate::domain::cart::Cart;
use crate::domain::geo::Coordinates;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::ports::{Geocoder, Messenger, PaymentLinks};
use crate::error::{CommerceError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::{error, info, warn};

pub fn render_cart(cart: &Cart) -> String {
    if cart.is_empty() {
        return "Your cart is empty.".to_string();
    }
    let mut body = String::from("Your cart:\n");
    for item in &cart.items {
        let _ = writeln!(body, "{} x {} = {}", item.quantity, item.name, item.subtotal());
    }
    let _ = write!(body, "Total: {}", cart.total());
    body
}

pub fn render_order(order: &Order) -> String {
    let mut body = format!("Order {}\n", order.order_id);
    for item in &order.items {
        let _ = writeln!(body, "{} x {} = {}", item.quantity, item.name, item.subtotal());
    }
    if order.discount_percentage > rust_decimal::Decimal::ZERO {
        let _ = writeln!(
            body,
            "Subtotal: {}\nDiscount ({}%): -{}",
            order.actual_total,
            order.discount_percentage.normalize(),
            order.discount_amount
        );
    }
    let _ = writeln!(body, "Total: {}", order.total);
    let _ = writeln!(body, "{} / {}", order.delivery_type, order.payment_method);
    if let Some(address) = &order.delivery_address {
        let _ = writeln!(body, "Address: {address}");
    }
    let _ = write!(body, "Customer: {}", order.user_id);
    body
}

/// Logs each outbound intent with its rendered body instead of calling a
/// messaging provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMessenger;

impl TracingMessenger {
    fn emit(&self, brand: &BrandContext, to: &str, intent: &'static str, body: &str) -> Result<()> {
        info!(brand = %brand.id, to, intent, body, "outbound message");
        Ok(())
    }
}

#[async_trait]
impl Messenger for TracingMessenger {
    async fn send_text(&self, brand: &BrandContext, to: &str, body: &str) -> Result<()> {
        self.emit(brand, to, "text", body)
    }

    async fn send_catalog(&self, brand: &BrandContext, to: &str) -> Result<()> {
        let products = brand
            .catalog
            .iter()
            .map(|(id, p)| format!("{id}: {} ({})", p.name, p.price))
            .collect::<Vec<_>>()
            .join("\n");
        self.emit(brand, to, "catalog", &products)
    }

    async fn send_main_menu(&self, brand: &BrandContext, to: &str) -> Result<()> {
        let greeting = brand
            .greeting
            .clone()
            .unwrap_or_else(|| format!("Welcome to {}!", brand.name));
        self.emit(brand, to, "main_menu", &format!("{greeting} [ORDER_NOW] [VIEW_CART]"))
    }

    async fn send_cart_summary(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()> {
        let body = format!(
            "{}\n[PROCEED_TO_CHECKOUT] [CONTINUE_SHOPPING] [CLEAR_CART]",
            render_cart(cart)
        );
        self.emit(brand, to, "cart_summary", &body)
    }

    async fn send_payment_options(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.emit(brand, to, "payment_options", "How would you like to pay? [PAY_CASH] [PAY_ONLINE]")
    }

    async fn send_location_request(&self, brand: &BrandContext, to: &str) -> Result<()> {
        self.emit(
            brand,
            to,
            "location_request",
            "Please share your location or type your delivery address.",
        )
    }

    async fn send_branch_selection(&self, brand: &BrandContext, to: &str, branches: &[Branch]) -> Result<()> {
        let names = branches
            .iter()
            .map(|b| b.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        self.emit(
            brand,
            to,
            "branch_selection",
            &format!("Pick up from one of our branches: {names}"),
        )
    }

    async fn send_payment_link(&self, brand: &BrandContext, to: &str, order: &Order, link: &str) -> Result<()> {
        self.emit(
            brand,
            to,
            "payment_link",
            &format!("Pay {} for order {}: {link}", order.total, order.order_id),
        )
    }

    async fn send_order_confirmation(&self, brand: &BrandContext, to: &str, order: &Order) -> Result<()> {
        self.emit(
            brand,
            to,
            "order_confirmation",
            &format!("Thank you! Your order is confirmed.\n{}", render_order(order)),
        )
    }

    async fn send_order_alert(&self, brand: &BrandContext, branch: &Branch, order: &Order) -> Result<()> {
        let body = format!("New order for {}\n{}", branch.name, render_order(order));
        for contact in &branch.contacts {
            self.emit(brand, contact, "order_alert", &body)?;
        }
        Ok(())
    }

    async fn send_order_status_update(
        &self,
        brand: &BrandContext,
        to: &str,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<()> {
        self.emit(
            brand,
            to,
            "order_status",
            &format!("Your order {order_id} is now {status}."),
        )
    }

    async fn send_cart_reminder(&self, brand: &BrandContext, to: &str, cart: &Cart) -> Result<()> {
        let items = cart
            .items
            .iter()
            .map(|i| format!("{} x {}", i.quantity, i.name))
            .collect::<Vec<_>>()
            .join(", ");
        self.emit(
            brand,
            to,
            "cart_reminder",
            &format!("You have items waiting in your cart: {items}. Complete your order!"),
        )
    }
}

/// Builds checkout URLs locally. Amounts are in the smallest currency unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderPaymentLinks;

#[async_trait]
impl PaymentLinks for PlaceholderPaymentLinks {
    async fn create_payment_link(
        &self,
        brand: &BrandContext,
        amount_subunits: i64,
        order_id: &str,
        customer_contact: &str,
    ) -> Result<String> {
        if amount_subunits <= 0 {
            return Err(CommerceError::external(
                "payment link",
                format!("non-positive amount {amount_subunits}"),
            ));
        }
        info!(brand = %brand.id, order_id, customer = customer_contact, amount_subunits, "payment link created");
        Ok(format!(
            "https://razorpay.com/pay?order_id={order_id}&amount={amount_subunits}"
        ))
    }
}

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl GeocodeResponse {
    fn first_location(&self) -> Option<Coordinates> {
        let location = &self.results.first()?.geometry.location;
        Coordinates::new(location.lat, location.lng).ok()
    }
}

/// Google Geocoding API client. Without an API key every lookup is absent.
#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl GoogleGeocoder {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CommerceError::external("geocoding", e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            endpoint: GEOCODE_URL.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, address: &str) -> Result<Option<Coordinates>> {
        let Some(key) = self.api_key.as_deref() else {
            error!("geocoding API key is not configured");
            return Ok(None);
        };

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("address", address), ("key", key)])
            .send()
            .await
            .map_err(|e| CommerceError::external("geocoding", e.to_string()))?;

        if !response.status().is_success() {
            return Err(CommerceError::external(
                "geocoding",
                format!("HTTP {}", response.status()),
            ));
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| CommerceError::external("geocoding", e.to_string()))?;
        if body.results.is_empty() {
            warn!(status = %body.status, "address could not be geocoded");
        }
        Ok(body.first_location())
    }
}
