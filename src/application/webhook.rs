use crate::application::ledger::{ConfirmOutcome, OrderLedger};
use crate::application::registry::BrandRegistry;
use crate::domain::brand::BrandContext;
use crate::domain::order::PaymentMethod;
use crate::error::{CommerceError, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Event name of a completed payment link.
pub const PAYMENT_LINK_PAID: &str = "payment_link.paid";

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(payload);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex signature. A missing or empty secret never
/// verifies.
pub fn verify_signature(secret: Option<&str>, payload: &[u8], signature_hex: &str) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        return false;
    };
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentEvent {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub payload: PaymentPayload,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentPayload {
    pub payment_link: Option<PaymentLinkWrapper>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentLinkWrapper {
    pub entity: PaymentLinkEntity,
}

#[derive(Debug, Deserialize)]
pub struct PaymentLinkEntity {
    pub reference_id: Option<String>,
    pub customer: Option<PaymentCustomer>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentCustomer {
    pub contact: Option<String>,
}

impl PaymentEvent {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn order_id(&self) -> Option<&str> {
        self.entity()?.reference_id.as_deref()
    }

    pub fn contact(&self) -> Option<&str> {
        self.entity()?.customer.as_ref()?.contact.as_deref()
    }

    fn entity(&self) -> Option<&PaymentLinkEntity> {
        self.payload.payment_link.as_ref().map(|w| &w.entity)
    }
}

/// Decides which brand signed a payment notification.
///
/// When the payload names an order the ledger already knows (active or
/// archived), only that order's brand secret is tried. Otherwise every
/// brand is tried, default last.
#[derive(Clone)]
pub struct WebhookAuthenticator {
    registry: Arc<BrandRegistry>,
    ledger: OrderLedger,
}

impl WebhookAuthenticator {
    pub fn new(registry: Arc<BrandRegistry>, ledger: OrderLedger) -> Self {
        Self { registry, ledger }
    }

    pub async fn authenticate(&self, payload: &[u8], signature_hex: &str) -> Result<Arc<BrandContext>> {
        let order_id = PaymentEvent::parse(payload)
            .ok()
            .and_then(|event| event.order_id().map(str::to_string));

        if let Some(order_id) = order_id {
            match self.ledger.get_order(&order_id).await {
                Ok(order) => {
                    let brand = self
                        .registry
                        .get(&order.brand_id)
                        .ok_or_else(|| CommerceError::UnknownBrand(order.brand_id.to_string()))?;
                    debug!(order_id = %order_id, brand = %brand.id, "verifying against the order's brand");
                    return if verify_signature(brand.webhook_secret.as_deref(), payload, signature_hex) {
                        Ok(brand)
                    } else {
                        Err(CommerceError::InvalidSignature)
                    };
                }
                Err(CommerceError::OrderNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        self.registry.resolve_by_signature(payload, signature_hex)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Confirmed { order_id: String },
    AlreadyConfirmed { order_id: String },
    /// Authentic but not actionable.
    Ignored(&'static str),
    /// Signature missing or not matching any brand.
    Rejected,
}

impl WebhookOutcome {
    /// Acknowledgement body. Every outcome is answered with HTTP 200.
    pub fn acknowledgement(&self) -> &'static str {
        match self {
            Self::Confirmed { .. } | Self::AlreadyConfirmed { .. } => "OK",
            Self::Ignored(_) | Self::Rejected => "Ignored",
        }
    }
}

#[derive(Clone)]
pub struct PaymentWebhookHandler {
    authenticator: WebhookAuthenticator,
    ledger: OrderLedger,
}

impl PaymentWebhookHandler {
    pub fn new(authenticator: WebhookAuthenticator, ledger: OrderLedger) -> Self {
        Self {
            authenticator,
            ledger,
        }
    }

    /// Authenticates and applies one payment notification. Never fails:
    /// every problem is logged and folded into the outcome.
    pub async fn handle(&self, payload: &[u8], signature: Option<&str>) -> WebhookOutcome {
        let Some(signature) = signature else {
            warn!("payment webhook without signature");
            return WebhookOutcome::Rejected;
        };

        let brand = match self.authenticator.authenticate(payload, signature).await {
            Ok(brand) => brand,
            Err(e) if e.is_authenticity_failure() => {
                warn!(error = %e, "payment webhook failed authentication");
                return WebhookOutcome::Rejected;
            }
            Err(e) => {
                error!(error = %e, "payment webhook authentication errored");
                return WebhookOutcome::Rejected;
            }
        };

        let event = match PaymentEvent::parse(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(brand = %brand.id, error = %e, "malformed payment webhook");
                return WebhookOutcome::Ignored("malformed payload");
            }
        };
        if event.event != PAYMENT_LINK_PAID {
            debug!(brand = %brand.id, event = %event.event, "ignoring payment event");
            return WebhookOutcome::Ignored("unhandled event");
        }
        let (Some(contact), Some(order_id)) = (event.contact(), event.order_id()) else {
            warn!(brand = %brand.id, "paid event without contact or reference id");
            return WebhookOutcome::Ignored("missing contact or reference id");
        };

        match self
            .ledger
            .confirm_order(&brand, contact, order_id, PaymentMethod::Online)
            .await
        {
            Ok(ConfirmOutcome::Confirmed(order)) => {
                info!(brand = %brand.id, order_id = %order.order_id, "payment confirmed");
                WebhookOutcome::Confirmed {
                    order_id: order.order_id,
                }
            }
            Ok(ConfirmOutcome::AlreadyConfirmed(order)) => {
                debug!(brand = %brand.id, order_id = %order.order_id, "duplicate payment notification");
                WebhookOutcome::AlreadyConfirmed {
                    order_id: order.order_id,
                }
            }
            Err(CommerceError::OrderNotFound(id)) => {
                info!(brand = %brand.id, order_id = %id, "payment for unknown order");
                WebhookOutcome::Ignored("unknown order")
            }
            Err(e) => {
                error!(brand = %brand.id, order_id, error = %e, "payment confirmation failed");
                WebhookOutcome::Ignored("confirmation failed")
            }
        }
    }
}
