//! Inbound messaging events.
//!
//! The provider delivers a nested envelope (`entry[].changes[].value`). Only
//! the first message of each change is consumed; it is turned into a typed
//! [`InboundEvent`] so the conversation engine can match exhaustively.

use crate::error::{CommerceError, Result};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Channel routing id from the change metadata, used to pick the brand.
    pub tenant_hint: Option<String>,
    /// Sender number with any leading `+` stripped.
    pub customer: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Trimmed message body with its original casing.
    Text(String),
    ButtonReply(String),
    ListReply(String),
    CatalogSelection { product_id: String },
    Order(Vec<OrderedItem>),
    Location { latitude: f64, longitude: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderedItem {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    pub metadata: Option<Metadata>,
    /// Decoded one at a time so a malformed message only fails its own event.
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct Metadata {
    pub phone_number_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawMessage {
    pub from: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub text: Option<TextBody>,
    pub interactive: Option<RawInteractive>,
    pub location: Option<LocationBody>,
    pub order: Option<OrderBody>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct RawInteractive {
    #[serde(rename = "type")]
    pub kind: String,
    pub list_reply: Option<Reply>,
    pub button_reply: Option<Reply>,
    pub catalog_message: Option<CatalogMessage>,
}

#[derive(Debug, Deserialize)]
pub struct Reply {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct CatalogMessage {
    pub product_retailer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Deserialize)]
pub struct OrderBody {
    #[serde(default)]
    pub product_items: Vec<ProductItem>,
}

#[derive(Debug, Deserialize)]
pub struct ProductItem {
    pub product_retailer_id: String,
    pub quantity: Option<u32>,
}

impl WebhookEnvelope {
    /// One result per change that carries at least one message.
    pub fn into_events(self) -> Vec<Result<InboundEvent>> {
        self.entry
            .into_iter()
            .flat_map(|entry| entry.changes)
            .filter_map(|change| {
                let value = change.value;
                let tenant_hint = value.metadata.and_then(|m| m.phone_number_id);
                value
                    .messages
                    .into_iter()
                    .next()
                    .map(|msg| {
                        serde_json::from_value::<RawMessage>(msg)
                            .map_err(CommerceError::from)
                            .and_then(|msg| InboundEvent::from_raw(tenant_hint, msg))
                    })
            })
            .collect()
    }
}

impl InboundEvent {
    pub fn from_raw(tenant_hint: Option<String>, msg: RawMessage) -> Result<Self> {
        let customer = msg
            .from
            .as_deref()
            .map(|from| from.trim_start_matches('+'))
            .filter(|from| !from.is_empty())
            .ok_or_else(|| CommerceError::UnknownEventType("message without sender".to_string()))?
            .to_string();
        let malformed = |what: &str| CommerceError::UnknownEventType(format!("{what} without body"));

        let kind = match msg.kind.as_deref().unwrap_or_default() {
            "text" => {
                let text = msg.text.ok_or_else(|| malformed("text"))?;
                EventKind::Text(text.body.trim().to_string())
            }
            "interactive" => {
                let interactive = msg.interactive.ok_or_else(|| malformed("interactive"))?;
                match interactive.kind.as_str() {
                    "list_reply" => EventKind::ListReply(
                        interactive.list_reply.ok_or_else(|| malformed("list_reply"))?.id,
                    ),
                    "button_reply" => EventKind::ButtonReply(
                        interactive
                            .button_reply
                            .ok_or_else(|| malformed("button_reply"))?
                            .id,
                    ),
                    "catalog_message" => EventKind::CatalogSelection {
                        product_id: interactive
                            .catalog_message
                            .ok_or_else(|| malformed("catalog_message"))?
                            .product_retailer_id,
                    },
                    other => {
                        return Err(CommerceError::UnknownEventType(format!("interactive/{other}")));
                    }
                }
            }
            "order" => {
                let order = msg.order.ok_or_else(|| malformed("order"))?;
                EventKind::Order(
                    order
                        .product_items
                        .into_iter()
                        .map(|item| OrderedItem {
                            product_id: item.product_retailer_id,
                            quantity: item.quantity.unwrap_or(1).max(1),
                        })
                        .collect(),
                )
            }
            "location" => {
                let location = msg.location.ok_or_else(|| malformed("location"))?;
                EventKind::Location {
                    latitude: location.latitude,
                    longitude: location.longitude,
                }
            }
            "" => return Err(CommerceError::UnknownEventType("message without type".to_string())),
            other => return Err(CommerceError::UnknownEventType(other.to_string())),
        };

        Ok(Self {
            tenant_hint,
            customer,
            kind,
        })
    }
}
