use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a customer in the ordering conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    #[default]
    MainMenu,
    ViewingCatalog,
    ViewingCart,
    SelectingDelivery,
    EnteringAddress,
    ChoosingPayment,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MainMenu => "MAIN_MENU",
            Self::ViewingCatalog => "VIEWING_CATALOG",
            Self::ViewingCart => "VIEWING_CART",
            Self::SelectingDelivery => "SELECTING_DELIVERY",
            Self::EnteringAddress => "ENTERING_ADDRESS",
            Self::ChoosingPayment => "CHOOSING_PAYMENT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub step: Step,
    /// Delivery address typed while checking out.
    #[serde(default)]
    pub address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn at(step: Step) -> Self {
        Self {
            step,
            address: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }
}
