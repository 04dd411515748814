use crate::domain::cart::Money;
use crate::domain::geo::Coordinates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a tenant storefront. Every keyed record is namespaced by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BrandId(pub String);

impl BrandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub name: String,
    pub price: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Numbers that receive order alerts for this branch.
    #[serde(default)]
    pub contacts: Vec<String>,
}

impl Branch {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// Immutable per-request view of one storefront's configuration.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct BrandContext {
    pub id: BrandId,
    pub name: String,
    /// Channel routing id carried in inbound message metadata.
    pub phone_number_id: String,
    #[serde(default)]
    pub catalog_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub greeting: Option<String>,
    #[serde(default)]
    pub admin_numbers: Vec<String>,
    #[serde(default)]
    pub catalog: BTreeMap<String, Product>,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

impl BrandContext {
    pub fn product(&self, product_id: &str) -> Option<&Product> {
        self.catalog.get(product_id)
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches
            .iter()
            .find(|b| b.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Admins and branch staff may issue discount and order-status commands.
    pub fn is_staff(&self, number: &str) -> bool {
        let number = number.trim_start_matches('+');
        self.admin_numbers.iter().any(|n| n == number)
            || self
                .branches
                .iter()
                .any(|b| b.contacts.iter().any(|c| c == number))
    }
}

impl fmt::Debug for BrandContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrandContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phone_number_id", &self.phone_number_id)
            .field("catalog_id", &self.catalog_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "[redacted]"))
            .field(
                "webhook_secret",
                &self.webhook_secret.as_ref().map(|_| "[redacted]"),
            )
            .field("products", &self.catalog.len())
            .field("branches", &self.branches.len())
            .finish()
    }
}
