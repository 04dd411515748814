use crate::application::webhook::verify_signature;
use crate::domain::brand::{BrandContext, BrandId};
use crate::error::{CommerceError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Resolves inbound traffic to the storefront it belongs to.
///
/// Contexts are handed out as `Arc` snapshots and passed explicitly through
/// every core call; nothing holds a process-wide "current brand".
#[derive(Debug, Clone)]
pub struct BrandRegistry {
    brands: BTreeMap<BrandId, Arc<BrandContext>>,
    by_channel: HashMap<String, BrandId>,
    default: Arc<BrandContext>,
}

impl BrandRegistry {
    /// `default` falls back to the first brand in configuration order.
    pub fn new(brands: Vec<BrandContext>, default: Option<&str>) -> Result<Self> {
        let fallback = brands
            .first()
            .map(|b| b.id.clone())
            .ok_or_else(|| CommerceError::Config("no brands configured".to_string()))?;
        let default_id = default.map(BrandId::new).unwrap_or(fallback);

        let mut by_channel = HashMap::new();
        let mut map = BTreeMap::new();
        for brand in brands {
            by_channel.insert(brand.phone_number_id.clone(), brand.id.clone());
            map.insert(brand.id.clone(), Arc::new(brand));
        }

        let default = map
            .get(&default_id)
            .cloned()
            .ok_or_else(|| CommerceError::UnknownBrand(default_id.to_string()))?;

        Ok(Self {
            brands: map,
            by_channel,
            default,
        })
    }

    pub fn get(&self, id: &BrandId) -> Option<Arc<BrandContext>> {
        self.brands.get(id).cloned()
    }

    pub fn default_brand(&self) -> Arc<BrandContext> {
        self.default.clone()
    }

    pub fn brands(&self) -> impl Iterator<Item = &Arc<BrandContext>> {
        self.brands.values()
    }

    /// Looks a brand up by the channel routing id carried with an inbound
    /// event. Events without a hint belong to the default brand.
    pub fn resolve(&self, tenant_hint: Option<&str>) -> Result<Arc<BrandContext>> {
        match tenant_hint {
            None => Ok(self.default_brand()),
            Some(hint) => self
                .by_channel
                .get(hint)
                .and_then(|id| self.get(id))
                .ok_or_else(|| CommerceError::UnknownBrand(hint.to_string())),
        }
    }

    /// Finds the brand whose webhook secret produced `signature_hex` over
    /// `payload`. Brands are tried in id order with the default brand last;
    /// the first match wins.
    pub fn resolve_by_signature(&self, payload: &[u8], signature_hex: &str) -> Result<Arc<BrandContext>> {
        let ordered = self
            .brands
            .values()
            .filter(|b| b.id != self.default.id)
            .chain(std::iter::once(&self.default));

        for brand in ordered {
            if verify_signature(brand.webhook_secret.as_deref(), payload, signature_hex) {
                debug!(brand = %brand.id, "webhook signature matched");
                return Ok(brand.clone());
            }
        }
        Err(CommerceError::UnknownBrand("no brand secret matches the signature".to_string()))
    }
}
