//! Layered settings: compiled defaults, then a TOML file, then
//! `CHATCART_*` environment variables (`__` separates sections, e.g.
//! `CHATCART_SERVER__PORT=9000`).
//!
//! Per-brand secrets may be kept out of the file and supplied as
//! `CHATCART_WEBHOOK_SECRET_<BRAND>` / `CHATCART_ACCESS_TOKEN_<BRAND>`.

use crate::domain::brand::BrandContext;
use crate::error::{CommerceError, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "CHATCART_";
const WEBHOOK_SECRET_PREFIX: &str = "CHATCART_WEBHOOK_SECRET_";
const ACCESS_TOKEN_PREFIX: &str = "CHATCART_ACCESS_TOKEN_";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub delivery: DeliverySettings,
    pub sessions: SessionSettings,
    pub reminders: ReminderSettings,
    pub external: ExternalSettings,
    pub ledger: LedgerSettings,
    pub storage: StorageSettings,
    /// CSV file receiving the activity trail. Disabled when unset.
    pub activity_log: Option<PathBuf>,
    /// Brand used when an event carries no routing hint, and checked last
    /// during signature matching. Defaults to the first configured brand.
    pub default_brand: Option<String>,
    pub brands: Vec<BrandContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Token expected by the channel subscription handshake.
    pub verify_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            verify_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliverySettings {
    pub radius_km: f64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self { radius_km: 6.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub state_ttl_secs: u64,
    pub cart_ttl_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            state_ttl_secs: 3600,
            cart_ttl_secs: 86_400,
        }
    }
}

impl SessionSettings {
    pub fn state_ttl(&self) -> Duration {
        Duration::from_secs(self.state_ttl_secs)
    }

    pub fn cart_ttl(&self) -> Duration {
        Duration::from_secs(self.cart_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReminderSettings {
    pub sweep_interval_secs: u64,
    pub daily_interval_secs: u64,
    pub idle_after_secs: u64,
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            daily_interval_secs: 86_400,
            idle_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSettings {
    /// Upper bound for every call to messaging, geocoding and payment
    /// collaborators.
    pub timeout_ms: u64,
    pub geocoding_api_key: Option<String>,
}

impl Default for ExternalSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            geocoding_api_key: None,
        }
    }
}

impl ExternalSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    pub max_status_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self { max_status_retries: 5 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// RocksDB directory. In-memory storage is used when unset.
    pub db_path: Option<PathBuf>,
}

impl Settings {
    /// Loads `path` (if it exists) over the defaults, then applies the
    /// environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(env_provider())
            .extract()
            .map_err(|e| CommerceError::Config(e.to_string()))?;
        settings.apply_secret_overrides(std::env::vars());
        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from TOML text without consulting the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Settings = Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::string(toml))
            .extract()
            .map_err(|e| CommerceError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fills brand secrets from `CHATCART_WEBHOOK_SECRET_<BRAND>` and
    /// `CHATCART_ACCESS_TOKEN_<BRAND>` variables. The brand suffix is matched
    /// case-insensitively against the brand id.
    pub fn apply_secret_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            let (suffix, is_secret) = if let Some(rest) = key.strip_prefix(WEBHOOK_SECRET_PREFIX) {
                (rest, true)
            } else if let Some(rest) = key.strip_prefix(ACCESS_TOKEN_PREFIX) {
                (rest, false)
            } else {
                continue;
            };

            if let Some(brand) = self
                .brands
                .iter_mut()
                .find(|b| b.id.as_str().eq_ignore_ascii_case(suffix))
            {
                if is_secret {
                    brand.webhook_secret = Some(value);
                } else {
                    brand.access_token = Some(value);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.brands.is_empty() {
            return Err(CommerceError::Config("no brands configured".to_string()));
        }
        if !(self.delivery.radius_km.is_finite() && self.delivery.radius_km > 0.0) {
            return Err(CommerceError::Config(format!(
                "delivery.radius_km must be positive, got {}",
                self.delivery.radius_km
            )));
        }

        if self.reminders.sweep_interval_secs == 0 || self.reminders.daily_interval_secs == 0 {
            return Err(CommerceError::Config(
                "reminder intervals must be at least one second".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut channels = HashSet::new();
        for brand in &self.brands {
            if !ids.insert(brand.id.as_str()) {
                return Err(CommerceError::Config(format!("duplicate brand id `{}`", brand.id)));
            }
            if !channels.insert(brand.phone_number_id.as_str()) {
                return Err(CommerceError::Config(format!(
                    "channel id `{}` is used by more than one brand",
                    brand.phone_number_id
                )));
            }
            if brand.branches.is_empty() {
                return Err(CommerceError::Config(format!("brand `{}` has no branches", brand.id)));
            }
        }

        if let Some(default) = &self.default_brand
            && !ids.contains(default.as_str())
        {
            return Err(CommerceError::Config(format!(
                "default_brand `{default}` is not a configured brand"
            )));
        }
        Ok(())
    }
}

fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX)
        .filter(|key| {
            let key = key.as_str().to_ascii_lowercase();
            !key.starts_with("webhook_secret_") && !key.starts_with("access_token_")
        })
        .split("__")
}
