use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum CommerceError {
    #[error("no brand configured for `{0}`")]
    #[diagnostic(code(chatcart::unknown_brand))]
    UnknownBrand(String),

    #[error("webhook signature did not verify")]
    #[diagnostic(code(chatcart::invalid_signature))]
    InvalidSignature,

    #[error("cart is empty")]
    EmptyCart,

    #[error("outside delivery radius: nearest branch {branch} is {distance_km:.2} km away")]
    OutOfRadius { branch: String, distance_km: f64 },

    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("illegal status transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: String,
        to: String,
    },

    #[error("{service} failed: {message}")]
    #[diagnostic(code(chatcart::external_service))]
    ExternalService {
        service: &'static str,
        message: String,
    },

    #[error("invalid coordinate ({latitude}, {longitude})")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("concurrent update conflict on order {0}")]
    ConcurrentUpdateConflict(String),

    #[error("unknown inbound event type `{0}`")]
    UnknownEventType(String),

    #[error("configuration error: {0}")]
    #[diagnostic(code(chatcart::config))]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl CommerceError {
    pub fn external(service: &'static str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(Box::new(std::io::Error::other(message.into())))
    }

    /// Validation failures that are answered with a message to the customer
    /// instead of failing the request.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::EmptyCart
                | Self::OutOfRadius { .. }
                | Self::InvalidCommand(_)
                | Self::InvalidCoordinate { .. }
                | Self::InvalidTransition { .. }
                | Self::OrderNotFound(_)
        )
    }

    pub fn is_authenticity_failure(&self) -> bool {
        matches!(self, Self::UnknownBrand(_) | Self::InvalidSignature)
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
