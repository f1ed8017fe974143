//! External payment gateway capability.
//!
//! The provider is an untrusted collaborator: possibly slow, possibly
//! duplicating, reachable only over HTTP. Everything it returns is treated
//! as data, and every non-2xx response becomes a structured [`GatewayError`]
//! rather than an exception crossing a component boundary.

pub mod client;
pub mod types;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use types::{CheckoutLink, CreateIntentParams, CreatedIntent, IntentSnapshot};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway network error: {message}")]
    Network { message: String },

    #[error("gateway API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("gateway rate limit exceeded")]
    RateLimited,

    #[error("invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("invalid gateway request: {message}")]
    InvalidRequest { message: String },
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Network { .. } | GatewayError::RateLimited => true,
            GatewayError::Api { retryable, .. } => *retryable,
            GatewayError::InvalidResponse { .. } | GatewayError::InvalidRequest { .. } => false,
        }
    }
}

/// The processor's HTTP capability, as consumed by the services. Mocked in
/// tests the same way the HTTP implementation fulfils it in production.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, params: CreateIntentParams)
        -> Result<CreatedIntent, GatewayError>;

    async fn get_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError>;

    async fn create_link(
        &self,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<CheckoutLink, GatewayError>;

    async fn archive_link(&self, link_id: &str) -> Result<CheckoutLink, GatewayError>;

    async fn list_methods(&self) -> Result<Vec<String>, GatewayError>;
}
