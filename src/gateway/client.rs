//! PayMongo HTTP client.
//!
//! Authentication is a static basic credential (the secret key, base64
//! encoded with an empty password). Requests carry a bounded retry with
//! exponential backoff on 429 and 5xx; everything else surfaces immediately.

use crate::config::ConfigError;
use crate::gateway::types::{
    to_minor_units, CheckoutLink, CreateIntentParams, CreatedIntent, Envelope, IntentResource,
    IntentSnapshot, LinkResource, ListEnvelope, PaymentMethodResource,
};
use crate::gateway::{GatewayError, PaymentGateway};
use async_trait::async_trait;
use base64::Engine;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    pub currency: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paymongo.com".to_string(),
            secret_key: String::new(),
            currency: "PHP".to_string(),
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

impl GatewayConfig {
    /// Load from the environment. A missing secret key is a deployment
    /// fault and surfaces as a `ConfigError`, not a gateway error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let secret_key = std::env::var("PAYMONGO_SECRET_KEY")
            .map_err(|_| ConfigError::MissingVariable("PAYMONGO_SECRET_KEY".to_string()))?;
        Ok(Self {
            base_url: std::env::var("PAYMONGO_BASE_URL")
                .unwrap_or_else(|_| "https://api.paymongo.com".to_string()),
            currency: std::env::var("PAYMONGO_CURRENCY").unwrap_or_else(|_| "PHP".to_string()),
            timeout_secs: std::env::var("PAYMONGO_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30),
            max_retries: std::env::var("PAYMONGO_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(2),
            secret_key,
        })
    }
}

pub struct PayMongoClient {
    config: GatewayConfig,
    http: reqwest::Client,
    auth_header: String,
}

impl PayMongoClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Network {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        let credential =
            base64::engine::general_purpose::STANDARD.encode(format!("{}:", config.secret_key));
        Ok(Self {
            http,
            auth_header: format!("Basic {}", credential),
            config,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn request_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
        idempotency_key: Option<&str>,
    ) -> Result<T, GatewayError> {
        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let mut request = self
                .http
                .request(method.clone(), url)
                .header("Authorization", &self.auth_header);
            if let Some(key) = idempotency_key {
                request = request.header("Idempotency-Key", key);
            }
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = request.send().await.map_err(|e| GatewayError::Network {
                message: format!("gateway request failed: {}", e),
            });

            match response {
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_success() {
                        return serde_json::from_str::<T>(&text).map_err(|e| {
                            GatewayError::InvalidResponse {
                                message: format!("invalid gateway JSON response: {}", e),
                            }
                        });
                    }

                    if status.as_u16() == 429 {
                        if attempt < self.config.max_retries {
                            tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                            continue;
                        }
                        return Err(GatewayError::RateLimited);
                    }

                    if status.is_server_error() && attempt < self.config.max_retries {
                        warn!(
                            status = %status,
                            attempt = attempt + 1,
                            "gateway server error, retrying"
                        );
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }

                    return Err(GatewayError::Api {
                        status: status.as_u16(),
                        message: extract_api_detail(&text)
                            .unwrap_or_else(|| format!("HTTP {}: {}", status, text)),
                        retryable: status.is_server_error(),
                    });
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.config.max_retries {
                        tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
                        continue;
                    }
                }
            }
        }

        Err(last_error.unwrap_or(GatewayError::Network {
            message: "gateway request failed".to_string(),
        }))
    }
}

/// Pull the provider-supplied detail string out of an error body shaped like
/// `{"errors": [{"detail": "..."}]}`, when present.
fn extract_api_detail(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    let detail = parsed
        .get("errors")?
        .as_array()?
        .first()?
        .get("detail")?
        .as_str()?;
    Some(detail.to_string())
}

#[async_trait]
impl PaymentGateway for PayMongoClient {
    async fn create_intent(
        &self,
        params: CreateIntentParams,
    ) -> Result<CreatedIntent, GatewayError> {
        let amount = to_minor_units(params.amount).ok_or(GatewayError::InvalidRequest {
            message: format!("amount {} is not a valid charge amount", params.amount),
        })?;
        let payload = serde_json::json!({
            "data": {
                "attributes": {
                    "amount": amount,
                    "currency": self.config.currency,
                    "description": params.description,
                    "payment_method_allowed": ["card", "gcash", "grab_pay", "paymaya"],
                }
            }
        });

        let raw: Envelope<IntentResource> = self
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/payment_intents"),
                Some(&payload),
                Some(&params.idempotency_key),
            )
            .await?;

        info!(intent_id = %raw.data.id, "payment intent created");
        Ok(CreatedIntent {
            intent_id: raw.data.id,
            status: raw.data.attributes.status,
        })
    }

    async fn get_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        let raw: Envelope<IntentResource> = self
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/v1/payment_intents/{}", intent_id)),
                None,
                None,
            )
            .await?;
        Ok(IntentSnapshot::from(raw.data))
    }

    async fn create_link(
        &self,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<CheckoutLink, GatewayError> {
        let amount = to_minor_units(amount).ok_or(GatewayError::InvalidRequest {
            message: format!("amount {} is not a valid charge amount", amount),
        })?;
        let payload = serde_json::json!({
            "data": {
                "attributes": {
                    "amount": amount,
                    "description": description,
                }
            }
        });
        let raw: Envelope<LinkResource> = self
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/v1/links"),
                Some(&payload),
                None,
            )
            .await?;
        Ok(CheckoutLink {
            link_id: raw.data.id,
            checkout_url: raw.data.attributes.checkout_url,
            status: raw.data.attributes.status,
        })
    }

    async fn archive_link(&self, link_id: &str) -> Result<CheckoutLink, GatewayError> {
        let raw: Envelope<LinkResource> = self
            .request_json(
                reqwest::Method::POST,
                &self.endpoint(&format!("/v1/links/{}/archive", link_id)),
                None,
                None,
            )
            .await?;
        Ok(CheckoutLink {
            link_id: raw.data.id,
            checkout_url: raw.data.attributes.checkout_url,
            status: raw.data.attributes.status,
        })
    }

    async fn list_methods(&self) -> Result<Vec<String>, GatewayError> {
        let raw: ListEnvelope<PaymentMethodResource> = self
            .request_json(
                reqwest::Method::GET,
                &self.endpoint("/v1/merchants/capabilities/payment_methods"),
                None,
                None,
            )
            .await?;
        Ok(raw.data.into_iter().map(|m| m.id).collect())
    }
}
