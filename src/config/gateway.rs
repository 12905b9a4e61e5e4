//! Payment gateway configuration

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::ValidationError;
use crate::domain::billing::{WebhookVerifier, DEFAULT_TOLERANCE_SECS};

/// Webhook verification settings for the payment gateway
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Webhook signing secret (`whsec_...`)
    pub webhook_secret: SecretString,

    /// Maximum age of a signed webhook, in seconds
    #[serde(default = "default_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl GatewayConfig {
    /// Builds the verifier from this configuration.
    pub fn verifier(&self) -> WebhookVerifier {
        WebhookVerifier::new(self.webhook_secret.clone(), self.signature_tolerance_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let secret = self.webhook_secret.expose_secret();
        if secret.is_empty() {
            return Err(ValidationError::MissingRequired("gateway.webhook_secret"));
        }
        if !secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidWebhookSecret);
        }
        if !(1..=3600).contains(&self.signature_tolerance_secs) {
            return Err(ValidationError::InvalidSignatureTolerance);
        }
        Ok(())
    }
}

fn default_tolerance() -> i64 {
    DEFAULT_TOLERANCE_SECS
}
