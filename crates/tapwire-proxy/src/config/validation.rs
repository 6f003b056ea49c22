//! OpenAPI validation configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiValidationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Path to the OpenAPI document (JSON or YAML).
    #[serde(default)]
    pub spec_path: String,

    /// Validate inbound requests before forwarding.
    #[serde(default = "default_true")]
    pub validate_requests: bool,

    /// Validate upstream responses after capture.
    #[serde(default = "default_true")]
    pub validate_responses: bool,

    /// Treat paths absent from the document as validation failures.
    #[serde(default)]
    pub strict: bool,

    /// Forward the exchange even when validation fails; the response and
    /// stored record carry an `X-API-Validation-Error` marker instead.
    #[serde(default)]
    pub continue_on_fail: bool,
}

impl ApiValidationConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.enabled && self.spec_path.is_empty() {
            anyhow::bail!("api_validation.spec_path must be provided when API validation is enabled");
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
