//! Path-based routing configuration.

use serde::{Deserialize, Serialize};

/// A mapping between a path prefix and an upstream base URL.
///
/// Routes are evaluated in definition order and the first matching prefix
/// wins, so more specific prefixes should be listed before general ones.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    pub path_prefix: String,
    pub upstream_url: String,
}

impl RouteConfig {
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.path_prefix.is_empty() {
            anyhow::bail!("path_prefix cannot be empty for routes");
        }
        if !self.path_prefix.starts_with('/') {
            anyhow::bail!(
                "path_prefix '{}' must start with a '/' character",
                self.path_prefix
            );
        }
        if self.upstream_url.is_empty() {
            anyhow::bail!("upstream_url cannot be empty for routes");
        }
        Ok(())
    }
}
