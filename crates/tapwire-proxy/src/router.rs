//! Path-based route resolution.
//!
//! Maps an inbound request path to an upstream origin. Routes are scanned
//! in definition order and the first matching prefix wins; this is NOT
//! longest-prefix matching, so users must order specific prefixes before
//! general ones. Unmatched paths fall back to the default upstream.

use crate::config::Config;
use url::Url;

/// An upstream target with its URL components resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamOrigin {
    /// `scheme://host[:port]`, with any path component of the configured
    /// base URL discarded. The original request path and query are always
    /// preserved verbatim on the outbound side.
    pub origin: String,
    /// Value for the outbound `Host` header.
    pub host: String,
    pub is_https: bool,
}

impl UpstreamOrigin {
    fn parse(raw: &str) -> Result<Self, anyhow::Error> {
        let url = Url::parse(raw)
            .map_err(|e| anyhow::anyhow!("invalid upstream URL '{raw}': {e}"))?;

        let is_https = match url.scheme() {
            "http" => false,
            "https" => true,
            other => anyhow::bail!("unsupported upstream scheme '{other}' in '{raw}'"),
        };

        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("upstream URL '{raw}' has no host"))?
            .to_string();

        let host_header = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };

        let origin = format!("{}://{}", url.scheme(), host_header);

        Ok(Self {
            origin,
            host: host_header,
            is_https,
        })
    }
}

struct CompiledRoute {
    path_prefix: String,
    upstream: UpstreamOrigin,
}

/// Resolves inbound paths to upstream origins.
pub struct Router {
    routes: Vec<CompiledRoute>,
    default_upstream: Option<UpstreamOrigin>,
}

impl Router {
    /// Build a router from configuration, parsing every upstream base URL
    /// exactly once. An unparseable URL is a startup error.
    pub fn from_config(config: &Config) -> Result<Self, anyhow::Error> {
        let mut routes = Vec::with_capacity(config.routes.len());
        for route in &config.routes {
            routes.push(CompiledRoute {
                path_prefix: route.path_prefix.clone(),
                upstream: UpstreamOrigin::parse(&route.upstream_url)?,
            });
        }

        let default_upstream = config
            .default_upstream
            .as_deref()
            .map(UpstreamOrigin::parse)
            .transpose()?;

        Ok(Self {
            routes,
            default_upstream,
        })
    }

    /// Resolve a request path to an upstream. First prefix match in
    /// definition order wins; falls back to the default upstream.
    pub fn resolve(&self, path: &str) -> Option<&UpstreamOrigin> {
        for route in &self.routes {
            if path.starts_with(route.path_prefix.as_str()) {
                return Some(&route.upstream);
            }
        }
        self.default_upstream.as_ref()
    }

    /// Routing table entries for startup logging.
    pub fn table(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes
            .iter()
            .map(|r| (r.path_prefix.as_str(), r.upstream.origin.as_str()))
    }

    pub fn default_origin(&self) -> Option<&str> {
        self.default_upstream.as_ref().map(|u| u.origin.as_str())
    }
}
