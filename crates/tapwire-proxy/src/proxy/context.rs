//! The shared per-process server context.
//!
//! All cross-exchange state (frozen config, router, pooled client,
//! limiter, validator, store handle) lives here and is passed by `Arc`
//! to every handler. There are no singletons.

use super::client::{create_http_client, HttpClient};
use crate::config::{Config, ProxyMode};
use crate::limiter::RateLimiter;
use crate::shutdown::ActivityTracker;
use crate::store::TrafficStore;
use crate::validator::ApiValidator;
use std::sync::Arc;
use tracing::{info, warn};

pub struct ServerContext {
    pub config: Config,
    pub mode: ProxyMode,
    pub router: crate::router::Router,
    pub client: HttpClient,
    pub limiter: RateLimiter,
    pub validator: Option<ApiValidator>,
    pub store: Arc<TrafficStore>,
    pub activity: Arc<ActivityTracker>,
}

impl ServerContext {
    pub fn new(config: Config, store: Arc<TrafficStore>) -> Result<Self, anyhow::Error> {
        let mode = config.mode();
        let router = crate::router::Router::from_config(&config)?;
        let client = create_http_client(&config)?;
        let limiter = RateLimiter::new(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );

        // A document that fails to load disables validation with a
        // warning instead of aborting the process.
        let validator = if config.api_validation.enabled {
            match ApiValidator::load(&config.api_validation) {
                Ok(v) => {
                    info!(
                        spec = %config.api_validation.spec_path,
                        paths = v.path_count(),
                        "OpenAPI validation enabled"
                    );
                    Some(v)
                }
                Err(e) => {
                    warn!(
                        spec = %config.api_validation.spec_path,
                        error = %e,
                        "failed to load OpenAPI document, validation disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            mode,
            router,
            client,
            limiter,
            validator,
            store,
            activity: Arc::new(ActivityTracker::new()),
            config,
        })
    }

    pub fn wants_request_validation(&self) -> bool {
        self.validator
            .as_ref()
            .map(|v| v.options().validate_requests)
            .unwrap_or(false)
    }

    pub fn wants_response_validation(&self) -> bool {
        self.validator
            .as_ref()
            .map(|v| v.options().validate_responses)
            .unwrap_or(false)
    }
}
