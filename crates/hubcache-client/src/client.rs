//! The public Hub client.
//!
//! One client owns the configuration, the HTTP session, the resolved
//! token, and the optional accelerated transports. Construction is
//! explicit: nothing here mutates process-global state.

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::debug;

use hubcache_cache::{CacheLookup, RepoCache};
use hubcache_core::{HubConfig, RepoId, Result, TokenPolicy, DEFAULT_REVISION};
use hubcache_transport::{AcceleratedTransport, HttpSession, SessionOptions};

/// Client for the Hub: cached file downloads and repository snapshots.
pub struct HubClient {
    config: HubConfig,
    session: HttpSession,
    token: Option<String>,
    xet_transport: Option<Arc<dyn AcceleratedTransport>>,
    turbo_transport: Option<Arc<dyn AcceleratedTransport>>,
}

impl HubClient {
    /// Builds a client from the environment with implicit token use.
    pub fn from_env() -> Result<Self> {
        Self::with_config(HubConfig::from_env(), TokenPolicy::Implicit)
    }

    /// Builds a client from an explicit configuration and token policy.
    pub fn with_config(config: HubConfig, token_policy: TokenPolicy) -> Result<Self> {
        let token = token_policy.resolve(&config)?;
        let session = HttpSession::new(SessionOptions {
            user_agent: config.user_agent.clone(),
            ..SessionOptions::default()
        });
        debug!(
            endpoint = %config.endpoint,
            cache = %config.hub_cache.display(),
            authenticated = token.is_some(),
            "built hub client"
        );
        Ok(Self {
            config,
            session,
            token,
            xet_transport: None,
            turbo_transport: None,
        })
    }

    /// Installs the xet transport backend.
    pub fn with_xet_transport(mut self, transport: Arc<dyn AcceleratedTransport>) -> Self {
        self.xet_transport = Some(transport);
        self
    }

    /// Installs the turbo transport backend.
    pub fn with_turbo_transport(mut self, transport: Arc<dyn AcceleratedTransport>) -> Self {
        self.turbo_transport = Some(transport);
        self
    }

    /// The active configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The shared HTTP session.
    pub fn session(&self) -> &HttpSession {
        &self.session
    }

    pub(crate) fn xet_transport(&self) -> Option<&Arc<dyn AcceleratedTransport>> {
        self.xet_transport.as_ref()
    }

    pub(crate) fn turbo_transport(&self) -> Option<&Arc<dyn AcceleratedTransport>> {
        self.turbo_transport.as_ref()
    }

    /// Discards and rebuilds the HTTP session.
    pub fn reset_session(&self) {
        self.session.reset();
    }

    /// Headers for a Hub request; the bearer token is attached only when
    /// `authenticated` is set and a token was resolved.
    pub fn request_headers(&self, authenticated: bool) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if authenticated {
            if let Some(token) = &self.token {
                if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                    headers.insert(AUTHORIZATION, value);
                }
            }
        }
        headers
    }

    /// Pure-cache lookup: returns the pointer path, a cached-absent
    /// marker, or a miss, without touching the network.
    pub fn try_load_from_cache(
        &self,
        repo: &RepoId,
        filename: &str,
        revision: Option<&str>,
    ) -> Result<CacheLookup> {
        let revision = revision.unwrap_or(DEFAULT_REVISION);
        RepoCache::new(&self.config.hub_cache, repo).try_load(revision, filename)
    }

    /// The cache folder this client uses.
    pub fn cache_dir(&self) -> PathBuf {
        self.config.hub_cache.clone()
    }
}
