//! Process-wide HTTP session handle.
//!
//! One logical session carries the cookie jar and connection pool. The
//! probe path needs redirects disabled at the transport layer, so the
//! session owns two clients built from the same options; `reset()`
//! rebuilds both so stale TLS state cannot poison subsequent retries.

use std::sync::RwLock;
use std::time::Duration;

use tracing::{debug, warn};

/// Options applied when (re)building the underlying clients.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// `User-Agent` sent on every request.
    pub user_agent: String,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            user_agent: hubcache_core::build_user_agent(None),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

struct Clients {
    follow: reqwest::Client,
    no_redirect: reqwest::Client,
}

/// Shared HTTP session: cookie jar, connection pool, rebuild-on-TLS-fault.
pub struct HttpSession {
    options: SessionOptions,
    clients: RwLock<Clients>,
}

impl HttpSession {
    /// Builds a session from the given options.
    pub fn new(options: SessionOptions) -> Self {
        let clients = build_clients(&options);
        Self {
            options,
            clients: RwLock::new(clients),
        }
    }

    /// The redirect-following client, for API and body requests.
    pub fn client(&self) -> reqwest::Client {
        self.clients.read().expect("session lock poisoned").follow.clone()
    }

    /// The redirect-disabled client, for metadata probes.
    pub fn no_redirect_client(&self) -> reqwest::Client {
        self.clients
            .read()
            .expect("session lock poisoned")
            .no_redirect
            .clone()
    }

    /// Discards and rebuilds both clients.
    ///
    /// Invoked when a TLS-class error is observed; only subsequent
    /// requests see the new pool, so concurrent in-flight requests are
    /// unaffected.
    pub fn reset(&self) {
        warn!("resetting HTTP session");
        let fresh = build_clients(&self.options);
        *self.clients.write().expect("session lock poisoned") = fresh;
    }

    /// Whether any proxy environment is configured for this process.
    pub fn proxies_configured(&self) -> bool {
        ["HTTP_PROXY", "HTTPS_PROXY", "http_proxy", "https_proxy", "ALL_PROXY"]
            .iter()
            .any(|name| std::env::var_os(name).is_some_and(|v| !v.is_empty()))
    }
}

impl Default for HttpSession {
    fn default() -> Self {
        Self::new(SessionOptions::default())
    }
}

fn build_clients(options: &SessionOptions) -> Clients {
    debug!(user_agent = %options.user_agent, "building HTTP clients");
    let base = || {
        reqwest::Client::builder()
            .user_agent(options.user_agent.clone())
            .cookie_store(true)
            .connect_timeout(options.connect_timeout)
    };
    let follow = base().build().unwrap_or_default();
    let no_redirect = base()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_default();
    Clients {
        follow,
        no_redirect,
    }
}

/// True when a transport error looks like a TLS/connection-layer fault,
/// the class that warrants a session reset before the next retry.
pub fn is_tls_fault(error: &reqwest::Error) -> bool {
    if error.is_connect() {
        return true;
    }
    let rendered = format!("{error:?}").to_ascii_lowercase();
    rendered.contains("tls") || rendered.contains("ssl") || rendered.contains("certificate")
}

/// True when a transport error is transient and worth retrying: resets,
/// timeouts, interrupted bodies.
pub fn is_transient_fault(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_body()
}
