use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, RequestBuilder};
use std::time::Duration;
use tracing::debug;

use crate::config::HttpConfig;
use crate::errors::AppResult;

/// Accept header sent on every probe
pub const PROBE_ACCEPT: &str = "audio/*,*/*";

/// Asks Shoutcast/Icecast servers to include `icy-*` headers
pub const ICY_METADATA_HEADER: &str = "icy-metadata";

/// HTTP client tuned for probing third-party stream servers
///
/// Wraps a single pooled `reqwest::Client`; cloning is cheap and shares the
/// pool. Every request carries the media-player style headers stream servers
/// expect.
#[derive(Clone)]
pub struct ProbeHttpClient {
    client: Client,
}

impl ProbeHttpClient {
    /// Build the client from the `[http]` configuration section
    pub fn new(config: &HttpConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .redirect(Policy::limited(config.max_redirects))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(15))
            .default_headers(Self::probe_headers())
            .build()?;

        debug!(
            "Created probe HTTP client (connect timeout {:?}, max redirects {})",
            config.connect_timeout, config.max_redirects
        );

        Ok(Self { client })
    }

    /// Headers every probe sends regardless of method
    pub fn probe_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(PROBE_ACCEPT));
        headers.insert(
            HeaderName::from_static(ICY_METADATA_HEADER),
            HeaderValue::from_static("1"),
        );
        headers
    }

    pub fn head(&self, url: &str) -> RequestBuilder {
        self.client.request(Method::HEAD, url)
    }

    /// GET restricted to the first `max_bytes + 1` bytes (`Range: bytes=0-max_bytes`)
    pub fn ranged_get(&self, url: &str, max_bytes: usize) -> RequestBuilder {
        self.client
            .get(url)
            .header(RANGE, format!("bytes=0-{max_bytes}"))
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.client.get(url)
    }
}
