//! Retrieves chart image bytes, falling back to a fixed image proxy when the
//! direct request is refused or not readable cross-origin.

use bytes::Bytes;
use derive_debug::Dbg;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use tracing::{debug, trace, warn};

use crate::{config::FetchPolicy, normalize::host_matches};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Network error: {status} {status_text} ({url})")]
pub struct NetworkError {
    pub status: u16,
    pub status_text: String,
    pub url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Status(NetworkError),
    #[error("transport error ({url}): {error}")]
    Transport { url: String, error: reqwest::Error },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status(error) => error.status >= 500,
        }
    }
}

#[derive(Dbg, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    #[dbg(skip)]
    pub bytes: Bytes,
    /// Declared content type, empty when the response carried none.
    pub content_type: String,
}

/// Something that can produce image bytes for a URL.
pub trait ImageSource {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<FetchedImage, FetchError>>;
}

pub struct Fetcher {
    client: reqwest::Client,
    policy: FetchPolicy,
}

impl Fetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = policy.timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            policy,
        })
    }

    /// The proxied form of `url`: scheme stripped, percent-encoded, passed as
    /// the `url` query parameter of the proxy base.
    pub fn proxy_url(&self, url: &str) -> String {
        let stripped = url
            .strip_prefix("https://")
            .or_else(|| url.strip_prefix("http://"))
            .unwrap_or(url);
        let encoded = urlencoding::encode(stripped);
        let mut proxy = self.policy.proxy_base.clone();
        let query = match proxy.query() {
            Some(query) if !query.is_empty() => format!("{query}&url={encoded}"),
            _ => format!("url={encoded}"),
        };
        proxy.set_query(Some(&query));
        proxy.to_string()
    }

    fn blocks_direct(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(ToOwned::to_owned))
            .is_some_and(|host| {
                self.policy
                    .cors_blocked_hosts
                    .iter()
                    .any(|domain| host_matches(&host, domain))
            })
    }

    /// `None` means "fall back to the proxy".
    async fn direct(&self, url: &str) -> Option<reqwest::Response> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(error) => {
                debug!(%url, %error, "direct fetch failed, using proxy");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(%url, status = %response.status(), "direct fetch refused, using proxy");
            return None;
        }
        let open = response
            .headers()
            .get(ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.trim() == "*");
        if !open {
            debug!(%url, "direct response is not open cross-origin, using proxy");
            return None;
        }
        Some(response)
    }

    async fn attempt(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let direct = if self.blocks_direct(url) {
            trace!(%url, "host blocks direct fetches");
            None
        } else {
            self.direct(url).await
        };
        let response = match direct {
            Some(response) => response,
            None => {
                let proxied = self.proxy_url(url);
                trace!(%url, %proxied, "fetching through proxy");
                self.client
                    .get(&proxied)
                    .send()
                    .await
                    .map_err(|error| FetchError::Transport {
                        url: url.to_owned(),
                        error,
                    })?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(NetworkError {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                url: url.to_owned(),
            }));
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| FetchError::Transport {
                url: url.to_owned(),
                error,
            })?;
        debug!(%url, size = bytes.len(), %content_type, "fetched chart image");
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

impl ImageSource for Fetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let mut remaining = self.policy.retries;
        loop {
            match self.attempt(url).await {
                Err(error) if remaining > 0 && error.is_retryable() => {
                    remaining -= 1;
                    warn!(%url, %error, remaining, "fetch failed, retrying");
                    tokio::time::sleep(self.policy.retry_backoff()).await;
                }
                result => return result,
            }
        }
    }
}
