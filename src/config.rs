use std::time::Duration;

use serde::Deserialize;

fn default_direct_image_hosts() -> Vec<String> {
    vec!["googleusercontent.com".to_owned()]
}

fn default_publish_marker() -> String {
    "/pubchart".to_owned()
}

fn default_format_param() -> String {
    "format".to_owned()
}

fn default_format_value() -> String {
    "image".to_owned()
}

fn default_cors_blocked_hosts() -> Vec<String> {
    vec!["docs.google.com".to_owned()]
}

fn default_proxy_base() -> url::Url {
    url::Url::parse("https://images.weserv.nl/").expect("static proxy url")
}

fn default_timeout_secs() -> Option<u64> {
    Some(30)
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_true() -> bool {
    true
}

fn default_cache_bust_param() -> String {
    "t".to_owned()
}

fn default_width() -> f64 {
    400.0
}

fn default_height() -> f64 {
    300.0
}

fn default_name() -> String {
    "Google Sheets Chart".to_owned()
}

fn default_legacy_name() -> String {
    "Google Sheets Chart".to_owned()
}

fn default_key_prefix() -> String {
    "charts".to_owned()
}

#[derive(Deserialize, Clone, Debug)]
pub struct LinkRules {
    /// Hosts (or parent domains) that already serve image bytes.
    #[serde(default = "default_direct_image_hosts")]
    pub direct_image_hosts: Vec<String>,
    #[serde(default = "default_publish_marker")]
    pub publish_marker: String,
    #[serde(default = "default_format_param")]
    pub format_param: String,
    #[serde(default = "default_format_value")]
    pub format_value: String,
}

impl Default for LinkRules {
    fn default() -> Self {
        Self {
            direct_image_hosts: default_direct_image_hosts(),
            publish_marker: default_publish_marker(),
            format_param: default_format_param(),
            format_value: default_format_value(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct FetchPolicy {
    /// Hosts whose cross-origin policy blocks direct fetches; these go to the
    /// proxy without trying direct first.
    #[serde(default = "default_cors_blocked_hosts")]
    pub cors_blocked_hosts: Vec<String>,
    #[serde(default = "default_proxy_base")]
    pub proxy_base: url::Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
    /// Extra attempts after a transport failure or a 5xx answer.
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_true")]
    pub cache_bust: bool,
    #[serde(default = "default_cache_bust_param")]
    pub cache_bust_param: String,
}

impl FetchPolicy {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            cors_blocked_hosts: default_cors_blocked_hosts(),
            proxy_base: default_proxy_base(),
            timeout_secs: default_timeout_secs(),
            retries: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            cache_bust: true,
            cache_bust_param: default_cache_bust_param(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct PlaceholderConfig {
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default = "default_name")]
    pub default_name: String,
    /// Name given to placeholders by releases that predate chart ids.
    #[serde(default = "default_legacy_name")]
    pub legacy_name: String,
    /// Whether bulk updates treat any placeholder whose name contains
    /// `Chart` as a candidate.
    #[serde(default = "default_true")]
    pub loose_match: bool,
}

impl Default for PlaceholderConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            default_name: default_name(),
            legacy_name: default_legacy_name(),
            loose_match: true,
        }
    }
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistryScope {
    #[default]
    Document,
    Global,
}

#[derive(Deserialize, Clone, Debug)]
pub struct RegistryConfig {
    #[serde(default)]
    pub scope: RegistryScope,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl RegistryConfig {
    pub fn storage_key(&self, document_id: &str) -> String {
        match self.scope {
            RegistryScope::Document => format!("{}:{document_id}", self.key_prefix),
            RegistryScope::Global => self.key_prefix.clone(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scope: RegistryScope::Document,
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub links: LinkRules,
    #[serde(default)]
    pub fetch: FetchPolicy,
    #[serde(default)]
    pub placeholder: PlaceholderConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.links.publish_marker.is_empty() {
            return Err("links.publish_marker must not be empty".to_owned());
        }
        if self.links.format_param.is_empty() || self.links.format_value.is_empty() {
            return Err("links.format_param and links.format_value must not be empty".to_owned());
        }
        if !matches!(self.fetch.proxy_base.scheme(), "http" | "https") {
            return Err(format!(
                "fetch.proxy_base must be an http(s) url, got {}",
                self.fetch.proxy_base
            ));
        }
        if self.registry.key_prefix.is_empty() {
            return Err("registry.key_prefix must not be empty".to_owned());
        }
        Ok(())
    }
}
