use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use rand::{Rng as _, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

const ID_SUFFIX_LEN: usize = 9;

pub(crate) static ID_IN_NAME: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\((chart_[^()\s]+)\)\s*$").unwrap());

/// Opaque chart identifier, `chart_<millis>_<suffix>`. Assigned once at
/// creation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ChartId(String);

impl ChartId {
    pub fn generate() -> Self {
        let suffix = rand::rng()
            .sample_iter(Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|byte| char::from(byte).to_ascii_lowercase())
            .collect::<String>();
        Self(format!("chart_{}_{suffix}", Utc::now().timestamp_millis()))
    }

    /// Pulls the trailing `(chart_...)` suffix out of a placeholder name.
    pub fn from_name(name: &str) -> Option<Self> {
        ID_IN_NAME
            .captures(name)
            .and_then(|captures| captures.get(1))
            .map(|id| Self(id.as_str().to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChartId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for ChartId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ChartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChartRecord {
    pub url: String,
    #[serde(rename = "name", alias = "displayName")]
    pub display_name: String,
    pub last_updated: DateTime<Utc>,
    pub id: ChartId,
}

impl ChartRecord {
    pub fn new(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            display_name: display_name.into(),
            last_updated: Utc::now(),
            id: ChartId::generate(),
        }
    }

    /// Name carried by the placeholder that displays this chart.
    pub fn placeholder_name(&self) -> String {
        format!("{} ({})", self.display_name, self.id)
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}
