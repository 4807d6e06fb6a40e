//! Session and subscription configuration
//!
//! Both configurations deserialize from TOML (or any serde format) with
//! defaults for every optional field.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ClientError, Result};

// =============================================================================
// Session Configuration
// =============================================================================

/// Configuration for a [`Session`](crate::Session)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server base URL (e.g., "http://push.example.com:8080")
    pub server_url: String,
    /// User name sent on session creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password sent on session creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Adapter set the session binds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter_set: Option<String>,
    /// Initial bandwidth limit in kbit/s (0 = unlimited)
    #[serde(default)]
    pub requested_max_bandwidth: f64,
    /// How long `disconnect` waits for the dispatch loop before aborting it
    #[serde(default = "default_disconnect_timeout_ms")]
    pub disconnect_timeout_ms: u64,
    /// Timeout for control and message requests
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// TCP connect timeout for all requests; also bounds the wait for the
    /// stream header
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_disconnect_timeout_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl SessionConfig {
    /// Create a configuration with defaults for everything but the server URL
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            username: None,
            password: None,
            adapter_set: None,
            requested_max_bandwidth: 0.0,
            disconnect_timeout_ms: default_disconnect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_adapter_set(mut self, adapter_set: impl Into<String>) -> Self {
        self.adapter_set = Some(adapter_set.into());
        self
    }

    pub fn with_requested_max_bandwidth(mut self, bandwidth: f64) -> Self {
        self.requested_max_bandwidth = bandwidth;
        self
    }

    pub fn with_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("Invalid session config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Check that the configuration can be used to open a session
    pub fn validate(&self) -> Result<()> {
        self.parsed_server_url()?;
        validate_bandwidth(self.requested_max_bandwidth)
    }

    /// The server URL, parsed
    pub fn parsed_server_url(&self) -> Result<Url> {
        if self.server_url.trim().is_empty() {
            return Err(ClientError::Config("server_url is required".into()));
        }
        Url::parse(&self.server_url)
            .map_err(|e| ClientError::Config(format!("Invalid server_url: {}", e)))
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Reject negative or non-finite bandwidth limits
pub(crate) fn validate_bandwidth(bandwidth: f64) -> Result<()> {
    if !bandwidth.is_finite() || bandwidth < 0.0 {
        return Err(ClientError::Config(format!(
            "requested_max_bandwidth must be a non-negative number, got {}",
            bandwidth
        )));
    }
    Ok(())
}

/// Protocol representation of a bandwidth limit
pub(crate) fn bandwidth_param(bandwidth: f64) -> String {
    if bandwidth == 0.0 {
        "unlimited".to_string()
    } else {
        bandwidth.to_string()
    }
}

// =============================================================================
// Subscription Configuration
// =============================================================================

/// How updates for an item are folded into its stored values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    /// Each update replaces the item's values wholesale
    Distinct,
    /// Each update overlays only the fields it carries
    Merge,
}

impl SubscriptionMode {
    /// Name used on the wire
    pub fn as_protocol(&self) -> &'static str {
        match self {
            SubscriptionMode::Distinct => "DISTINCT",
            SubscriptionMode::Merge => "MERGE",
        }
    }
}

impl fmt::Display for SubscriptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionMode::Distinct => write!(f, "distinct"),
            SubscriptionMode::Merge => write!(f, "merge"),
        }
    }
}

/// Maximum update frequency requested for a subscription
///
/// Serializes as a number of updates per second, or the string
/// `"unfiltered"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrequencyRepr", into = "FrequencyRepr")]
pub enum MaxFrequency {
    /// At most this many updates per second (0 = no limit)
    Limited(f64),
    /// No filtering at all; overflow notifications become possible
    Unfiltered,
}

impl Default for MaxFrequency {
    fn default() -> Self {
        Self::Limited(0.0)
    }
}

impl MaxFrequency {
    /// Value sent as `LS_requested_max_frequency`
    pub fn as_param(&self) -> String {
        match self {
            MaxFrequency::Limited(f) if *f == 0.0 => "unlimited".to_string(),
            MaxFrequency::Limited(f) => f.to_string(),
            MaxFrequency::Unfiltered => "unfiltered".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FrequencyRepr {
    Number(f64),
    Text(String),
}

impl TryFrom<FrequencyRepr> for MaxFrequency {
    type Error = String;

    fn try_from(repr: FrequencyRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            FrequencyRepr::Number(f) if f.is_finite() && f >= 0.0 => Ok(MaxFrequency::Limited(f)),
            FrequencyRepr::Number(f) => Err(format!("invalid max_frequency: {}", f)),
            FrequencyRepr::Text(s) if s.eq_ignore_ascii_case("unfiltered") => {
                Ok(MaxFrequency::Unfiltered)
            }
            FrequencyRepr::Text(s) => Err(format!("invalid max_frequency: {}", s)),
        }
    }
}

impl From<MaxFrequency> for FrequencyRepr {
    fn from(frequency: MaxFrequency) -> Self {
        match frequency {
            MaxFrequency::Limited(f) => FrequencyRepr::Number(f),
            MaxFrequency::Unfiltered => FrequencyRepr::Text("unfiltered".to_string()),
        }
    }
}

/// Configuration for a [`Subscription`](crate::Subscription)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Item names, in order
    pub items: Vec<String>,
    /// Field names, in order
    pub fields: Vec<String>,
    /// Update merge policy
    pub mode: SubscriptionMode,
    /// Data adapter name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,
    /// Selector applied server-side
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// Requested update frequency
    #[serde(default)]
    pub max_frequency: MaxFrequency,
}

impl SubscriptionConfig {
    pub fn new<I, F>(items: I, fields: F, mode: SubscriptionMode) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            items: items.into_iter().map(Into::into).collect(),
            fields: fields.into_iter().map(Into::into).collect(),
            mode,
            adapter: None,
            selector: None,
            max_frequency: MaxFrequency::default(),
        }
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = Some(adapter.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    pub fn with_max_frequency(mut self, frequency: MaxFrequency) -> Self {
        self.max_frequency = frequency;
        self
    }

    /// Check item/field lists and frequency
    pub fn validate(&self) -> Result<()> {
        if self.items.is_empty() {
            return Err(ClientError::Config("items are required".into()));
        }
        if self.fields.is_empty() {
            return Err(ClientError::Config("fields are required".into()));
        }

        let mut seen = HashSet::new();
        for item in &self.items {
            if item.is_empty() || item.contains(char::is_whitespace) {
                return Err(ClientError::Config(format!("Invalid item name: {:?}", item)));
            }
            if !seen.insert(item.as_str()) {
                return Err(ClientError::Config(format!("Duplicate item: {}", item)));
            }
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.is_empty() || field.contains(char::is_whitespace) {
                return Err(ClientError::Config(format!(
                    "Invalid field name: {:?}",
                    field
                )));
            }
            if !seen.insert(field.as_str()) {
                return Err(ClientError::Config(format!("Duplicate field: {}", field)));
            }
        }

        if let MaxFrequency::Limited(f) = self.max_frequency {
            if !f.is_finite() || f < 0.0 {
                return Err(ClientError::Config(format!("Invalid max_frequency: {}", f)));
            }
        }

        Ok(())
    }
}
