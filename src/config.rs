//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a gateway session and its REST dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bot token from the Discord developer portal
    pub token: String,

    /// Authenticate as an OAuth2 bearer instead of a bot
    #[serde(default)]
    pub bearer: bool,

    /// Base URL for the REST API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Gateway protocol version, sent in the connection query string
    #[serde(default = "default_gateway_version")]
    pub gateway_version: u8,

    /// HTTP request timeout
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,

    /// Ask the gateway to compress dispatch payloads
    #[serde(default)]
    pub compress: bool,

    /// Member count above which offline members are not sent in guild payloads
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,

    /// Shard descriptor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardConfig>,
}

fn default_api_url() -> String {
    "https://discordapp.com/api/v6".into()
}

const fn default_gateway_version() -> u8 {
    6
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_large_threshold() -> u32 {
    50
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Static partition of guilds across gateway connections.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Shard ID
    pub shard_id: u32,

    /// Total number of shards
    pub shard_count: u32,
}

impl ShardConfig {
    /// Whether the descriptor addresses a valid partition.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.shard_count >= 1 && self.shard_id < self.shard_count
    }
}

impl ClientConfig {
    /// Create a configuration with defaults for the given token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            bearer: false,
            api_url: default_api_url(),
            gateway_version: default_gateway_version(),
            timeout: default_timeout(),
            compress: false,
            large_threshold: default_large_threshold(),
            shard: None,
        }
    }
}
